//! Control socket bind semantics (spec §4.6 "Bind semantics"), grounded on
//! `original_source/src/ctl-server.c`'s `cleanup_old_socket`/`ctl_server_init`
//! and `src/util.c`'s `default_ctl_socket_path`.

use std::env;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("socket path '{0}' exists and is not a socket; remove it manually or use an alternate path")]
    NotASocket(PathBuf),
    #[error("another control server is already listening on '{0}'; use an alternate socket path")]
    AlreadyRunning(PathBuf),
    #[error("failed to remove stale socket at '{path}': {source}")]
    RemoveStale { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to bind control socket at '{path}': {source}")]
    Bind { path: PathBuf, #[source] source: std::io::Error },
}

/// `default_ctl_socket_path`: `$XDG_RUNTIME_DIR/wayvncctl` if set, else
/// `/tmp/wayvncctl-<uid>`.
pub fn default_socket_path() -> PathBuf {
    match env::var("XDG_RUNTIME_DIR") {
        Ok(dir) if !dir.is_empty() => Path::new(&dir).join("wayvncctl"),
        _ => PathBuf::from(format!("/tmp/wayvncctl-{}", unsafe { libc::getuid() })),
    }
}

/// Whether `$XDG_RUNTIME_DIR` was unset when the path was resolved, so the
/// caller can log the same warning `ctl_server_init` does.
pub fn xdg_runtime_dir_is_set() -> bool {
    env::var_os("XDG_RUNTIME_DIR").is_some()
}

/// `cleanup_old_socket`: if `path` doesn't exist, nothing to do. If it
/// exists and isn't a socket, refuse — that's probably a config mistake or
/// another kind of file, not something safe to unlink. If it is a socket,
/// try to connect: success means a server is already listening there
/// (refuse); failure means it's a stale leftover from a previous run
/// (unlink and let the caller bind fresh).
fn cleanup_old_socket(path: &Path) -> Result<(), BindError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return Ok(()),
    };

    if !metadata.file_type().is_socket() {
        return Err(BindError::NotASocket(path.to_path_buf()));
    }

    if UnixStream::connect(path).is_ok() {
        return Err(BindError::AlreadyRunning(path.to_path_buf()));
    }

    fs::remove_file(path).map_err(|source| BindError::RemoveStale { path: path.to_path_buf(), source })
}

/// `ctl_server_init`'s socket/cleanup/bind/listen sequence, minus the
/// `aml_handler` registration — the caller registers the returned listener's
/// fd with its own event loop. Listens with a backlog of 16, matching the
/// source.
pub fn bind(path: &Path) -> Result<UnixListener, BindError> {
    cleanup_old_socket(path)?;
    UnixListener::bind(path).map_err(|source| BindError::Bind { path: path.to_path_buf(), source })
}

/// `ctl_server_stop`'s final step: remove the socket file. The listener
/// itself is closed by dropping the `UnixListener`.
pub fn unbind(path: &Path) {
    let _ = fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener as StdUnixListener;

    #[test]
    fn default_path_prefers_xdg_runtime_dir() {
        let previous = env::var_os("XDG_RUNTIME_DIR");
        env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        assert_eq!(default_socket_path(), PathBuf::from("/run/user/1000/wayvncctl"));
        match previous {
            Some(v) => env::set_var("XDG_RUNTIME_DIR", v),
            None => env::remove_var("XDG_RUNTIME_DIR"),
        }
    }

    #[test]
    fn binding_a_fresh_path_succeeds() {
        let dir = std::env::temp_dir().join(format!("wayvnc-ctl-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fresh.sock");
        let listener = bind(&path).unwrap();
        drop(listener);
        unbind(&path);
        assert!(!path.exists());
    }

    #[test]
    fn binding_over_a_non_socket_file_is_refused() {
        let dir = std::env::temp_dir().join(format!("wayvnc-ctl-test-regular-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("not-a-socket");
        fs::write(&path, b"hello").unwrap();
        assert!(matches!(bind(&path), Err(BindError::NotASocket(_))));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn binding_over_a_stale_socket_succeeds() {
        let dir = std::env::temp_dir().join(format!("wayvnc-ctl-test-stale-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stale.sock");
        let listener = StdUnixListener::bind(&path).unwrap();
        drop(listener);
        // Dropping a UnixListener does not remove its bind path, so this is
        // exactly the leftover-from-a-crashed-process scenario.
        assert!(path.exists());
        let rebound = bind(&path).unwrap();
        drop(rebound);
        unbind(&path);
    }

    #[test]
    fn binding_over_a_live_socket_is_refused() {
        let dir = std::env::temp_dir().join(format!("wayvnc-ctl-test-live-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("live.sock");
        let _listener = StdUnixListener::bind(&path).unwrap();
        assert!(matches!(bind(&path), Err(BindError::AlreadyRunning(_))));
        unbind(&path);
    }
}
