//! The config file loader (SPEC_FULL.md ambient stack; spec §6 "Config file
//! format"). A hand-rolled `key = value` line scanner, not ini/toml, matching
//! `original_source/src/cfg.c` field-for-field — `serde`/`serde_json` stay
//! reserved for the JSON-RPC wire format elsewhere in this workspace.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Mirrors the `X_CFG_LIST` fields in `original_source/include/cfg.h`. `None`
/// stands in for the C struct's null/zero default — every field is optional
/// until a config file (or the caller) sets it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub enable_auth: bool,
    pub private_key_file: Option<String>,
    pub certificate_file: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub address: Option<String>,
    pub port: Option<u32>,
    pub enable_pam: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file given and no default path could be resolved (neither XDG_CONFIG_HOME nor HOME is set)")]
    NoDefaultPath,
    #[error("{path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    /// Carries the 1-based line number, matching `cfg_load`'s `return lineno`
    /// failure convention.
    #[error("{path}:{line}: {kind}")]
    Line { path: PathBuf, line: usize, kind: LineErrorKind },
}

#[derive(Debug)]
pub enum LineErrorKind {
    UnknownKey(String),
    /// The source silently truncates an unparseable `port` to 0 via
    /// `strtoul`; surfacing a real error here is the more idiomatic choice
    /// and is recorded as an explicit decision in DESIGN.md.
    InvalidUint(String),
}

impl fmt::Display for LineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineErrorKind::UnknownKey(key) => write!(f, "unknown key `{key}`"),
            LineErrorKind::InvalidUint(value) => write!(f, "invalid unsigned integer `{value}`"),
        }
    }
}

/// `cfg__get_default_path`: `$XDG_CONFIG_HOME/wayvnc/config` if set, else
/// `$HOME/.config/wayvnc/config`, else no default.
pub fn default_path() -> Option<PathBuf> {
    if let Ok(dir) = env::var("XDG_CONFIG_HOME") {
        if !dir.is_empty() {
            return Some(Path::new(&dir).join("wayvnc/config"));
        }
    }
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return Some(Path::new(&home).join(".config/wayvnc/config"));
        }
    }
    None
}

/// Loads `path`, or [`default_path`] if `path` is `None`.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let resolved;
    let path = match path {
        Some(path) => path,
        None => {
            resolved = default_path().ok_or(ConfigError::NoDefaultPath)?;
            &resolved
        }
    };

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    load_str(&text).map_err(|(line, kind)| ConfigError::Line { path: path.to_path_buf(), line, kind })
}

/// The line-oriented parser itself, split out from [`load`] so it can be
/// exercised against an in-memory string without touching the filesystem.
/// Matches `cfg_load`'s loop over `cfg__load_line`: trim each line, skip
/// empty/`#`-prefixed ones, split on the first `=`.
fn load_str(text: &str) -> Result<Config, (usize, LineErrorKind)> {
    let mut config = Config::default();

    for (index, raw_line) in text.lines().enumerate() {
        let lineno = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim_end();
        let value = value.trim_start();

        apply_key_value(&mut config, key, value).map_err(|kind| (lineno, kind))?;
    }

    Ok(config)
}

/// `cfg__load_key_value`'s `strcmp` chain against each known key name.
fn apply_key_value(config: &mut Config, key: &str, value: &str) -> Result<(), LineErrorKind> {
    match key {
        "enable_auth" => config.enable_auth = parse_bool(value),
        "private_key_file" => config.private_key_file = Some(value.to_string()),
        "certificate_file" => config.certificate_file = Some(value.to_string()),
        "username" => config.username = Some(value.to_string()),
        "password" => config.password = Some(value.to_string()),
        "address" => config.address = Some(value.to_string()),
        "port" => config.port = Some(parse_uint(value)?),
        "enable_pam" => config.enable_pam = parse_bool(value),
        other => return Err(LineErrorKind::UnknownKey(other.to_string())),
    }
    Ok(())
}

/// `LOAD_bool`: anything but the literal string `false` is true.
fn parse_bool(value: &str) -> bool {
    value != "false"
}

fn parse_uint(value: &str) -> Result<u32, LineErrorKind> {
    value.parse().map_err(|_| LineErrorKind::InvalidUint(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_key() {
        let text = "\
            enable_auth = true\n\
            private_key_file = /etc/wayvnc/key.pem\n\
            certificate_file = /etc/wayvnc/cert.pem\n\
            username = alice\n\
            password = hunter2\n\
            address = 0.0.0.0\n\
            port = 5900\n\
            enable_pam = false\n\
        ";
        let config = load_str(text).unwrap();
        assert_eq!(
            config,
            Config {
                enable_auth: true,
                private_key_file: Some("/etc/wayvnc/key.pem".to_string()),
                certificate_file: Some("/etc/wayvnc/cert.pem".to_string()),
                username: Some("alice".to_string()),
                password: Some("hunter2".to_string()),
                address: Some("0.0.0.0".to_string()),
                port: Some(5900),
                enable_pam: false,
            }
        );
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let text = "\n  \n# a comment\n   # indented comment\nport = 5901\n";
        let config = load_str(text).unwrap();
        assert_eq!(config.port, Some(5901));
    }

    #[test]
    fn bool_is_anything_but_the_literal_false() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("false"));
    }

    #[test]
    fn trims_whitespace_around_key_and_value() {
        let text = "  address   =   127.0.0.1  \n";
        let config = load_str(text).unwrap();
        // The whole line is trimmed before the `=` split (`cfg__trim`), so
        // any trailing whitespace after the value is already gone by the
        // time `value.trim_start()` runs; only leading value whitespace
        // needs trimming here.
        assert_eq!(config.address.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn unknown_key_reports_its_line_number() {
        let text = "port = 1\nbogus_key = oops\n";
        let err = load_str(text).unwrap_err();
        assert_eq!(err.0, 2);
        assert!(matches!(err.1, LineErrorKind::UnknownKey(ref k) if k == "bogus_key"));
    }

    #[test]
    fn invalid_port_is_a_parse_error_not_a_silent_zero() {
        let text = "port = not-a-number\n";
        let err = load_str(text).unwrap_err();
        assert_eq!(err.0, 1);
        assert!(matches!(err.1, LineErrorKind::InvalidUint(ref v) if v == "not-a-number"));
    }

    #[test]
    fn default_path_prefers_xdg_config_home() {
        // Reading process-wide env vars in a test is inherently racy under
        // parallel execution; this only asserts the resolver doesn't panic
        // and returns a `wayvnc/config`-suffixed path when something is set.
        if let Some(path) = default_path() {
            assert!(path.ends_with("config"));
        }
    }
}
