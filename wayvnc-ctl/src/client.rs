//! The control-plane client (spec §4.7 "Control-Plane Client"), grounded on
//! `original_source/src/ctl-client.c`. Unlike [`crate::server`], which is
//! driven by an external event loop, a control client is a short-lived
//! synchronous tool (`wayvncctl attach ...`) that connects, sends one
//! request, and waits for the matching response — so this module owns its
//! `UnixStream` directly rather than splitting I/O out to a caller.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::json_ipc::{IpcError, Request, Response};

/// Synthetic events `wayvncctl --reconnect` emits locally around a
/// connection's lifetime — never sent by the server, so they don't appear in
/// [`crate::commands::EventType`] (`internal_events` in the source).
pub mod local_event {
    pub const STARTUP: &str = "wayvnc-startup";
    pub const SHUTDOWN: &str = "wayvnc-shutdown";
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("control socket \"{path}\" did not appear before the timeout")]
    SocketNotFound { path: String },
    #[error("control socket \"{path}\" is not a socket")]
    NotASocket { path: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ipc(#[from] IpcError),
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("server disconnected")]
    Disconnected,
    #[error("server returned an error ({code}): {data:?}")]
    ServerError { code: i32, data: Option<Value> },
}

const READ_BUFFER_CAPACITY: usize = 1024;

/// `struct ctl_client`.
pub struct ControlClient {
    stream: UnixStream,
    read_buffer: Vec<u8>,
}

/// How long [`ControlClient::connect`] retries a missing socket path before
/// giving up. `None` mirrors the source's `timeout == -1` (retry forever).
#[derive(Debug, Clone, Copy)]
pub enum ConnectTimeout {
    Immediate,
    Forever,
}

impl ControlClient {
    /// `ctl_client_connect`: `wait_for_socket` (poll for the path to exist,
    /// retrying every 50ms) then `try_connect` (retry `connect()` while it
    /// fails with `ENOENT`, i.e. the listener hasn't called `listen()` yet).
    pub fn connect(path: &Path, timeout: ConnectTimeout) -> Result<Self, ClientError> {
        Self::wait_for_socket(path, timeout)?;
        let stream = Self::try_connect(path, timeout)?;
        Ok(ControlClient { stream, read_buffer: Vec::new() })
    }

    fn wait_for_socket(path: &Path, timeout: ConnectTimeout) -> Result<(), ClientError> {
        loop {
            match std::fs::symlink_metadata(path) {
                Ok(metadata) => {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        return Err(ClientError::NotASocket { path: path.display().to_string() });
                    }
                    return Ok(());
                }
                Err(_) => match timeout {
                    ConnectTimeout::Immediate => {
                        return Err(ClientError::SocketNotFound { path: path.display().to_string() })
                    }
                    ConnectTimeout::Forever => thread::sleep(Duration::from_millis(50)),
                },
            }
        }
    }

    fn try_connect(path: &Path, timeout: ConnectTimeout) -> Result<UnixStream, ClientError> {
        loop {
            match UnixStream::connect(path) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => match timeout {
                    ConnectTimeout::Immediate => return Err(e.into()),
                    ConnectTimeout::Forever => thread::sleep(Duration::from_millis(50)),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `jsonipc_request_pack` + a blocking `send`.
    pub fn send_request(&mut self, request: &Request) -> Result<(), ClientError> {
        self.stream.write_all(request.to_line().as_bytes())?;
        Ok(())
    }

    /// `json_from_buffer`: try to resolve a complete JSON object already in
    /// the buffer before reading anything new.
    fn next_from_buffer(&mut self) -> Result<Option<Value>, ClientError> {
        if self.read_buffer.is_empty() {
            return Ok(None);
        }
        let mut de = serde_json::Deserializer::from_slice(&self.read_buffer).into_iter::<Value>();
        match de.next() {
            None => Ok(None),
            Some(Ok(value)) => {
                let consumed = de.byte_offset();
                self.read_buffer.drain(0..consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => {
                if self.read_buffer.len() >= READ_BUFFER_CAPACITY {
                    return Err(ClientError::Io(std::io::Error::new(std::io::ErrorKind::Other, "response message is too long")));
                }
                Ok(None)
            }
            Some(Err(e)) => Err(IpcError::Malformed(e).into()),
        }
    }

    /// `read_one_object`: drain whatever's buffered first, then block on the
    /// socket (bounded by `timeout`) until a full JSON object is available.
    fn read_one_object(&mut self, timeout: Duration) -> Result<Value, ClientError> {
        if let Some(value) = self.next_from_buffer()? {
            return Ok(value);
        }

        self.stream.set_read_timeout(Some(timeout))?;
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 512];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout);
            }
            self.stream.set_read_timeout(Some(remaining))?;

            let n = match self.stream.read(&mut chunk) {
                Ok(0) => return Err(ClientError::Disconnected),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(ClientError::Timeout)
                }
                Err(e) => return Err(e.into()),
            };
            self.read_buffer.extend_from_slice(&chunk[..n]);

            if let Some(value) = self.next_from_buffer()? {
                return Ok(value);
            }
        }
    }

    /// `ctl_client_wait_for_response`: waits up to one second for the next
    /// object and parses it as a response.
    pub fn wait_for_response(&mut self) -> Result<Response, ClientError> {
        let value = self.read_one_object(Duration::from_secs(1))?;
        let response: Response = serde_json::from_value(value).map_err(IpcError::Malformed)?;
        Ok(response)
    }

    /// Sends `request` and returns its response's `data`, or a
    /// [`ClientError::ServerError`] if `code != 0`.
    pub fn call(&mut self, request: &Request) -> Result<Option<Value>, ClientError> {
        self.send_request(request)?;
        let response = self.wait_for_response()?;
        if response.is_ok() {
            Ok(response.data)
        } else {
            Err(ClientError::ServerError { code: response.code, data: response.data })
        }
    }

    /// Sends `event-receive` and waits for its acknowledgement.
    pub fn register_for_events(&mut self) -> Result<(), ClientError> {
        let request = Request::new(None, "event-receive", None)?;
        self.call(&request)?;
        Ok(())
    }

    /// Waits (up to `timeout`) for the next server-pushed event, parsed as a
    /// request whose `method` is the event name.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<Request>, ClientError> {
        match self.read_one_object(timeout) {
            Ok(value) => {
                let request: Request = serde_json::from_value(value).map_err(IpcError::Malformed)?;
                Ok(Some(request))
            }
            Err(ClientError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_over(stream: UnixStream) -> ControlClient {
        ControlClient { stream, read_buffer: Vec::new() }
    }

    #[test]
    fn call_sends_a_request_and_parses_a_matching_response() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = client_over(a);
        let mut peer = b;

        let request = Request::new(Some(json!(1)), "version", None).unwrap();
        let handle = thread::spawn(move || client.call(&request));

        let mut buf = [0u8; 256];
        let n = peer.read(&mut buf).unwrap();
        let seen = Request::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();
        assert_eq!(seen.method, "version");

        let response = Response::ok(seen.id, Some(json!({"wayvnc": "1.0"})));
        peer.write_all(response.to_line().as_bytes()).unwrap();

        let data = handle.join().unwrap().unwrap();
        assert_eq!(data, Some(json!({"wayvnc": "1.0"})));
    }

    #[test]
    fn call_surfaces_a_server_error_response() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = client_over(a);
        let mut peer = b;

        let request = Request::new(Some(json!(2)), "attach", None).unwrap();
        let handle = thread::spawn(move || client.call(&request));

        let mut buf = [0u8; 256];
        let n = peer.read(&mut buf).unwrap();
        let seen = Request::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();

        let response = Response::error(seen.id, 22, "Missing display");
        peer.write_all(response.to_line().as_bytes()).unwrap();

        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, ClientError::ServerError { code: 22, .. }));
    }

    #[test]
    fn next_event_returns_none_on_timeout_without_erroring() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut client = client_over(a);
        let result = client.next_event(Duration::from_millis(20)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn next_event_parses_a_pushed_event_as_a_request() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut client = client_over(a);

        let event = Request::new(None, "capture-changed", Some(json!({"output": "eDP-1"}))).unwrap();
        b.write_all(event.to_line().as_bytes()).unwrap();

        let seen = client.next_event(Duration::from_millis(200)).unwrap().unwrap();
        assert_eq!(seen.method, "capture-changed");
    }
}
