//! JSON-IPC request/response framing (spec §4.6/§4.7 wire format), grounded
//! on `original_source/src/json-ipc.c`. One JSON object per line: a request
//! carries `id`/`method`/`params`, a response carries `id`/`code`/`data`.
//! Uses `serde_json::Value` in place of jansson's `json_t`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("malformed JSON-IPC message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("`id` must be null, a string, or a number")]
    InvalidId,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
}

/// `is_valid_id`: an id must be absent/null, a string, or a number.
fn is_valid_id(id: &Value) -> bool {
    matches!(id, Value::Null | Value::String(_) | Value::Number(_))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: Option<Value>, method: impl Into<String>, params: Option<Value>) -> Result<Self, IpcError> {
        if let Some(id) = &id {
            if !is_valid_id(id) {
                return Err(IpcError::InvalidId);
            }
        }
        Ok(Request { id, method: method.into(), params })
    }

    /// `jsonipc_request_parse_new`.
    pub fn parse(text: &str) -> Result<Self, IpcError> {
        let request: Request = serde_json::from_str(text)?;
        if let Some(id) = &request.id {
            if !is_valid_id(id) {
                return Err(IpcError::InvalidId);
            }
        }
        Ok(request)
    }

    /// `jsonipc_request_pack`.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Request always serializes")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(id: Option<Value>, data: Option<Value>) -> Self {
        Response { id, code: 0, data }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Response { id, code, data: Some(Value::String(message.into())) }
    }

    pub fn parse(text: &str) -> Result<Self, IpcError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("Response always serializes")
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trips_through_a_line() {
        let request = Request::new(Some(json!(1)), "attach", Some(json!({"display": "wayland-0"}))).unwrap();
        let line = request.to_line();
        let parsed = Request::parse(&line).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn request_without_params_omits_the_field() {
        let request = Request::new(None, "detach", None).unwrap();
        let line = request.to_line();
        assert!(!line.contains("params"));
    }

    #[test]
    fn request_rejects_an_object_id() {
        let err = Request::new(Some(json!({"not": "valid"})), "help", None).unwrap_err();
        assert!(matches!(err, IpcError::InvalidId));
    }

    #[test]
    fn response_ok_has_a_zero_code() {
        let response = Response::ok(Some(json!("abc")), Some(json!({"version": "1.0"})));
        assert!(response.is_ok());
        let line = response.to_line();
        let parsed = Response::parse(&line).unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn response_error_carries_a_nonzero_code_and_message() {
        let response = Response::error(None, 22 /* EINVAL */, "missing parameter `id`");
        assert!(!response.is_ok());
        assert_eq!(response.data, Some(json!("missing parameter `id`")));
    }

    #[test]
    fn parse_surfaces_malformed_json() {
        assert!(matches!(Request::parse("not json"), Err(IpcError::Malformed(_))));
    }
}
