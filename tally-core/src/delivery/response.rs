//! Collector response interpretation

use serde_json::{Map, Value};

/// Code reported when the body is not a JSON object.
pub const INVALID_BODY_CODE: i32 = -1;

/// Outcome of one request to the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
    /// HTTP status (1xx normalized to 200), or -1 for an unparsable body
    pub code: i32,
    /// Set only when the request failed
    pub error: Option<String>,
    /// Parsed response object (empty when there was no body)
    pub body: Map<String, Value>,
}

impl DeliveryResponse {
    /// A transport-level failure with no response.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            code: 0,
            error: Some(error.into()),
            body: Map::new(),
        }
    }

    /// No error was reported.
    pub fn is_reachable(&self) -> bool {
        self.error.is_none()
    }

    /// No error and the body says `"status": "ok"` (any case).
    pub fn is_success(&self) -> bool {
        self.error.is_none()
            && self
                .body
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|status| status.eq_ignore_ascii_case("ok"))
    }

    /// Canned acknowledgement used by the simulated server.
    pub fn simulated_ok() -> Self {
        let mut body = Map::new();
        body.insert(
            "request_id".to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
        body.insert(
            "time".to_string(),
            Value::String(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        );
        body.insert("status".to_string(), Value::String("ok".to_string()));
        Self {
            code: 200,
            error: None,
            body,
        }
    }
}

/// Turn a status code and raw body into a [`DeliveryResponse`].
pub fn interpret(status: u16, text: &str) -> DeliveryResponse {
    let mut code = i32::from(status);
    if (100..200).contains(&code) {
        code = 200;
    }

    let mut error = None;
    let body = if text.trim().is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => {
                code = INVALID_BODY_CODE;
                error = Some("invalid JSON format".to_string());
                Map::new()
            }
        }
    };

    if code > 399 {
        error = Some(format!("server response code {}", code));
    }

    DeliveryResponse { code, error, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_status_is_success() {
        let response = interpret(200, r#"{"status":"OK","request_id":"r1"}"#);
        assert_eq!(response.code, 200);
        assert!(response.is_success());
        assert_eq!(response.body["request_id"], "r1");
    }

    #[test]
    fn test_missing_status_is_not_success() {
        let response = interpret(200, r#"{"request_id":"r1"}"#);
        assert!(response.is_reachable());
        assert!(!response.is_success());
    }

    #[test]
    fn test_informational_code_becomes_200() {
        let response = interpret(100, "");
        assert_eq!(response.code, 200);
        assert!(response.body.is_empty());
        assert!(response.error.is_none());
    }

    #[test]
    fn test_client_error_sets_message() {
        let response = interpret(403, r#"{"status":"denied"}"#);
        assert_eq!(response.code, 403);
        assert_eq!(response.error.as_deref(), Some("server response code 403"));
        assert_eq!(response.body["status"], "denied");
        assert!(!response.is_success());
    }

    #[test]
    fn test_unparsable_body() {
        let response = interpret(200, "<html>oops</html>");
        assert_eq!(response.code, INVALID_BODY_CODE);
        assert_eq!(response.error.as_deref(), Some("invalid JSON format"));
    }

    #[test]
    fn test_simulated_ok_shape() {
        let response = DeliveryResponse::simulated_ok();
        assert!(response.is_success());
        assert_eq!(response.code, 200);
        assert!(response.body.contains_key("request_id"));
        assert!(response.body.contains_key("time"));
    }
}
