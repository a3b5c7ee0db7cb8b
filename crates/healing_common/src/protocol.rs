//! Wire protocol between healingctl and healingd
//!
//! One JSON request per connection, client half-closes, one JSON response.

use crate::error::{FailureKind, HealingError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/run/luminous-healing.sock";

/// Requests larger than this are rejected unread
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// A signed request for one healing action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingRequest {
    pub id: Uuid,
    /// Kept as a string so unknown names reach the registry and get reported
    pub action: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// RFC 3339 with nanoseconds and `Z`. Signed as sent, never re-rendered.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl HealingRequest {
    /// Unsigned request stamped with a fresh id and the current time
    pub fn new(action: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            parameters,
            timestamp: format_timestamp(&Utc::now()),
            signature: None,
        }
    }

    /// Replace the timestamp. Any existing signature no longer matches.
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = format_timestamp(&at);
        self
    }

    /// Parsed timestamp. An unparseable one fails authentication.
    pub fn issued_at(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| HealingError::AuthenticationFailure("malformed timestamp".to_string()))
    }

    pub fn signed(mut self, secret: &str) -> Self {
        self.signature = Some(crate::signing::sign(
            secret,
            &self.id,
            &self.action,
            &self.timestamp,
        ));
        self
    }
}

/// Exactly one response per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingResponse {
    pub request_id: Uuid,
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl HealingResponse {
    pub fn success(request_id: Uuid, output: impl Into<String>, duration_ms: u32) -> Self {
        Self {
            request_id,
            success: true,
            output: Some(output.into()),
            error: None,
            duration_ms,
            error_kind: None,
            suggestion: None,
        }
    }

    pub fn failure(request_id: Uuid, err: &HealingError, duration_ms: u32) -> Self {
        Self {
            request_id,
            success: false,
            output: None,
            error: Some(err.to_string()),
            duration_ms,
            error_kind: Some(err.kind()),
            suggestion: err.suggestion(),
        }
    }

    /// Failure for input that never became a `HealingRequest`
    pub fn rejected(error: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            request_id: Uuid::nil(),
            success: false,
            output: None,
            error: Some(error.into()),
            duration_ms: 0,
            error_kind: Some(kind),
            suggestion: HealingError::InvalidRequest.suggestion(),
        }
    }
}

/// Wire form of a timestamp: `2026-01-01T12:00:00.000000000Z`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Milliseconds since `start`, saturating at `u32::MAX`
pub fn elapsed_ms(start: std::time::Instant) -> u32 {
    u32::try_from(start.elapsed().as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parses_without_parameters() {
        let raw = json!({
            "id": "6f1c1a0e-2c35-4f7d-9a55-0d8f5b7c1e11",
            "action": "rollback_generation",
            "timestamp": "2026-01-01T12:00:00.000000000Z",
            "signature": "00"
        });
        let req: HealingRequest = serde_json::from_value(raw).unwrap();
        assert!(req.parameters.is_empty());
        assert_eq!(req.action, "rollback_generation");
    }

    #[test]
    fn test_timestamp_survives_json_byte_for_byte() {
        let req = HealingRequest::new("rollback_generation", Map::new());
        let wire = serde_json::to_string(&req).unwrap();
        let back: HealingRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(back.timestamp, req.timestamp);
        assert!(back.timestamp.ends_with('Z'));
        assert!(back.issued_at().is_ok());
    }

    #[test]
    fn test_unparseable_timestamp_fails_authentication() {
        let mut req = HealingRequest::new("rollback_generation", Map::new());
        req.timestamp = "yesterday".into();
        assert!(matches!(
            req.issued_at(),
            Err(HealingError::AuthenticationFailure(_))
        ));
    }

    #[test]
    fn test_failure_response_carries_kind_and_suggestion() {
        let err = HealingError::InsufficientPrivileges {
            manual_command: "sudo sync".into(),
        };
        let resp = HealingResponse::failure(Uuid::new_v4(), &err, 3);
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("Insufficient privileges"));
        assert_eq!(resp.error_kind, Some(FailureKind::InsufficientPrivileges));
        assert_eq!(resp.suggestion.as_deref(), Some("Run manually: sudo sync"));

        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["error_kind"], "insufficient_privileges");
    }

    #[test]
    fn test_success_response_omits_extension_fields() {
        let resp = HealingResponse::success(Uuid::nil(), "done", 12);
        let wire = serde_json::to_value(&resp).unwrap();
        assert!(wire.get("error_kind").is_none());
        assert!(wire.get("suggestion").is_none());
        assert_eq!(wire["duration_ms"], 12);
    }

    #[test]
    fn test_rejected_uses_nil_id() {
        let resp = HealingResponse::rejected("Invalid request format", FailureKind::InvalidRequest);
        assert_eq!(resp.request_id, Uuid::nil());
        assert!(!resp.success);
        assert!(resp.suggestion.is_some());
    }
}
