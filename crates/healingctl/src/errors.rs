//! Exit codes for healingctl

use healing_common::FailureKind;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when the action ran and failed, or was refused
pub const EXIT_ACTION_FAILED: i32 = 1;

/// Exit code for bad command-line input (unknown action, malformed parameter)
pub const EXIT_USAGE: i32 = 64;

/// Exit code when the daemon returns something that is not a response
pub const EXIT_INVALID_RESPONSE: i32 = 65;

/// Exit code when the daemon is unavailable/unreachable
pub const EXIT_SERVICE_UNAVAILABLE: i32 = 70;

/// Map a failed result to its exit code
pub fn exit_code_for(kind: Option<FailureKind>) -> i32 {
    match kind {
        Some(FailureKind::ServiceUnavailable) => EXIT_SERVICE_UNAVAILABLE,
        Some(FailureKind::InvalidResponse) => EXIT_INVALID_RESPONSE,
        Some(FailureKind::UnknownAction) | Some(FailureKind::ValidationError) => EXIT_USAGE,
        _ => EXIT_ACTION_FAILED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code_for(Some(FailureKind::ServiceUnavailable)), 70);
        assert_eq!(exit_code_for(Some(FailureKind::UnknownAction)), 64);
        assert_eq!(exit_code_for(Some(FailureKind::RateLimitExceeded)), 1);
        assert_eq!(exit_code_for(None), 1);
        assert_eq!(exit_code_for(Some(FailureKind::InvalidResponse)), 65);
        // The daemon refusing our request is not a garbled reply
        assert_eq!(exit_code_for(Some(FailureKind::InvalidRequest)), 1);
    }
}
