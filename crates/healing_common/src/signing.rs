//! HMAC-SHA256 request signing
//!
//! The signed message is `"{id}:{action}:{timestamp}"` where the timestamp is
//! the exact string carried on the wire. Comparison is constant time.

use crate::error::{HealingError, Result};
use crate::protocol::HealingRequest;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Canonical bytes covered by the signature
pub fn signing_message(id: &Uuid, action: &str, timestamp: &str) -> String {
    format!("{}:{}:{}", id, action, timestamp)
}

fn mac(secret: &str, message: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    mac
}

/// Hex-encoded signature for a request
pub fn sign(secret: &str, id: &Uuid, action: &str, timestamp: &str) -> String {
    let message = signing_message(id, action, timestamp);
    hex::encode(mac(secret, &message).finalize().into_bytes())
}

/// Check a request's signature. Any defect is `AuthenticationFailure`.
pub fn verify(secret: &str, request: &HealingRequest) -> Result<()> {
    let signature = request
        .signature
        .as_deref()
        .ok_or_else(|| HealingError::AuthenticationFailure("missing signature".to_string()))?;

    let provided = hex::decode(signature)
        .map_err(|_| HealingError::AuthenticationFailure("malformed signature".to_string()))?;

    let message = signing_message(&request.id, &request.action, &request.timestamp);
    let expected = mac(secret, &message).finalize().into_bytes();

    if provided.len() != expected.len() {
        return Err(HealingError::AuthenticationFailure(
            "malformed signature".to_string(),
        ));
    }

    if bool::from(expected.as_slice().ct_eq(&provided)) {
        Ok(())
    } else {
        Err(HealingError::AuthenticationFailure(
            "invalid signature".to_string(),
        ))
    }
}

/// Reject timestamps too far from `now` in either direction. `max_age_secs == 0` disables.
pub fn check_freshness(
    request: &HealingRequest,
    now: DateTime<Utc>,
    max_age_secs: u64,
) -> Result<()> {
    let issued_at = request.issued_at()?;
    if max_age_secs == 0 {
        return Ok(());
    }
    let skew = (now - issued_at).num_seconds().unsigned_abs();
    if skew > max_age_secs {
        return Err(HealingError::AuthenticationFailure(format!(
            "request timestamp is {}s away from daemon clock",
            skew
        )));
    }
    Ok(())
}
