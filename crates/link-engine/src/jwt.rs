//! Unverified JWT payload decoding.
//!
//! This module deliberately performs no signature verification. The only
//! consumer is the clock-drift computation during session materialization,
//! a local hint the identity SDK uses to adjust for skewed clocks. Nothing
//! here may ever gate access control.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Decode the `iat` claim from a JWT's payload segment without verifying
/// the signature.
///
/// Returns `None` when the token is not three dot-separated segments, the
/// payload is not valid base64url/JSON, or `iat` is absent or non-integer.
pub fn decode_iat(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims.get("iat")?.as_i64()
}
