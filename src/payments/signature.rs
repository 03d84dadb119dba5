//! Processor webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. The signed
//! payload is `"<t>.<raw body>"`, HMAC-SHA256 keyed with the endpoint secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("no v1 signature")]
    MissingSignature,
    #[error("timestamp outside tolerance")]
    Expired,
    #[error("no signature matches the payload")]
    Mismatch,
}

/// Checks `header` against `payload`. `now` is the current unix time in seconds.
pub fn verify(payload: &[u8], header: &str, secret: &str, tolerance_secs: i64, now: i64) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => {
                if let Ok(bytes) = hex::decode(v) { signatures.push(bytes); }
            }
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() { return Err(SignatureError::MissingSignature); }
    if now.abs_diff(timestamp) > tolerance_secs.max(0) as u64 { return Err(SignatureError::Expired); }

    // verify_slice compares in constant time
    let matched = signatures.iter().any(|candidate| keyed(secret, timestamp, payload).verify_slice(candidate).is_ok());
    if matched { Ok(()) } else { Err(SignatureError::Mismatch) }
}

/// Produces a header value for `payload` signed at `timestamp`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let digest = keyed(secret, timestamp, payload).finalize().into_bytes();
    format!("t={},v1={}", timestamp, hex::encode(digest))
}

fn keyed(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}
