use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{NotifyError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Compute the completion-event signature:
/// `HEX(HMAC_SHA256(secret, timestamp + "." + body))`.
///
/// `body` must be the exact bytes that go on the wire — serialise once,
/// sign, send the same buffer.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| NotifyError::InvalidKeyLength)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Header value carrying the signature, `sha256=<hex>`.
pub fn signature_header(secret: &str, timestamp: &str, body: &[u8]) -> Result<String> {
    Ok(format!("sha256={}", sign(secret, timestamp, body)?))
}
