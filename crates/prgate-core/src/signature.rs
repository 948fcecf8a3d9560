//! Webhook payload signatures (`X-Hub-Signature-256`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{GateError, GateResult};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

fn keyed(secret: &str, body: &[u8]) -> GateResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GateError::Signature(e.to_string()))?;
    mac.update(body);
    Ok(mac)
}

/// Signature header value for `body`, as the hosting provider computes it.
pub fn sign(secret: &str, body: &[u8]) -> GateResult<String> {
    let mac = keyed(secret, body)?;
    Ok(format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Check `header` against the HMAC-SHA256 of `body`. Comparison is constant
/// time.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> GateResult<()> {
    let header = header.ok_or_else(|| GateError::Signature("missing signature".to_string()))?;
    let digest = header
        .strip_prefix(PREFIX)
        .ok_or_else(|| GateError::Signature(format!("expected {} prefix", PREFIX)))?;
    let expected = hex::decode(digest)
        .map_err(|e| GateError::Signature(format!("malformed digest: {}", e)))?;

    keyed(secret, body)?
        .verify_slice(&expected)
        .map_err(|_| GateError::Signature("digest mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let sig = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_accepts_own_signature() {
        let body = br#"{"action":"created"}"#;
        let header = sign("s3cret", body).unwrap();
        verify_signature("s3cret", body, Some(&header)).unwrap();
    }

    #[test]
    fn test_rejects_tampered_body_and_bad_headers() {
        let header = sign("s3cret", b"original").unwrap();
        assert!(verify_signature("s3cret", b"tampered", Some(&header)).is_err());
        assert!(verify_signature("other", b"original", Some(&header)).is_err());
        assert!(verify_signature("s3cret", b"original", None).is_err());
        assert!(verify_signature("s3cret", b"original", Some("sha1=abcd")).is_err());
        assert!(verify_signature("s3cret", b"original", Some("sha256=zz")).is_err());
    }
}
