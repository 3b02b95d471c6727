use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing timestamp in signature header")]
    MissingTimestamp,
    #[error("missing v1 signature in signature header")]
    MissingSignature,
    #[error("signature timestamp is outside the tolerance window")]
    StaleTimestamp,
    #[error("no signature matched the payload")]
    Mismatch,
}

/// Verifies `Stripe-Signature` headers (`t=<unix>,v1=<hex>[,v1=<hex>...]`).
///
/// The MAC is computed over `<t>.` followed by the raw request bytes exactly as
/// received; the body must not be parsed or re-serialized first.
pub struct WebhookSignatureVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl std::fmt::Debug for WebhookSignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookSignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: &str,
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            let part = part.trim();
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest);
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signatures.push(rest);
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
        let signed_at: i64 = timestamp
            .parse()
            .map_err(|_| SignatureError::MissingTimestamp)?;
        if signatures.is_empty() {
            return Err(SignatureError::MissingSignature);
        }
        if now_unix.abs_diff(signed_at) > self.tolerance_secs.unsigned_abs() {
            return Err(SignatureError::StaleTimestamp);
        }

        // Any v1 may match: the provider signs with every active secret during rotation.
        let matched = signatures.iter().any(|candidate| {
            let Ok(provided) = hex::decode(candidate) else {
                return false;
            };
            let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
                return false;
            };
            mac.update(timestamp.as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.verify_slice(&provided).is_ok()
        });

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Produces a header value the verifier accepts. Used by local tooling and tests
    /// to replay captured payloads.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }
}
