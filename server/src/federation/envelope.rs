//! The signed-request envelope and the signature-primitive collaborator.
//! Sign/verify over PEM-encoded keys is an out-of-scope external
//! collaborator — this module defines the trait seam and ships a real
//! ES256-over-PEM implementation so the crate is self-contained and
//! testable without a caller having to supply one.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use serde::{Deserialize, Serialize};

/// Maximum accepted envelope body size.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

/// How far into the past a timestamp may be before it's considered stale.
pub const FRESHNESS_PAST: Duration = Duration::minutes(5);
/// How far into the future a timestamp may be before it's considered stale.
pub const FRESHNESS_FUTURE: Duration = Duration::minutes(1);

/// The wire shape of a federated request: `payload` is carried as an opaque
/// embedded JSON value so that signature verification is always over the
/// exact bytes as received. `Box<RawValue>` holds the original payload text
/// verbatim through deserialization instead of parsing it into a `Value` and
/// re-serializing it (which would silently reorder object keys and break a
/// sender's signature) — handlers must not re-serialize `payload` before
/// verifying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRequestEnvelope {
    pub sender_id: String,
    pub payload: Box<serde_json::value::RawValue>,
    pub signature: String,
    /// RFC3339 timestamp.
    pub timestamp: DateTime<Utc>,
}

impl SignedRequestEnvelope {
    /// The exact bytes the signature was computed over: `payload`'s raw wire
    /// text, untouched by any further parse/serialize round trip.
    pub fn signed_bytes(&self) -> &[u8] {
        self.payload.get().as_bytes()
    }

    /// `true` if `self.timestamp` falls within the freshness window relative to
    /// `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.timestamp >= now - FRESHNESS_PAST && self.timestamp <= now + FRESHNESS_FUTURE
    }
}

/// The out-of-scope signature-primitive collaborator: verifies a detached
/// signature over opaque payload bytes, and (for the Outbound Notifier, §4.9)
/// produces one. Handlers depend on this trait, not on `p256` directly, so an
/// operator can swap in a different scheme without touching the federation
/// logic.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `signature` (implementation-defined encoding, here base64) over
    /// `payload` using the PEM-encoded public key `public_key_pem`.
    fn verify(&self, public_key_pem: &str, payload: &[u8], signature: &str) -> bool;

    /// Sign `payload` with the PEM-encoded private key `private_key_pem`,
    /// returning the implementation-defined signature encoding.
    fn sign(&self, private_key_pem: &str, payload: &[u8]) -> Result<String, String>;
}

/// ES256 (ECDSA over P-256, SHA-256) signatures over PEM-encoded keys, with the
/// signature itself base64-encoded on the wire.
#[derive(Debug, Default, Clone, Copy)]
pub struct P256SignatureVerifier;

impl SignatureVerifier for P256SignatureVerifier {
    fn verify(&self, public_key_pem: &str, payload: &[u8], signature: &str) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_public_key_pem(public_key_pem) else {
            return false;
        };
        let Ok(sig_bytes) = base64::engine::general_purpose::STANDARD.decode(signature) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        verifying_key.verify(payload, &sig).is_ok()
    }

    fn sign(&self, private_key_pem: &str, payload: &[u8]) -> Result<String, String> {
        let signing_key = SigningKey::from_pkcs8_pem(private_key_pem)
            .map_err(|e| format!("invalid signing key: {e}"))?;
        let signature: Signature = signing_key.sign(payload);
        Ok(base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::EncodePrivateKey;
    use rand_core::OsRng;

    fn test_keypair() -> (String, String) {
        let signing_key = SigningKey::random(&mut OsRng);
        let private_pem = signing_key
            .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();
        let public_pem = signing_key
            .verifying_key()
            .to_public_key_pem(p256::pkcs8::LineEnding::LF)
            .unwrap();
        (private_pem, public_pem)
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let (private_pem, public_pem) = test_keypair();
        let verifier = P256SignatureVerifier;
        let payload = b"{\"hello\":\"world\"}";

        let signature = verifier.sign(&private_pem, payload).unwrap();
        assert!(verifier.verify(&public_pem, payload, &signature));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (private_pem, public_pem) = test_keypair();
        let verifier = P256SignatureVerifier;
        let signature = verifier.sign(&private_pem, b"original").unwrap();
        assert!(!verifier.verify(&public_pem, b"tampered", &signature));
    }

    #[test]
    fn garbage_signature_fails_verification() {
        let (_, public_pem) = test_keypair();
        let verifier = P256SignatureVerifier;
        assert!(!verifier.verify(&public_pem, b"payload", "not-base64!!"));
    }

    #[test]
    fn freshness_window() {
        let now = Utc::now();
        let fresh = SignedRequestEnvelope {
            sender_id: "a".into(),
            payload: serde_json::value::RawValue::from_string("{}".to_string()).unwrap(),
            signature: String::new(),
            timestamp: now,
        };
        assert!(fresh.is_fresh(now));

        let too_old = SignedRequestEnvelope {
            timestamp: now - Duration::minutes(6),
            ..fresh.clone()
        };
        assert!(!too_old.is_fresh(now));

        let too_future = SignedRequestEnvelope {
            timestamp: now + Duration::minutes(2),
            ..fresh
        };
        assert!(!too_future.is_fresh(now));
    }
}
