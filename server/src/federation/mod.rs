pub mod discovery;
pub mod dm_mirror;
pub mod envelope;
pub mod errors;
pub mod event_bus;
pub mod invites;
pub mod local_auth;
pub mod mls_relay;
pub mod outbound;
pub mod peer_policy;
pub mod user_stub;
pub mod verifier;

pub use envelope::{P256SignatureVerifier, SignatureVerifier, SignedRequestEnvelope};
pub use errors::FederationError;

/// Tunables for the federation core. Every value is an environment variable
/// with a documented default, loaded once at startup.
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// This instance's own identifier, used as `sender_id` on outbound requests.
    pub self_instance_id: String,
    /// PEM-encoded ES256 private key used to sign outbound requests.
    pub signing_key_pem: Option<String>,
    /// Whether the verifier enforces that the connecting peer address resolves
    /// to the sender's known address set. When off, mismatches are logged but
    /// do not reject the request.
    pub enforce_source_ip: bool,
    /// Peer-policy allow-result cache TTL, in seconds.
    pub peer_policy_cache_ttl_secs: u64,
    /// Peer-policy cache capacity.
    pub peer_policy_cache_capacity: usize,
    pub outbound_timeout_secs: u64,
    pub outbound_connect_timeout_secs: u64,
}

impl FederationConfig {
    pub fn from_env() -> Self {
        Self {
            self_instance_id: std::env::var("SELF_INSTANCE_ID")
                .unwrap_or_else(|_| "https://localhost".to_string()),
            signing_key_pem: std::env::var("SIGNING_KEY_PEM").ok(),
            enforce_source_ip: std::env::var("ENFORCE_SOURCE_IP")
                .map(|v| v == "true")
                .unwrap_or(false),
            peer_policy_cache_ttl_secs: std::env::var("PEER_POLICY_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            peer_policy_cache_capacity: std::env::var("PEER_POLICY_CACHE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2048),
            outbound_timeout_secs: std::env::var("OUTBOUND_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            outbound_connect_timeout_secs: std::env::var("OUTBOUND_CONNECT_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}
