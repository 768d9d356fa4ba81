//! The Peer-Policy Engine: `IsFederationAllowed(sender_id)`, fronted by a TTL
//! cache and backed by the `federation_peers` table.
//!
//! Trust-score bookkeeping (`trust_score`/`invalid_token_count`/
//! `rejected_request_count`/`successful_request_count`) tracks
//! `FederationPeer.status ∈ {active, pending, blocked}`.

use std::time::Duration;

use sqlx::PgPool;

use super::errors::FederationError;
use crate::identity::canonical_instance_id;
use crate::ttl_cache::TtlCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Active,
    Pending,
    Blocked,
}

impl PeerStatus {
    fn from_db_str(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "blocked" => Self::Blocked,
            _ => Self::Pending,
        }
    }

    pub fn as_db_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Blocked => "blocked",
        }
    }
}

/// The policy engine: one TTL cache shared across requests, keyed on the
/// canonicalized sender id and holding the allow/deny boolean.
pub struct PeerPolicyEngine {
    cache: TtlCache<String, bool>,
}

impl PeerPolicyEngine {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: TtlCache::new(capacity, ttl),
        }
    }

    /// `IsFederationAllowed(sender_id)`. Consults the cache first; on miss,
    /// evaluates the `federation_peers` row (only `active` peers are allowed)
    /// and caches the result.
    pub async fn is_federation_allowed(
        &self,
        pool: &PgPool,
        sender_id: &str,
    ) -> Result<bool, FederationError> {
        let key = canonical_instance_id(sender_id).to_string();

        if let Some(allowed) = self.cache.get(&key) {
            return Ok(allowed);
        }

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM federation_peers WHERE peer_id = $1")
                .bind(&key)
                .fetch_optional(pool)
                .await?;

        let allowed = matches!(
            status.map(|s| PeerStatus::from_db_str(&s)),
            Some(PeerStatus::Active)
        );

        self.cache.set(key, allowed);
        Ok(allowed)
    }

    /// Invalidate the cached decision for `sender_id`. Call this whenever a
    /// peer's status row changes.
    pub fn invalidate(&self, sender_id: &str) {
        self.cache.invalidate(&canonical_instance_id(sender_id).to_string());
    }
}

pub async fn record_success(pool: &PgPool, instance_id: &str, peer_id: &str) {
    let peer_id = canonical_instance_id(peer_id);
    let _ = sqlx::query(
        "INSERT INTO federation_peers \
            (instance_id, peer_id, status, successful_request_count, trust_score, last_seen_at, updated_at) \
         VALUES ($1, $2, 'pending', 1, 1, NOW(), NOW()) \
         ON CONFLICT (peer_id) DO UPDATE SET \
           successful_request_count = federation_peers.successful_request_count + 1, \
           trust_score = LEAST(federation_peers.trust_score + 1, 1000), \
           last_seen_at = NOW(), \
           updated_at = NOW()",
    )
    .bind(instance_id)
    .bind(peer_id)
    .execute(pool)
    .await;
}

pub async fn record_rejected(pool: &PgPool, instance_id: &str, peer_id: &str) {
    let peer_id = canonical_instance_id(peer_id);
    let _ = sqlx::query(
        "INSERT INTO federation_peers \
            (instance_id, peer_id, status, rejected_request_count, trust_score, last_seen_at, updated_at) \
         VALUES ($1, $2, 'pending', 1, -5, NOW(), NOW()) \
         ON CONFLICT (peer_id) DO UPDATE SET \
           rejected_request_count = federation_peers.rejected_request_count + 1, \
           trust_score = GREATEST(federation_peers.trust_score - 5, -1000), \
           last_seen_at = NOW(), \
           updated_at = NOW()",
    )
    .bind(instance_id)
    .bind(peer_id)
    .execute(pool)
    .await;
}

pub async fn record_invalid_token(pool: &PgPool, instance_id: &str, peer_id: &str) {
    let peer_id = canonical_instance_id(peer_id);
    let _ = sqlx::query(
        "INSERT INTO federation_peers \
            (instance_id, peer_id, status, invalid_token_count, trust_score, last_seen_at, updated_at) \
         VALUES ($1, $2, 'pending', 1, -10, NOW(), NOW()) \
         ON CONFLICT (peer_id) DO UPDATE SET \
           invalid_token_count = federation_peers.invalid_token_count + 1, \
           trust_score = GREATEST(federation_peers.trust_score - 10, -1000), \
           last_seen_at = NOW(), \
           updated_at = NOW()",
    )
    .bind(instance_id)
    .bind(peer_id)
    .execute(pool)
    .await;
}

/// Upsert a peer's policy status and invalidate the cached decision for it,
/// so the next `is_federation_allowed` call re-reads the new row instead of
/// serving a stale cached verdict.
pub async fn upsert_peer_status(
    pool: &PgPool,
    engine: &PeerPolicyEngine,
    instance_id: &str,
    peer_id: &str,
    status: PeerStatus,
) -> Result<(), FederationError> {
    let peer_id = canonical_instance_id(peer_id);
    sqlx::query(
        "INSERT INTO federation_peers (instance_id, peer_id, status, updated_at, last_seen_at) \
         VALUES ($1, $2, $3, NOW(), NOW()) \
         ON CONFLICT (peer_id) DO UPDATE SET \
           status = EXCLUDED.status, \
           updated_at = NOW()",
    )
    .bind(instance_id)
    .bind(peer_id)
    .bind(status.as_db_str())
    .execute(pool)
    .await?;
    engine.invalidate(peer_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_string() {
        assert_eq!(PeerStatus::from_db_str("active"), PeerStatus::Active);
        assert_eq!(PeerStatus::from_db_str("blocked"), PeerStatus::Blocked);
        assert_eq!(PeerStatus::from_db_str("pending"), PeerStatus::Pending);
        assert_eq!(PeerStatus::from_db_str("garbage"), PeerStatus::Pending);
        assert_eq!(PeerStatus::Active.as_db_str(), "active");
    }
}
