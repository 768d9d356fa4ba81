//! The Request Verifier: the gatekeeper pipeline every signed federation
//! request passes through before a handler sees it. Auth/policy gate first,
//! structured rejection logging, short-circuit on first failure.

use std::net::IpAddr;

use sqlx::PgPool;
use tracing::{debug, warn};

use super::envelope::{SignedRequestEnvelope, SignatureVerifier, MAX_ENVELOPE_BYTES};
use super::errors::FederationError;
use super::peer_policy::{self, PeerPolicyEngine};
use crate::identity::canonical_instance_id;

/// Everything the verifier needs beyond the request body itself.
pub struct VerifierContext<'a> {
    pub pool: &'a PgPool,
    pub signature_verifier: &'a dyn SignatureVerifier,
    pub peer_policy: &'a PeerPolicyEngine,
    pub enforce_source_ip: bool,
    pub self_instance_id: &'a str,
}

/// Run the full verification pipeline over a raw request body, returning the
/// parsed envelope and the verified `sender_id` on success. Every step that
/// rejects logs `sender_id` (where known), `remote_addr`, and `path`.
pub async fn verify_request(
    ctx: &VerifierContext<'_>,
    body: &[u8],
    remote_addr: Option<IpAddr>,
    path: &str,
) -> Result<(SignedRequestEnvelope, String), FederationError> {
    if body.len() > MAX_ENVELOPE_BYTES {
        warn!(remote_addr = ?remote_addr, path, "rejected: envelope exceeds size limit");
        return Err(FederationError::BadRequest("envelope too large".into()));
    }

    let envelope: SignedRequestEnvelope = serde_json::from_slice(body).map_err(|e| {
        warn!(remote_addr = ?remote_addr, path, error = %e, "rejected: envelope parse failure");
        FederationError::BadRequest(format!("invalid envelope: {e}"))
    })?;

    let sender_id = canonical_instance_id(&envelope.sender_id).to_string();

    let public_key: Option<String> =
        sqlx::query_scalar("SELECT public_key FROM instances WHERE id = $1")
            .bind(&sender_id)
            .fetch_optional(ctx.pool)
            .await?;

    let Some(public_key) = public_key else {
        warn!(sender_id, remote_addr = ?remote_addr, path, "rejected: unknown sender");
        return Err(FederationError::UnknownSender);
    };

    if !ctx
        .signature_verifier
        .verify(&public_key, envelope.signed_bytes(), &envelope.signature)
    {
        warn!(sender_id, remote_addr = ?remote_addr, path, "rejected: invalid signature");
        peer_policy::record_invalid_token(ctx.pool, ctx.self_instance_id, &sender_id).await;
        return Err(FederationError::InvalidSignature);
    }

    if !envelope.is_fresh(chrono::Utc::now()) {
        warn!(sender_id, remote_addr = ?remote_addr, path, "rejected: stale timestamp");
        return Err(FederationError::StaleTimestamp);
    }

    if ctx.enforce_source_ip {
        if let Some(addr) = remote_addr {
            if !source_matches_sender(&sender_id, addr).await {
                warn!(sender_id, remote_addr = ?remote_addr, path, "rejected: source address mismatch");
                return Err(FederationError::SourceAddressMismatch);
            }
        }
    } else if let Some(addr) = remote_addr {
        if !source_matches_sender(&sender_id, addr).await {
            debug!(sender_id, remote_addr = ?addr, path, "source address mismatch (enforcement disabled)");
        }
    }

    if !ctx.peer_policy.is_federation_allowed(ctx.pool, &sender_id).await? {
        warn!(sender_id, remote_addr = ?remote_addr, path, "rejected: peer policy denied");
        peer_policy::record_rejected(ctx.pool, ctx.self_instance_id, &sender_id).await;
        return Err(FederationError::PeerPolicyDenied);
    }

    debug!(sender_id, path, "verified");
    peer_policy::record_success(ctx.pool, ctx.self_instance_id, &sender_id).await;
    Ok((envelope, sender_id))
}

/// Resolve `sender_id` (a `https://host` instance identifier) to its address
/// set via DNS and check `addr` against it. Resolution failure is treated as
/// a mismatch — fail closed.
async fn source_matches_sender(sender_id: &str, addr: IpAddr) -> bool {
    let Some(host) = sender_id
        .strip_prefix("https://")
        .or_else(|| sender_id.strip_prefix("http://"))
    else {
        return false;
    };
    let lookup_target = format!("{host}:0");
    match tokio::net::lookup_host(lookup_target).await {
        Ok(addrs) => addrs.map(|a| a.ip()).any(|ip| ip == addr),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unparseable_sender_never_matches() {
        assert!(!source_matches_sender("not-a-url", "127.0.0.1".parse().unwrap()).await);
    }
}
