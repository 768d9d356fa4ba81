//! The Outbound Notifier: `NotifyFederatedDM`. A configured `reqwest::Client`
//! shared across outbound calls, a `classify_reqwest_error` helper, and an
//! `is_retryable` taxonomy for the caller to act on.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, warn};

use super::envelope::SignatureVerifier;
use crate::identity::canonical_instance_id;

const USER_AGENT: &str = "AmityVox/1.0 (+federation)";
const MAX_ERROR_BODY: usize = 1024;

pub struct OutboundClient {
    http: Client,
}

impl OutboundClient {
    pub fn new(connect_timeout_secs: u64, request_timeout_secs: u64) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(request_timeout_secs))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client");

        Self { http }
    }

    /// The underlying configured client, reused by the invite-resolve proxy
    /// so every outbound call shares one connection pool.
    pub fn client(&self) -> &Client {
        &self.http
    }
}

#[derive(Debug, Serialize)]
struct ParticipantProfileOut<'a> {
    id: &'a str,
    username: &'a str,
    display_name: Option<&'a str>,
    avatar_id: Option<&'a str>,
    instance_domain: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DmCreateBody<'a> {
    channel_id: &'a str,
    channel_type: &'a str,
    creator: &'a str,
    recipient_ids: Vec<&'a str>,
    recipients: Vec<ParticipantProfileOut<'a>>,
    group_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct EnvelopeOut<'a> {
    sender_id: &'a str,
    payload: serde_json::Value,
    signature: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct DmCreateResponse {
    channel_id: String,
}

/// `NotifyFederatedDM(remote_domain, local_channel_id, channel_type,
/// creator_id, recipient_ids, group_name?)`.
pub async fn notify_federated_dm(
    pool: &PgPool,
    outbound: &OutboundClient,
    signature_verifier: &dyn SignatureVerifier,
    self_instance_id: &str,
    signing_key_pem: &str,
    remote_domain: &str,
    local_channel_id: &str,
    channel_type: &str,
    creator_id: &str,
    recipient_ids: &[String],
    group_name: Option<&str>,
) -> Result<(), OutboundError> {
    validate_remote_domain(remote_domain).await?;

    let mut all_ids: Vec<&str> = recipient_ids.iter().map(String::as_str).collect();
    all_ids.push(creator_id);
    all_ids.sort_unstable();
    all_ids.dedup();

    let profiles = load_participant_profiles(pool, &all_ids)
        .await
        .map_err(|e| OutboundError::RequestFailed {
            endpoint: remote_domain.to_string(),
            reason: format!("failed to load local participant profiles: {e}"),
        })?;

    let recipients_out: Vec<ParticipantProfileOut> = profiles
        .iter()
        .filter(|p| p.id != creator_id)
        .map(|p| ParticipantProfileOut {
            id: &p.id,
            username: &p.username,
            display_name: p.display_name.as_deref(),
            avatar_id: p.avatar_id.as_deref(),
            instance_domain: p.instance_domain.as_deref(),
        })
        .collect();

    let body = DmCreateBody {
        channel_id: local_channel_id,
        channel_type,
        creator: creator_id,
        recipient_ids: recipient_ids.iter().map(String::as_str).collect(),
        recipients: recipients_out,
        group_name,
    };

    let payload = serde_json::to_value(&body).map_err(|e| OutboundError::RequestFailed {
        endpoint: remote_domain.to_string(),
        reason: format!("failed to serialize dm/create body: {e}"),
    })?;
    let payload_bytes = serde_json::to_vec(&payload).unwrap_or_default();

    let signature = signature_verifier
        .sign(signing_key_pem, &payload_bytes)
        .map_err(|e| OutboundError::RequestFailed {
            endpoint: remote_domain.to_string(),
            reason: format!("failed to sign outbound envelope: {e}"),
        })?;

    let envelope = EnvelopeOut {
        sender_id: self_instance_id,
        payload,
        signature,
        timestamp: chrono::Utc::now(),
    };

    let url = format!("https://{remote_domain}/federation/v1/dm/create");
    debug!(url = %url, "notifying remote instance of federated DM creation");

    let response = outbound
        .http
        .post(&url)
        .header("Content-Type", "application/json")
        .json(&envelope)
        .send()
        .await
        .map_err(|e| classify_reqwest_error(e, remote_domain, "dm/create"))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(OutboundError::RemoteError {
            status: status.as_u16(),
            body: body_text.chars().take(MAX_ERROR_BODY).collect(),
            endpoint: remote_domain.to_string(),
            method: "dm/create".to_string(),
        });
    }

    let parsed: DmCreateResponse = response
        .json()
        .await
        .map_err(|e| OutboundError::InvalidResponse { reason: e.to_string() })?;

    if let Err(e) = store_mirror_mapping(
        pool,
        local_channel_id,
        &parsed.channel_id,
        canonical_instance_id(&format!("https://{remote_domain}")),
    )
    .await
    {
        warn!(
            local_channel_id,
            remote_channel_id = parsed.channel_id,
            error = %e,
            "failed to persist mirror mapping after successful remote dm/create (non-fatal)"
        );
    }

    Ok(())
}

struct LocalParticipant {
    id: String,
    username: String,
    display_name: Option<String>,
    avatar_id: Option<String>,
    instance_domain: Option<String>,
}

async fn load_participant_profiles(
    pool: &PgPool,
    ids: &[&str],
) -> Result<Vec<LocalParticipant>, sqlx::Error> {
    let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
        "SELECT u.id, u.username, u.display_name, u.avatar_id, i.domain \
         FROM users u LEFT JOIN instances i ON i.id = u.instance_id \
         WHERE u.id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(id, username, display_name, avatar_id, instance_domain)| LocalParticipant {
                id,
                username,
                display_name,
                avatar_id,
                instance_domain,
            },
        )
        .collect())
}

async fn store_mirror_mapping(
    pool: &PgPool,
    local_channel_id: &str,
    remote_channel_id: &str,
    remote_instance_id: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO federation_channel_mirrors \
            (local_channel_id, remote_channel_id, remote_instance_id, created_at) \
         VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (remote_channel_id, remote_instance_id) DO NOTHING",
    )
    .bind(local_channel_id)
    .bind(remote_channel_id)
    .bind(remote_instance_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO federation_channel_peers (channel_id, instance_id) \
         VALUES ($1, $2) ON CONFLICT (channel_id, instance_id) DO NOTHING",
    )
    .bind(local_channel_id)
    .bind(remote_instance_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}

/// Reject loopback/private-range and malformed domains before ever issuing an
/// outbound request.
async fn validate_remote_domain(remote_domain: &str) -> Result<(), OutboundError> {
    if remote_domain.is_empty() || remote_domain.contains('/') || remote_domain.contains(char::is_whitespace) {
        return Err(OutboundError::InvalidDomain {
            domain: remote_domain.to_string(),
        });
    }

    if let Ok(addr) = remote_domain.parse::<IpAddr>() {
        if is_disallowed_address(addr) {
            return Err(OutboundError::InvalidDomain {
                domain: remote_domain.to_string(),
            });
        }
        return Ok(());
    }

    let lookup_target = format!("{remote_domain}:443");
    match tokio::net::lookup_host(lookup_target).await {
        Ok(addrs) => {
            if addrs.map(|a| a.ip()).all(is_disallowed_address) {
                return Err(OutboundError::InvalidDomain {
                    domain: remote_domain.to_string(),
                });
            }
            Ok(())
        }
        Err(_) => Err(OutboundError::InvalidDomain {
            domain: remote_domain.to_string(),
        }),
    }
}

fn is_disallowed_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

fn classify_reqwest_error(e: reqwest::Error, endpoint: &str, method: &str) -> OutboundError {
    if e.is_timeout() {
        OutboundError::Timeout {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    } else if e.is_connect() {
        OutboundError::ConnectionFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
    } else {
        OutboundError::RequestFailed {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("remote domain {domain} is malformed or not externally routable")]
    InvalidDomain { domain: String },

    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("request to {endpoint} {method} timed out")]
    Timeout { endpoint: String, method: String },

    #[error("request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("remote instance {endpoint} returned {status}: {body}")]
    RemoteError {
        status: u16,
        body: String,
        endpoint: String,
        method: String,
    },

    #[error("invalid response from remote instance: {reason}")]
    InvalidResponse { reason: String },
}

impl OutboundError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::RequestFailed { .. } => true,
            Self::RemoteError { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidDomain { .. } | Self::InvalidResponse { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_is_retryable() {
        assert!(OutboundError::ConnectionFailed {
            endpoint: "https://example.com".into(),
            reason: "connection refused".into(),
        }
        .is_retryable());
    }

    #[test]
    fn invalid_domain_is_not_retryable() {
        assert!(!OutboundError::InvalidDomain {
            domain: "127.0.0.1".into(),
        }
        .is_retryable());
    }

    #[test]
    fn remote_5xx_and_429_retryable() {
        for status in [500, 502, 503, 504, 429] {
            assert!(OutboundError::RemoteError {
                status,
                body: String::new(),
                endpoint: "x".into(),
                method: "dm/create".into(),
            }
            .is_retryable());
        }
    }

    #[test]
    fn remote_4xx_not_retryable() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!OutboundError::RemoteError {
                status,
                body: String::new(),
                endpoint: "x".into(),
                method: "dm/create".into(),
            }
            .is_retryable());
        }
    }

    #[tokio::test]
    async fn loopback_domain_rejected() {
        assert!(matches!(
            validate_remote_domain("127.0.0.1").await,
            Err(OutboundError::InvalidDomain { .. })
        ));
    }

    #[tokio::test]
    async fn domain_with_slash_rejected() {
        assert!(matches!(
            validate_remote_domain("example.com/path").await,
            Err(OutboundError::InvalidDomain { .. })
        ));
    }

    #[test]
    fn outbound_client_construction_does_not_panic() {
        let client = OutboundClient::new(5, 30);
        let _ = client;
    }
}
