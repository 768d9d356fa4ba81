//! The DM Mirror Manager: transactional DM-channel creation and idempotent
//! message delivery between instances.

use serde::Deserialize;
use serde_json::Value;
use sqlx::PgPool;

use super::errors::FederationError;
use super::event_bus::{EventBus, FederationEvent};
use super::user_stub::{ensure_remote_user_stub, RemoteUserInfo};

/// A participant profile carried in a `dm/create` payload. `instance_domain`
/// is `None` for a participant the sender asserts is local to us (no stub is
/// created or overwritten for those).
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantProfile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_id: Option<String>,
    pub instance_domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmCreateRequest {
    pub channel_id: String,
    pub channel_type: String,
    pub creator: String,
    pub recipient_ids: Vec<String>,
    pub recipients: Vec<ParticipantProfile>,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FederatedMessage {
    pub id: String,
    pub author_id: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Option<Value>,
    #[serde(default)]
    pub embeds: Option<Value>,
}

/// `dm/create`. Returns the newly-minted local channel id.
pub async fn create_dm(
    pool: &PgPool,
    event_bus: &dyn EventBus,
    sender_id: &str,
    req: DmCreateRequest,
) -> Result<String, FederationError> {
    let has_local_recipient: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ANY($1) AND instance_id IS NULL)",
    )
    .bind(&req.recipient_ids)
    .fetch_one(pool)
    .await?;

    if !has_local_recipient {
        return Err(FederationError::BadRequest(
            "dm/create requires at least one local recipient".into(),
        ));
    }

    for profile in &req.recipients {
        let Some(domain) = &profile.instance_domain else {
            continue; // asserted local — never overwritten here.
        };
        let instance_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM instances WHERE domain = $1")
                .bind(domain)
                .fetch_optional(pool)
                .await?;
        let Some(instance_id) = instance_id else {
            return Err(FederationError::BadRequest(format!(
                "unknown instance domain: {domain}"
            )));
        };
        ensure_remote_user_stub(
            pool,
            &instance_id,
            &RemoteUserInfo {
                id: &profile.id,
                username: &profile.username,
                display_name: profile.display_name.as_deref(),
                avatar_id: profile.avatar_id.as_deref(),
            },
        )
        .await?;
    }

    let local_channel_id = ulid::Ulid::new().to_string();

    // DM channels have no owner; only group channels do.
    let owner_id = if req.channel_type == "dm" {
        None
    } else {
        Some(req.creator.as_str())
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO channels (id, channel_type, name, owner_id, created_at) \
         VALUES ($1, $2, $3, $4, NOW())",
    )
    .bind(&local_channel_id)
    .bind(&req.channel_type)
    .bind(&req.group_name)
    .bind(owner_id)
    .execute(&mut *tx)
    .await?;

    let mut members: Vec<&str> = req.recipient_ids.iter().map(String::as_str).collect();
    members.push(req.creator.as_str());
    members.sort_unstable();
    members.dedup();

    for member_id in members {
        sqlx::query(
            "INSERT INTO channel_recipients (channel_id, user_id, joined_at) \
             VALUES ($1, $2, NOW()) ON CONFLICT (channel_id, user_id) DO NOTHING",
        )
        .bind(&local_channel_id)
        .bind(member_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO federation_channel_mirrors \
            (local_channel_id, remote_channel_id, remote_instance_id, created_at) \
         VALUES ($1, $2, $3, NOW()) \
         ON CONFLICT (remote_channel_id, remote_instance_id) DO NOTHING",
    )
    .bind(&local_channel_id)
    .bind(&req.channel_id)
    .bind(sender_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO federation_channel_peers (channel_id, instance_id) \
         VALUES ($1, $2) ON CONFLICT (channel_id, instance_id) DO NOTHING",
    )
    .bind(&local_channel_id)
    .bind(sender_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    event_bus
        .publish(FederationEvent::ChannelCreate {
            channel_id: local_channel_id.clone(),
        })
        .await;

    Ok(local_channel_id)
}

/// Outcome of a `dm/message` delivery, used by the handler to pick the right
/// (always-success) status code without re-deriving delivery state.
pub enum MessageOutcome {
    /// A new row was inserted; the caller should publish `MESSAGE_CREATE`.
    Delivered,
    /// The message id already existed (replay); no publish.
    AlreadyDelivered,
}

/// `dm/message`. Resolves the local channel via the mirror
/// mapping, then idempotently stores the message.
pub async fn deliver_message(
    pool: &PgPool,
    event_bus: &dyn EventBus,
    remote_channel_id: &str,
    remote_instance_id: &str,
    message: FederatedMessage,
) -> Result<MessageOutcome, FederationError> {
    let local_channel_id: Option<String> = sqlx::query_scalar(
        "SELECT local_channel_id FROM federation_channel_mirrors \
         WHERE remote_channel_id = $1 AND remote_instance_id = $2",
    )
    .bind(remote_channel_id)
    .bind(remote_instance_id)
    .fetch_optional(pool)
    .await?;

    let Some(local_channel_id) = local_channel_id else {
        return Err(FederationError::NotFound("channel not mirrored locally".into()));
    };

    let inserted: Option<String> = sqlx::query_scalar(
        "INSERT INTO messages (id, channel_id, author_id, content, attachments, embeds, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, NOW()) \
         ON CONFLICT (id) DO NOTHING \
         RETURNING id",
    )
    .bind(&message.id)
    .bind(&local_channel_id)
    .bind(&message.author_id)
    .bind(&message.content)
    .bind(&message.attachments)
    .bind(&message.embeds)
    .fetch_optional(pool)
    .await?;

    if inserted.is_none() {
        return Ok(MessageOutcome::AlreadyDelivered);
    }

    if let Err(e) = sqlx::query("UPDATE channels SET last_message_id = $1 WHERE id = $2")
        .bind(&message.id)
        .bind(&local_channel_id)
        .execute(pool)
        .await
    {
        tracing::warn!(channel_id = local_channel_id, error = %e, "failed to update last_message_id (non-fatal)");
    }

    let message_json = serde_json::json!({
        "id": message.id,
        "author_id": message.author_id,
        "content": message.content,
        "attachments": message.attachments,
        "embeds": message.embeds,
    });
    event_bus
        .publish(FederationEvent::MessageCreate {
            channel_id: local_channel_id,
            message: message_json,
        })
        .await;

    Ok(MessageOutcome::Delivered)
}

/// `dm/recipient-add`.
pub async fn add_recipient(
    pool: &PgPool,
    remote_channel_id: &str,
    remote_instance_id: &str,
    profile: ParticipantProfile,
) -> Result<(), FederationError> {
    let local_channel_id = resolve_local_channel(pool, remote_channel_id, remote_instance_id).await?;

    if let Some(domain) = &profile.instance_domain {
        let instance_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM instances WHERE domain = $1")
                .bind(domain)
                .fetch_optional(pool)
                .await?;
        if let Some(instance_id) = instance_id {
            ensure_remote_user_stub(
                pool,
                &instance_id,
                &RemoteUserInfo {
                    id: &profile.id,
                    username: &profile.username,
                    display_name: profile.display_name.as_deref(),
                    avatar_id: profile.avatar_id.as_deref(),
                },
            )
            .await?;
        }
    }

    sqlx::query(
        "INSERT INTO channel_recipients (channel_id, user_id, joined_at) \
         VALUES ($1, $2, NOW()) ON CONFLICT (channel_id, user_id) DO NOTHING",
    )
    .bind(&local_channel_id)
    .bind(&profile.id)
    .execute(pool)
    .await?;

    Ok(())
}

/// `dm/recipient-remove`.
pub async fn remove_recipient(
    pool: &PgPool,
    remote_channel_id: &str,
    remote_instance_id: &str,
    user_id: &str,
) -> Result<(), FederationError> {
    let local_channel_id = resolve_local_channel(pool, remote_channel_id, remote_instance_id).await?;

    sqlx::query("DELETE FROM channel_recipients WHERE channel_id = $1 AND user_id = $2")
        .bind(&local_channel_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

async fn resolve_local_channel(
    pool: &PgPool,
    remote_channel_id: &str,
    remote_instance_id: &str,
) -> Result<String, FederationError> {
    sqlx::query_scalar(
        "SELECT local_channel_id FROM federation_channel_mirrors \
         WHERE remote_channel_id = $1 AND remote_instance_id = $2",
    )
    .bind(remote_channel_id)
    .bind(remote_instance_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| FederationError::NotFound("channel not mirrored locally".into()))
}
