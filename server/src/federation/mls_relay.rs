//! The MLS Relay.
//!
//! Every operation here is gated by the same local-guild authorization check
//! first: `channelID` must belong to `guildID`, and the guild must be local
//! (`guilds.instance_id IS NULL`). The group-state epoch is kept current via
//! a non-fatal `GREATEST` upsert rather than a strict compare-and-swap: the
//! commit log is authoritative and a racing state update must not fail the
//! request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::errors::FederationError;
use crate::models::{MlsCommit, MlsGroupState, MlsKeyPackage};

const MAX_COMMIT_PAGE: i64 = 100;

/// The sole authorization gate for every MLS endpoint:
/// `channel_id` must belong to `guild_id`, and the guild must be local.
pub async fn authorize_local_guild_channel(
    pool: &PgPool,
    guild_id: &str,
    channel_id: &str,
) -> Result<(), FederationError> {
    let ok: bool = sqlx::query_scalar(
        "SELECT EXISTS( \
            SELECT 1 FROM channels c \
            JOIN guilds g ON g.id = c.guild_id \
            WHERE c.id = $1 AND c.guild_id = $2 AND g.instance_id IS NULL)",
    )
    .bind(channel_id)
    .bind(guild_id)
    .fetch_one(pool)
    .await?;

    if ok {
        Ok(())
    } else {
        Err(FederationError::NotLocalGuild)
    }
}

/// `GET .../key-packages/{userID}`. Empty list rather than 404.
pub async fn list_key_packages(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<MlsKeyPackage>, FederationError> {
    let rows = sqlx::query_as::<_, MlsKeyPackage>(
        "SELECT * FROM mls_key_packages WHERE user_id = $1 AND expires_at > NOW() \
         ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// `POST .../key-packages/{userID}/claim`: atomically select and delete the
/// oldest non-expired key package for fair rotation.
/// Two concurrent claimers must never observe the same row; `FOR UPDATE SKIP
/// LOCKED` inside the subselect is the atomicity primitive.
pub async fn claim_key_package(
    pool: &PgPool,
    user_id: &str,
) -> Result<MlsKeyPackage, FederationError> {
    let claimed = sqlx::query_as::<_, MlsKeyPackage>(
        "DELETE FROM mls_key_packages \
         WHERE id = ( \
             SELECT id FROM mls_key_packages \
             WHERE user_id = $1 AND expires_at > NOW() \
             ORDER BY created_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING *",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    claimed.ok_or_else(|| FederationError::NotFound("no key package available".into()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct WelcomeRequest {
    pub receiver_id: String,
    #[serde(with = "crate::util::base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WelcomeMeta {
    pub id: String,
    pub channel_id: String,
    pub receiver_id: String,
    pub created_at: DateTime<Utc>,
}

/// `POST .../welcome`. `receiver_id` must be a local user.
pub async fn store_welcome(
    pool: &PgPool,
    channel_id: &str,
    req: WelcomeRequest,
) -> Result<WelcomeMeta, FederationError> {
    let is_local: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND instance_id IS NULL)",
    )
    .bind(&req.receiver_id)
    .fetch_one(pool)
    .await?;

    if !is_local {
        return Err(FederationError::BadRequest(
            "welcome receiver must be a local user".into(),
        ));
    }

    let id = ulid::Ulid::new().to_string();

    let created_at: DateTime<Utc> = sqlx::query_scalar(
        "INSERT INTO mls_welcome_messages (id, channel_id, receiver_id, data, created_at) \
         VALUES ($1, $2, $3, $4, NOW()) RETURNING created_at",
    )
    .bind(&id)
    .bind(channel_id)
    .bind(&req.receiver_id)
    .bind(&req.data)
    .fetch_one(pool)
    .await?;

    Ok(WelcomeMeta {
        id,
        channel_id: channel_id.to_string(),
        receiver_id: req.receiver_id,
        created_at,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRequest {
    pub user_id: String,
    pub epoch: i64,
    #[serde(with = "crate::util::base64_bytes")]
    pub data: Vec<u8>,
}

/// `POST .../commits`. The asserted `user_id` must belong to `sender_id`'s
/// instance and be a guild member; the commit insert and the group-state
/// epoch upsert are separate statements by design — a failure in the latter
/// is logged, not propagated.
pub async fn publish_commit(
    pool: &PgPool,
    sender_id: &str,
    guild_id: &str,
    channel_id: &str,
    req: CommitRequest,
) -> Result<MlsCommit, FederationError> {
    let user_instance_id: Option<Option<String>> =
        sqlx::query_scalar("SELECT instance_id FROM users WHERE id = $1")
            .bind(&req.user_id)
            .fetch_optional(pool)
            .await?;

    let Some(user_instance_id) = user_instance_id.flatten() else {
        return Err(FederationError::InstanceMismatch {
            user_id: req.user_id.clone(),
        });
    };

    if !crate::identity::instance_ids_equivalent(&user_instance_id, sender_id) {
        return Err(FederationError::InstanceMismatch {
            user_id: req.user_id.clone(),
        });
    }

    let is_member: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM guild_members WHERE guild_id = $1 AND user_id = $2)",
    )
    .bind(guild_id)
    .bind(&req.user_id)
    .fetch_one(pool)
    .await?;

    if !is_member {
        return Err(FederationError::InstanceMismatch {
            user_id: req.user_id.clone(),
        });
    }

    let id = ulid::Ulid::new().to_string();

    let commit = sqlx::query_as::<_, MlsCommit>(
        "INSERT INTO mls_commits (id, channel_id, sender_id, epoch, data, created_at) \
         VALUES ($1, $2, $3, $4, $5, NOW()) RETURNING *",
    )
    .bind(&id)
    .bind(channel_id)
    .bind(&req.user_id)
    .bind(req.epoch)
    .bind(&req.data)
    .fetch_one(pool)
    .await?;

    if let Err(e) = sqlx::query(
        "INSERT INTO mls_group_states (channel_id, epoch, updated_at) \
         VALUES ($1, $2, NOW()) \
         ON CONFLICT (channel_id) DO UPDATE SET \
           epoch = GREATEST(mls_group_states.epoch, EXCLUDED.epoch), \
           updated_at = NOW()",
    )
    .bind(channel_id)
    .bind(req.epoch)
    .execute(pool)
    .await
    {
        tracing::warn!(channel_id, epoch = req.epoch, error = %e, "group-state epoch upsert failed (non-fatal)");
    }

    Ok(commit)
}

/// `GET .../group-state`. 404 if absent.
pub async fn read_group_state(
    pool: &PgPool,
    channel_id: &str,
) -> Result<MlsGroupState, FederationError> {
    sqlx::query_as::<_, MlsGroupState>("SELECT * FROM mls_group_states WHERE channel_id = $1")
        .bind(channel_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| FederationError::NotFound("no group state for channel".into()))
}

/// `GET .../commits?since_epoch=N`. Malformed `since_epoch` query values are
/// the handler's responsibility to normalize to 0 before calling this.
pub async fn list_commits_since(
    pool: &PgPool,
    channel_id: &str,
    since_epoch: i64,
) -> Result<Vec<MlsCommit>, FederationError> {
    let rows = sqlx::query_as::<_, MlsCommit>(
        "SELECT * FROM mls_commits WHERE channel_id = $1 AND epoch >= $2 \
         ORDER BY epoch ASC, created_at ASC LIMIT $3",
    )
    .bind(channel_id)
    .bind(since_epoch)
    .bind(MAX_COMMIT_PAGE)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Parse a `since_epoch` query parameter: must be a
/// non-negative integer; anything else (missing, negative, non-numeric) is
/// treated as 0.
pub fn parse_since_epoch(raw: Option<&str>) -> i64 {
    raw.and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v >= 0)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_epoch_defaults_and_rejects_negative() {
        assert_eq!(parse_since_epoch(None), 0);
        assert_eq!(parse_since_epoch(Some("garbage")), 0);
        assert_eq!(parse_since_epoch(Some("-5")), 0);
        assert_eq!(parse_since_epoch(Some("42")), 42);
    }
}
