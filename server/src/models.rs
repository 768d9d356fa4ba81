//! Database row types for the federation data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A known peer instance: domain plus the public key used to verify its signed
/// requests. `domain` is unique; there is exactly one row per known peer.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub domain: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

/// A local or remote (stub) user. `instance_id` is `NULL` for local users and is
/// immutable once a row is created.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub instance_id: Option<String>,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_id: Option<String>,
    pub status_presence: String,
    pub created_at: DateTime<Utc>,
}

/// A channel: DM, group DM, or a guild-kind channel. DM channels carry no
/// `name`/`owner_id`; group channels require both.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub channel_type: String,
    pub name: Option<String>,
    pub owner_id: Option<String>,
    pub guild_id: Option<String>,
    pub last_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Membership row for a channel. Primary key is `(channel_id, user_id)`; inserts
/// are idempotent via `ON CONFLICT DO NOTHING`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelRecipient {
    pub channel_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

/// A message. `id` is a globally unique ULID and immutable; duplicate inserts by
/// `id` are no-ops.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub attachments: Option<serde_json::Value>,
    pub embeds: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Maps a remote channel (as known to `remote_instance_id`) onto a local mirror
/// channel. Exactly one row per `(remote_channel_id, remote_instance_id)`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FederationChannelMirror {
    pub local_channel_id: String,
    pub remote_channel_id: String,
    pub remote_instance_id: String,
    pub created_at: DateTime<Utc>,
}

/// An instance that must receive federation events for a given channel.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FederationChannelPeer {
    pub channel_id: String,
    pub instance_id: String,
}

/// A peer instance's federation policy status and trust bookkeeping. Policy
/// queries consider only `active` peers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FederationPeer {
    pub instance_id: String,
    pub peer_id: String,
    pub status: String,
    pub trust_score: i32,
    pub invalid_token_count: i64,
    pub rejected_request_count: i64,
    pub successful_request_count: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A guild invite code. Valid iff not expired and (`max_uses` = 0 or
/// `uses` < `max_uses`).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Invite {
    pub code: String,
    pub guild_id: String,
    pub max_uses: i32,
    pub uses: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Utc::now() >= at).unwrap_or(false)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses != 0 && self.uses >= self.max_uses
    }
}

/// A ban preventing a user from rejoining a guild via invite.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GuildBan {
    pub guild_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// An MLS key package: single-use, consumed by deleting the row on claim.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MlsKeyPackage {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    #[serde(with = "crate::util::base64_bytes")]
    pub data: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl MlsKeyPackage {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// An MLS welcome message delivered to a newly-added local member.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MlsWelcome {
    pub id: String,
    pub channel_id: String,
    pub receiver_id: String,
    #[serde(with = "crate::util::base64_bytes")]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// An append-only MLS commit log entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MlsCommit {
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub epoch: i64,
    #[serde(with = "crate::util::base64_bytes")]
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// The current MLS group epoch for a channel. `epoch` is non-decreasing.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MlsGroupState {
    pub channel_id: String,
    pub epoch: i64,
    pub tree_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A guild, backing `Channel.guild_id` and invite/member bookkeeping (guild
/// previews, member counts, local-guild authorization gate).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub instance_id: Option<String>,
    pub name: String,
    pub icon_id: Option<String>,
    pub description: Option<String>,
    pub member_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Guild membership row, distinct from `ChannelRecipient` (a guild member is not
/// automatically a recipient of every channel in the guild).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GuildMember {
    pub guild_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}
