//! Remote User Stub Manager & Sender-Domain Validation.

use sqlx::PgPool;

use super::errors::FederationError;
use crate::identity::instance_ids_equivalent;

/// Profile fields carried in a federated payload for a (possibly new) remote
/// user.
pub struct RemoteUserInfo<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub display_name: Option<&'a str>,
    pub avatar_id: Option<&'a str>,
}

/// `EnsureRemoteUserStub(instance_id, user_info)`.
///
/// If a user row with `user_info.id` already exists, its `instance_id` is
/// compared to `instance_id`: a mismatch is a cross-instance impersonation
/// attempt and is logged and ignored without modifying the row; a match
/// updates the cached profile fields. If no row exists, one is inserted with
/// `offline` presence; a concurrent insert racing this one resolves via
/// `ON CONFLICT`, again only updating profile fields when the instance
/// matches.
pub async fn ensure_remote_user_stub(
    pool: &PgPool,
    instance_id: &str,
    user_info: &RemoteUserInfo<'_>,
) -> Result<(), FederationError> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT instance_id FROM users WHERE id = $1")
            .bind(user_info.id)
            .fetch_optional(pool)
            .await?;

    if let Some(existing_instance_id) = existing {
        let matches = existing_instance_id
            .as_deref()
            .map(|existing| instance_ids_equivalent(existing, instance_id))
            .unwrap_or(false);

        if !matches {
            tracing::warn!(
                user_id = user_info.id,
                claimed_instance_id = instance_id,
                stored_instance_id = ?existing_instance_id,
                "ignoring remote user stub update: instance mismatch"
            );
            return Ok(());
        }

        sqlx::query(
            "UPDATE users SET display_name = $2, avatar_id = $3 WHERE id = $1",
        )
        .bind(user_info.id)
        .bind(user_info.display_name)
        .bind(user_info.avatar_id)
        .execute(pool)
        .await?;
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO users (id, instance_id, username, display_name, avatar_id, status_presence, created_at) \
         VALUES ($1, $2, $3, $4, $5, 'offline', NOW()) \
         ON CONFLICT (id) DO UPDATE SET \
           display_name = CASE WHEN users.instance_id = EXCLUDED.instance_id THEN EXCLUDED.display_name ELSE users.display_name END, \
           avatar_id = CASE WHEN users.instance_id = EXCLUDED.instance_id THEN EXCLUDED.avatar_id ELSE users.avatar_id END",
    )
    .bind(user_info.id)
    .bind(instance_id)
    .bind(user_info.username)
    .bind(user_info.display_name)
    .bind(user_info.avatar_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// `ValidateSenderDomain(sender_id, claimed_domain)`: confirm that
/// `claimed_domain` resolves to `sender_id` via the `instances` table. Used
/// wherever a payload carries an `instance_domain` claim that must be backed
/// by the verified signer, preventing a valid signer from impersonating a
/// user of another instance.
pub async fn validate_sender_domain(
    pool: &PgPool,
    sender_id: &str,
    claimed_domain: &str,
) -> Result<bool, FederationError> {
    let instance_id: Option<String> =
        sqlx::query_scalar("SELECT id FROM instances WHERE domain = $1")
            .bind(claimed_domain)
            .fetch_optional(pool)
            .await?;

    Ok(instance_id
        .map(|id| instance_ids_equivalent(&id, sender_id))
        .unwrap_or(false))
}
