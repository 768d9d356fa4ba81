//! Integration tests exercising the federation core against a real Postgres
//! database: a `TEST_DATABASE_URL`-driven pool, `TRUNCATE ... CASCADE`
//! cleanup, one `#[tokio::test]` per scenario.

use std::time::Duration;

use amityvox_federation::db::{init_db, DbConfig};
use amityvox_federation::federation::dm_mirror::{
    self, DmCreateRequest, FederatedMessage, MessageOutcome, ParticipantProfile,
};
use amityvox_federation::federation::errors::FederationError;
use amityvox_federation::federation::event_bus::NullEventBus;
use amityvox_federation::federation::mls_relay;
use amityvox_federation::federation::peer_policy::{self, PeerPolicyEngine, PeerStatus};
use amityvox_federation::federation::user_stub::{ensure_remote_user_stub, RemoteUserInfo};
use sqlx::PgPool;

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/amityvox_federation_test".to_string());

    init_db(DbConfig {
        database_url,
        max_connections: 10,
        min_connections: 2,
        acquire_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(600),
    })
    .await
    .expect("failed to initialize test database")
}

async fn cleanup(pool: &PgPool) {
    sqlx::query(
        "TRUNCATE TABLE mls_group_states, mls_commits, mls_welcome_messages, \
         mls_key_packages, guild_members, guild_bans, invites, federation_peers, \
         federation_channel_peers, federation_channel_mirrors, messages, \
         channel_recipients, channels, guilds, users, instances CASCADE",
    )
    .execute(pool)
    .await
    .expect("failed to clean up test data");
}

async fn insert_instance(pool: &PgPool, id: &str, domain: &str) {
    sqlx::query(
        "INSERT INTO instances (id, domain, public_key, created_at) \
         VALUES ($1, $2, 'test-public-key', NOW())",
    )
    .bind(id)
    .bind(domain)
    .execute(pool)
    .await
    .expect("failed to insert instance");
}

async fn insert_local_user(pool: &PgPool, id: &str, username: &str) {
    sqlx::query(
        "INSERT INTO users (id, instance_id, username, status_presence, created_at) \
         VALUES ($1, NULL, $2, 'offline', NOW())",
    )
    .bind(id)
    .bind(username)
    .execute(pool)
    .await
    .expect("failed to insert local user");
}

async fn insert_guild(pool: &PgPool, id: &str) {
    sqlx::query(
        "INSERT INTO guilds (id, instance_id, name, member_count, created_at) \
         VALUES ($1, NULL, 'Test Guild', 0, NOW())",
    )
    .bind(id)
    .execute(pool)
    .await
    .expect("failed to insert guild");
}

async fn insert_channel(pool: &PgPool, id: &str, guild_id: Option<&str>) {
    sqlx::query(
        "INSERT INTO channels (id, channel_type, guild_id, created_at) \
         VALUES ($1, 'guild_text', $2, NOW())",
    )
    .bind(id)
    .bind(guild_id)
    .execute(pool)
    .await
    .expect("failed to insert channel");
}

/// DM create is idempotent — a replayed `dm/create`
/// from the same sender leaves exactly one mirror row.
#[tokio::test]
async fn dm_create_idempotent_on_replay() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;
    let bus = NullEventBus;

    insert_instance(&pool, "https://a.example", "a.example").await;
    insert_local_user(&pool, "u_local", "local_user").await;

    let req = || DmCreateRequest {
        channel_id: "remote-c1".to_string(),
        channel_type: "dm".to_string(),
        creator: "u_remote".to_string(),
        recipient_ids: vec!["u_local".to_string()],
        recipients: vec![ParticipantProfile {
            id: "u_remote".to_string(),
            username: "remote_user".to_string(),
            display_name: None,
            avatar_id: None,
            instance_domain: Some("a.example".to_string()),
        }],
        group_name: None,
    };

    let first_channel_id = dm_mirror::create_dm(&pool, &bus, "https://a.example", req())
        .await
        .expect("first dm/create should succeed");

    // A naive replay mints a *second* local channel (the sender's retry is a
    // fresh call with the same remote_channel_id but no new local id); the
    // mirror's own ON CONFLICT guard is what keeps the mapping singular.
    let _ = dm_mirror::create_dm(&pool, &bus, "https://a.example", req())
        .await
        .expect("replayed dm/create should still succeed (2xx)");

    let mirror_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM federation_channel_mirrors \
         WHERE remote_channel_id = $1 AND remote_instance_id = $2",
    )
    .bind("remote-c1")
    .bind("https://a.example")
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(mirror_count, 1);

    let mapped_channel_id: String = sqlx::query_scalar(
        "SELECT local_channel_id FROM federation_channel_mirrors WHERE remote_channel_id = $1",
    )
    .bind("remote-c1")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(mapped_channel_id, first_channel_id);
}

/// Message replay is absorbed silently; the table
/// contains exactly one row for the id, and redelivery reports
/// `AlreadyDelivered` rather than publishing again.
#[tokio::test]
async fn dm_message_replay_inserts_once() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;
    let bus = NullEventBus;

    insert_instance(&pool, "https://a.example", "a.example").await;
    insert_local_user(&pool, "u_local", "local_user").await;
    insert_channel(&pool, "local-c1", None).await;
    sqlx::query(
        "INSERT INTO federation_channel_mirrors \
            (local_channel_id, remote_channel_id, remote_instance_id, created_at) \
         VALUES ('local-c1', 'remote-c1', 'https://a.example', NOW())",
    )
    .execute(&pool)
    .await
    .unwrap();

    let message = || FederatedMessage {
        id: "m1".to_string(),
        author_id: "u_local".to_string(),
        content: "hello".to_string(),
        attachments: None,
        embeds: None,
    };

    let first = dm_mirror::deliver_message(&pool, &bus, "remote-c1", "https://a.example", message())
        .await
        .expect("first delivery should succeed");
    assert!(matches!(first, MessageOutcome::Delivered));

    let second = dm_mirror::deliver_message(&pool, &bus, "remote-c1", "https://a.example", message())
        .await
        .expect("replayed delivery should still succeed");
    assert!(matches!(second, MessageOutcome::AlreadyDelivered));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE id = 'm1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

/// A remote instance cannot overwrite a user's
/// `instance_id`, or its profile, by impersonating a different instance.
#[tokio::test]
async fn cross_instance_stub_update_is_ignored() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;

    insert_instance(&pool, "https://i1.example", "i1.example").await;
    insert_instance(&pool, "https://i2.example", "i2.example").await;

    sqlx::query(
        "INSERT INTO users (id, instance_id, username, display_name, status_presence, created_at) \
         VALUES ('u_x', 'https://i1.example', 'u_x', 'Original Name', 'offline', NOW())",
    )
    .execute(&pool)
    .await
    .unwrap();

    ensure_remote_user_stub(
        &pool,
        "https://i2.example",
        &RemoteUserInfo {
            id: "u_x",
            username: "u_x",
            display_name: Some("Impersonated Name"),
            avatar_id: None,
        },
    )
    .await
    .expect("ensure_remote_user_stub should not error on a mismatch, just ignore it");

    let (instance_id, display_name): (Option<String>, Option<String>) =
        sqlx::query_as("SELECT instance_id, display_name FROM users WHERE id = 'u_x'")
            .fetch_one(&pool)
            .await
            .unwrap();

    assert_eq!(instance_id.as_deref(), Some("https://i1.example"));
    assert_eq!(display_name.as_deref(), Some("Original Name"));
}

/// Two concurrent claims against a single key
/// package — exactly one succeeds, the package is gone afterward.
#[tokio::test]
async fn key_package_single_use_under_concurrent_claim() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;

    insert_local_user(&pool, "u1", "claimant").await;
    sqlx::query(
        "INSERT INTO mls_key_packages (id, user_id, device_id, data, expires_at, created_at) \
         VALUES ('kp1', 'u1', 'device-a', '\\x010203', NOW() + INTERVAL '1 day', NOW())",
    )
    .execute(&pool)
    .await
    .unwrap();

    let (r1, r2) = tokio::join!(
        mls_relay::claim_key_package(&pool, "u1"),
        mls_relay::claim_key_package(&pool, "u1"),
    );

    let results = [r1, r2];
    let successes: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    let failures: Vec<_> = results.iter().filter(|r| r.is_err()).collect();

    assert_eq!(successes.len(), 1, "exactly one claim should succeed");
    assert_eq!(failures.len(), 1, "the other claim should see no package");
    assert!(matches!(
        failures[0].as_ref().unwrap_err(),
        FederationError::NotFound(_)
    ));

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mls_key_packages")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

/// Epoch monotonicity under reorder — a
/// higher-epoch commit followed by a lower-epoch commit leaves the group
/// state at the maximum, and both commits remain in the log.
#[tokio::test]
async fn epoch_monotonic_under_commit_reorder() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;

    insert_instance(&pool, "https://a.example", "a.example").await;
    insert_guild(&pool, "g1").await;
    insert_channel(&pool, "c1", Some("g1")).await;

    sqlx::query(
        "INSERT INTO users (id, instance_id, username, status_presence, created_at) \
         VALUES ('u_a', 'https://a.example', 'u_a', 'offline', NOW())",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO guild_members (guild_id, user_id, joined_at) VALUES ('g1', 'u_a', NOW())")
        .execute(&pool)
        .await
        .unwrap();

    mls_relay::publish_commit(
        &pool,
        "https://a.example",
        "g1",
        "c1",
        mls_relay::CommitRequest {
            user_id: "u_a".to_string(),
            epoch: 5,
            data: vec![1, 2, 3],
        },
    )
    .await
    .expect("epoch 5 commit should succeed");

    mls_relay::publish_commit(
        &pool,
        "https://a.example",
        "g1",
        "c1",
        mls_relay::CommitRequest {
            user_id: "u_a".to_string(),
            epoch: 3,
            data: vec![4, 5, 6],
        },
    )
    .await
    .expect("epoch 3 commit should also succeed (commit log never rejects a reorder)");

    let state = mls_relay::read_group_state(&pool, "c1")
        .await
        .expect("group state should exist");
    assert_eq!(state.epoch, 5);

    let commits = mls_relay::list_commits_since(&pool, "c1", 0)
        .await
        .expect("commit list should succeed");
    assert_eq!(commits.len(), 2);
}

/// Invite-accept with a banned user: a banned
/// user's accept is rejected and membership is unchanged.
#[tokio::test]
async fn invite_accept_rejects_banned_user() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;
    let bus = NullEventBus;

    insert_instance(&pool, "https://a.example", "a.example").await;
    insert_guild(&pool, "g1").await;

    sqlx::query(
        "INSERT INTO invites (code, guild_id, max_uses, uses, created_at) \
         VALUES ('invite1', 'g1', 0, 0, NOW())",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO guild_bans (guild_id, user_id, created_at) VALUES ('g1', 'u_banned', NOW())")
        .execute(&pool)
        .await
        .unwrap();

    let req = amityvox_federation::federation::invites::AcceptInviteRequest {
        user_id: "u_banned".to_string(),
        username: "banned_user".to_string(),
        display_name: None,
        avatar_id: None,
        instance_domain: "a.example".to_string(),
    };

    let result = amityvox_federation::federation::invites::accept_invite(
        &pool,
        &bus,
        "https://a.example",
        "invite1",
        req,
    )
    .await;

    assert!(matches!(result, Err(FederationError::Banned)));

    let member_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM guild_members WHERE guild_id = 'g1'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(member_count, 0);
}

/// A peer-status upsert invalidates the cached verdict for that peer, so a
/// just-blocked peer is denied on the very next check rather than riding out
/// the TTL on a stale `true`.
#[tokio::test]
async fn peer_status_change_invalidates_cached_verdict() {
    let pool = setup_test_db().await;
    cleanup(&pool).await;

    insert_instance(&pool, "https://peer.example", "peer.example").await;
    peer_policy::upsert_peer_status(
        &pool,
        &PeerPolicyEngine::new(100, Duration::from_secs(300)),
        "https://local.example",
        "https://peer.example",
        PeerStatus::Active,
    )
    .await
    .expect("initial upsert should succeed");

    let engine = PeerPolicyEngine::new(100, Duration::from_secs(300));

    let allowed = engine
        .is_federation_allowed(&pool, "https://peer.example")
        .await
        .unwrap();
    assert!(allowed, "peer should be allowed while status is active");

    peer_policy::upsert_peer_status(
        &pool,
        &engine,
        "https://local.example",
        "https://peer.example",
        PeerStatus::Blocked,
    )
    .await
    .expect("upsert to blocked should succeed");

    let allowed_after_block = engine
        .is_federation_allowed(&pool, "https://peer.example")
        .await
        .unwrap();
    assert!(
        !allowed_after_block,
        "the cache must reflect the new status instead of serving the stale cached verdict"
    );
}
