//! `/federation/v1/guilds/{g}/channels/{c}/mls/*` MLS relay routes.
//!
//! Every handler here authorizes via
//! `mls_relay::authorize_local_guild_channel` before touching any MLS data —
//! the sole authorization gate for MLS operations, performed before any MLS
//! data is read or written.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::federation::errors::FederationError;
use crate::federation::mls_relay::{self, CommitRequest, WelcomeRequest};
use crate::state::AppState;

use super::{extract_addr, verify_and_parse, Data};

/// `GET .../mls/key-packages/{userID}` -> 200 list.
#[tracing::instrument(skip(state, body))]
pub async fn list_key_packages(
    State(state): State<AppState>,
    Path((guild_id, channel_id, user_id)): Path<(String, String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let path = format!(
        "/federation/v1/guilds/{guild_id}/channels/{channel_id}/mls/key-packages/{user_id}"
    );
    let (_, _sender_id): (serde_json::Value, String) =
        verify_and_parse(&state, &body, extract_addr(connect_info), &path).await?;

    mls_relay::authorize_local_guild_channel(&state.pool, &guild_id, &channel_id).await?;
    let packages = mls_relay::list_key_packages(&state.pool, &user_id).await?;
    Ok(Data(packages).into_response())
}

/// `POST .../mls/key-packages/{userID}/claim` -> 200 one, 404 if none
/// available.
#[tracing::instrument(skip(state, body))]
pub async fn claim_key_package(
    State(state): State<AppState>,
    Path((guild_id, channel_id, user_id)): Path<(String, String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let path = format!(
        "/federation/v1/guilds/{guild_id}/channels/{channel_id}/mls/key-packages/{user_id}/claim"
    );
    let (_, _sender_id): (serde_json::Value, String) =
        verify_and_parse(&state, &body, extract_addr(connect_info), &path).await?;

    mls_relay::authorize_local_guild_channel(&state.pool, &guild_id, &channel_id).await?;
    let claimed = mls_relay::claim_key_package(&state.pool, &user_id).await?;
    Ok(Data(claimed).into_response())
}

/// `POST .../mls/welcome` -> 201.
#[tracing::instrument(skip(state, body))]
pub async fn welcome(
    State(state): State<AppState>,
    Path((guild_id, channel_id)): Path<(String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let path = format!("/federation/v1/guilds/{guild_id}/channels/{channel_id}/mls/welcome");
    let (req, _sender_id): (WelcomeRequest, String) =
        verify_and_parse(&state, &body, extract_addr(connect_info), &path).await?;

    mls_relay::authorize_local_guild_channel(&state.pool, &guild_id, &channel_id).await?;
    let meta = mls_relay::store_welcome(&state.pool, &channel_id, req).await?;
    Ok((StatusCode::CREATED, Data(meta)).into_response())
}

/// `POST .../mls/commits` -> 201.
#[tracing::instrument(skip(state, body))]
pub async fn publish_commit(
    State(state): State<AppState>,
    Path((guild_id, channel_id)): Path<(String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let path = format!("/federation/v1/guilds/{guild_id}/channels/{channel_id}/mls/commits");
    let (req, sender_id): (CommitRequest, String) =
        verify_and_parse(&state, &body, extract_addr(connect_info), &path).await?;

    mls_relay::authorize_local_guild_channel(&state.pool, &guild_id, &channel_id).await?;
    let commit =
        mls_relay::publish_commit(&state.pool, &sender_id, &guild_id, &channel_id, req).await?;
    Ok((StatusCode::CREATED, Data(commit)).into_response())
}

/// `GET .../mls/group-state` -> 200, 404 if absent.
#[tracing::instrument(skip(state, body))]
pub async fn group_state(
    State(state): State<AppState>,
    Path((guild_id, channel_id)): Path<(String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let path = format!("/federation/v1/guilds/{guild_id}/channels/{channel_id}/mls/group-state");
    let (_, _sender_id): (serde_json::Value, String) =
        verify_and_parse(&state, &body, extract_addr(connect_info), &path).await?;

    mls_relay::authorize_local_guild_channel(&state.pool, &guild_id, &channel_id).await?;
    let state_row = mls_relay::read_group_state(&state.pool, &channel_id).await?;
    Ok(Data(state_row).into_response())
}

#[derive(Debug, Deserialize)]
pub struct SinceEpochQuery {
    since_epoch: Option<String>,
}

/// `GET .../mls/commits?since_epoch=N` -> 200 list.
#[tracing::instrument(skip(state, body))]
pub async fn list_commits(
    State(state): State<AppState>,
    Path((guild_id, channel_id)): Path<(String, String)>,
    Query(query): Query<SinceEpochQuery>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let path = format!("/federation/v1/guilds/{guild_id}/channels/{channel_id}/mls/commits");
    let (_, _sender_id): (serde_json::Value, String) =
        verify_and_parse(&state, &body, extract_addr(connect_info), &path).await?;

    mls_relay::authorize_local_guild_channel(&state.pool, &guild_id, &channel_id).await?;
    let since_epoch = mls_relay::parse_since_epoch(query.since_epoch.as_deref());
    let commits = mls_relay::list_commits_since(&state.pool, &channel_id, since_epoch).await?;
    Ok(Data(commits).into_response())
}
