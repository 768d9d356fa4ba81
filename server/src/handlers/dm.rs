//! Routes backing direct-message mirroring between instances.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::federation::dm_mirror::{
    self, DmCreateRequest, FederatedMessage, MessageOutcome, ParticipantProfile,
};
use crate::federation::errors::FederationError;
use crate::state::AppState;

use super::{extract_addr, verify_and_parse};

/// `POST /federation/v1/dm/create` -> 201 `{channel_id}`.
#[tracing::instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let (req, sender_id): (DmCreateRequest, String) = verify_and_parse(
        &state,
        &body,
        extract_addr(connect_info),
        "/federation/v1/dm/create",
    )
    .await?;

    let channel_id = dm_mirror::create_dm(&state.pool, state.event_bus.as_ref(), &sender_id, req).await?;

    Ok((StatusCode::CREATED, Json(json!({ "channel_id": channel_id }))).into_response())
}

#[derive(Debug, Deserialize)]
struct DmMessageRequest {
    remote_channel_id: String,
    message: FederatedMessage,
}

/// `POST /federation/v1/dm/message` -> 202 `{status:"accepted"}`, always, so
/// retries by the sending instance stay safe.
#[tracing::instrument(skip(state, body))]
pub async fn message(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let (req, sender_id): (DmMessageRequest, String) = verify_and_parse(
        &state,
        &body,
        extract_addr(connect_info),
        "/federation/v1/dm/message",
    )
    .await?;

    let outcome = dm_mirror::deliver_message(
        &state.pool,
        state.event_bus.as_ref(),
        &req.remote_channel_id,
        &sender_id,
        req.message,
    )
    .await?;

    match outcome {
        MessageOutcome::Delivered | MessageOutcome::AlreadyDelivered => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "accepted" })),
        )
            .into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct RecipientAddRequest {
    remote_channel_id: String,
    recipient: ParticipantProfile,
}

/// `POST /federation/v1/dm/recipient-add` -> 204.
#[tracing::instrument(skip(state, body))]
pub async fn recipient_add(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<StatusCode, FederationError> {
    let (req, sender_id): (RecipientAddRequest, String) = verify_and_parse(
        &state,
        &body,
        extract_addr(connect_info),
        "/federation/v1/dm/recipient-add",
    )
    .await?;

    dm_mirror::add_recipient(&state.pool, &req.remote_channel_id, &sender_id, req.recipient).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct RecipientRemoveRequest {
    remote_channel_id: String,
    user_id: String,
}

/// `POST /federation/v1/dm/recipient-remove` -> 204.
#[tracing::instrument(skip(state, body))]
pub async fn recipient_remove(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<StatusCode, FederationError> {
    let (req, sender_id): (RecipientRemoveRequest, String) = verify_and_parse(
        &state,
        &body,
        extract_addr(connect_info),
        "/federation/v1/dm/recipient-remove",
    )
    .await?;

    dm_mirror::remove_recipient(&state.pool, &req.remote_channel_id, &sender_id, &req.user_id).await?;

    Ok(StatusCode::NO_CONTENT)
}
