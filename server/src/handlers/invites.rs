//! Routes backing invite preview and acceptance across instances.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::federation::errors::FederationError;
use crate::federation::invites::{self, AcceptInviteRequest};
use crate::state::AppState;

use super::{extract_addr, verify_and_parse, Data};

/// `GET /federation/v1/invites/{code}` -> 200 `{data: preview}`, public (no
/// signature required).
#[tracing::instrument(skip(state))]
pub async fn preview(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, FederationError> {
    let preview = invites::preview_invite(&state.pool, &code).await?;
    Ok(Data(preview).into_response())
}

/// `POST /federation/v1/invites/{code}/accept` -> 201 `{data: guild_join}`.
#[tracing::instrument(skip(state, body))]
pub async fn accept(
    State(state): State<AppState>,
    Path(code): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: axum::body::Bytes,
) -> Result<Response, FederationError> {
    let path = format!("/federation/v1/invites/{code}/accept");
    let (req, sender_id): (AcceptInviteRequest, String) =
        verify_and_parse(&state, &body, extract_addr(connect_info), &path).await?;

    let join = invites::accept_invite(&state.pool, state.event_bus.as_ref(), &sender_id, &code, req)
        .await?;

    Ok((StatusCode::CREATED, Data(join)).into_response())
}
