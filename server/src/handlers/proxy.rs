//! `POST /api/v1/federation/invites/resolve`: the local,
//! authenticated proxy that resolves a remote invite preview while guarding
//! against SSRF via instance discovery.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::federation::errors::FederationError;
use crate::federation::invites::resolve_remote_invite;
use crate::state::AppState;

use super::Data;

#[derive(Debug, Deserialize)]
pub struct ResolveInviteRequest {
    instance_domain: String,
    code: String,
}

/// Requires an authenticated local user; the local-user authentication
/// collaborator is out of scope and is reached via `LocalUserAuthenticator`.
#[tracing::instrument(skip(state, headers))]
pub async fn resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResolveInviteRequest>,
) -> Result<Response, FederationError> {
    if state.local_auth.authenticate(&headers).await.is_none() {
        return Err(FederationError::Unauthorized);
    }

    let resolved = resolve_remote_invite(
        &state.pool,
        state.discovery.as_ref(),
        state.outbound.client(),
        &req.instance_domain,
        &req.code,
    )
    .await?;

    Ok(Data(resolved).into_response())
}
