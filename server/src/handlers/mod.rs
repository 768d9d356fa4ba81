//! HTTP handlers for the federation external interface.
//!
//! Thin by design: every handler verifies the request (where signed),
//! deserializes the envelope payload into the handler-specific request type,
//! delegates to the matching `federation::*` module, and maps the result to
//! the wire shape every federation response uses.

pub mod dm;
pub mod invites;
pub mod mls;
pub mod proxy;

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::federation::errors::FederationError;
use crate::state::AppState;

/// Wraps a response body as `{"data": ...}`, the envelope shape used for every
/// federation response payload.
pub struct Data<T>(pub T);

impl<T: Serialize> IntoResponse for Data<T> {
    fn into_response(self) -> Response {
        Json(serde_json::json!({ "data": self.0 })).into_response()
    }
}

/// Verify a raw request body as a signed envelope and deserialize its
/// `payload` into `T`. Every signed handler starts here.
pub async fn verify_and_parse<T: DeserializeOwned>(
    state: &AppState,
    body: &[u8],
    remote_addr: Option<SocketAddr>,
    path: &str,
) -> Result<(T, String), FederationError> {
    let ctx = state.verifier_context();
    let (envelope, sender_id) =
        crate::federation::verifier::verify_request(&ctx, body, remote_addr.map(|a| a.ip()), path)
            .await?;

    let payload: T = serde_json::from_str(envelope.payload.get())
        .map_err(|e| FederationError::BadRequest(format!("invalid payload: {e}")))?;

    Ok((payload, sender_id))
}

pub fn extract_addr(connect_info: Option<ConnectInfo<SocketAddr>>) -> Option<SocketAddr> {
    connect_info.map(|ConnectInfo(addr)| addr)
}
