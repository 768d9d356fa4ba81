use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// The federation error taxonomy. Every handler returns this type
/// so the HTTP status and wire shape stay consistent across the whole surface.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// Reserved for the out-of-scope local-user authentication collaborator;
    /// the only endpoint in this core that needs it is the local
    /// invite-resolve proxy.
    #[error("authentication required")]
    Unauthorized,

    #[error("unknown sender")]
    UnknownSender,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("request timestamp outside freshness window")]
    StaleTimestamp,

    #[error("source address does not match sender's known address set")]
    SourceAddressMismatch,

    #[error("peer policy denies this sender")]
    PeerPolicyDenied,

    #[error("channel does not belong to guild, or guild is not local")]
    NotLocalGuild,

    #[error("user {user_id} belongs to a different instance than claimed")]
    InstanceMismatch { user_id: String },

    #[error("banned from guild")]
    Banned,

    #[error("resolved domain is not an active federation peer")]
    SsrfGuardRejected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("gone: {0}")]
    Gone(String),

    #[error("remote instance returned an error: {status} {body}")]
    BadGateway { status: u16, body: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error contacting remote instance: {0}")]
    Http(#[from] reqwest::Error),
}

impl FederationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::StaleTimestamp => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UnknownSender
            | Self::InvalidSignature
            | Self::SourceAddressMismatch
            | Self::PeerPolicyDenied
            | Self::NotLocalGuild
            | Self::InstanceMismatch { .. }
            | Self::Banned => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gone(_) => StatusCode::GONE,
            Self::SsrfGuardRejected | Self::BadGateway { .. } | Self::Http(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::StaleTimestamp => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::UnknownSender => "forbidden",
            Self::InvalidSignature => "forbidden",
            Self::SourceAddressMismatch => "forbidden",
            Self::PeerPolicyDenied => "forbidden",
            Self::NotLocalGuild => "forbidden",
            Self::InstanceMismatch { .. } => "forbidden",
            Self::Banned => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Gone(_) => "gone",
            Self::SsrfGuardRejected => "bad_gateway",
            Self::BadGateway { .. } => "bad_gateway",
            Self::Http(_) => "bad_gateway",
            Self::Database(_) => "internal",
        }
    }
}

impl IntoResponse for FederationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Fail-closed authorization-path DB errors are logged at error level; everything
        // else that reaches a client is an ordinary rejection, logged at warn.
        if matches!(self, Self::Database(_)) {
            tracing::error!(error = %self, code = self.code(), "federation request failed");
        } else {
            tracing::warn!(error = %self, code = self.code(), "federation request rejected");
        }

        (
            status,
            Json(json!({ "error": { "code": self.code(), "message": self.to_string() } })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(
            FederationError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(FederationError::StaleTimestamp.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(FederationError::UnknownSender.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(FederationError::InvalidSignature.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(FederationError::PeerPolicyDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(FederationError::Banned.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            FederationError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(FederationError::Gone("x".into()).status_code(), StatusCode::GONE);
        assert_eq!(
            FederationError::SsrfGuardRejected.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            FederationError::BadGateway { status: 503, body: String::new() }.status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn code_mapping_matches_taxonomy_names() {
        assert_eq!(FederationError::UnknownSender.code(), "forbidden");
        assert_eq!(FederationError::NotFound("x".into()).code(), "not_found");
        assert_eq!(FederationError::Gone("x".into()).code(), "gone");
        assert_eq!(FederationError::SsrfGuardRejected.code(), "bad_gateway");
    }
}
