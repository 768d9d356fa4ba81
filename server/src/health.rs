//! Health and readiness probes: a liveness/readiness/health three-endpoint
//! split backed by a `CheckStatus` enum, plus a federation-config liveness
//! field.

use std::time::SystemTime;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;

use crate::federation::FederationConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    database: CheckStatus,
    signing_key_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: u64,
    version: String,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    database: bool,
}

#[derive(Debug, Clone)]
pub struct HealthState {
    pub pool: PgPool,
    pub self_instance_id: String,
    pub signing_key_configured: bool,
}

impl HealthState {
    pub fn new(pool: PgPool, config: &FederationConfig) -> Self {
        Self {
            pool,
            self_instance_id: config.self_instance_id.clone(),
            signing_key_configured: config.signing_key_pem.is_some(),
        }
    }
}

/// Liveness probe: the process is running. No external calls.
pub async fn liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Readiness probe: the database pool can serve a query.
pub async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = crate::db::health_check(&state.pool).await.is_ok();
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready: database, database }))
}

/// Detailed health information.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = crate::db::health_check(&state.pool).await.is_ok();
    let database = if database_ok {
        CheckStatus::Healthy
    } else {
        CheckStatus::Unhealthy
    };

    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    (
        status,
        Json(HealthResponse {
            status: if database_ok { "healthy" } else { "unhealthy" }.to_string(),
            timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                database,
                signing_key_configured: state.signing_key_configured,
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_always_ok() {
        let (status, body) = liveness().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
