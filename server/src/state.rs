//! The composite Axum application state.

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::federation::discovery::InstanceDiscovery;
use crate::federation::envelope::SignatureVerifier;
use crate::federation::event_bus::EventBus;
use crate::federation::local_auth::LocalUserAuthenticator;
use crate::federation::outbound::OutboundClient;
use crate::federation::peer_policy::PeerPolicyEngine;
use crate::federation::FederationConfig;
use crate::health::HealthState;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: PgPool,
    pub health: HealthState,
    pub config: Arc<FederationConfig>,
    pub signature_verifier: Arc<dyn SignatureVerifier>,
    pub peer_policy: Arc<PeerPolicyEngine>,
    pub event_bus: Arc<dyn EventBus>,
    pub discovery: Arc<dyn InstanceDiscovery>,
    pub local_auth: Arc<dyn LocalUserAuthenticator>,
    pub outbound: Arc<OutboundClient>,
}

impl AppState {
    /// Build a `VerifierContext` borrowing from this state; kept as a
    /// constructor rather than stored directly since `VerifierContext`
    /// borrows, not owns, its fields.
    pub fn verifier_context(&self) -> crate::federation::verifier::VerifierContext<'_> {
        crate::federation::verifier::VerifierContext {
            pool: &self.pool,
            signature_verifier: self.signature_verifier.as_ref(),
            peer_policy: &self.peer_policy,
            enforce_source_ip: self.config.enforce_source_ip,
            self_instance_id: &self.config.self_instance_id,
        }
    }
}
