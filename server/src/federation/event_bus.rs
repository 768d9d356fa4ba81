//! The local event bus that notifies connected clients is an out-of-scope
//! external collaborator. This module gives it a trait seam plus two
//! concrete implementations.

use async_trait::async_trait;
use serde::Serialize;

/// The events this core publishes after a successful, committed state change.
/// Publication is fire-and-forget and happens strictly after the DB commit —
/// event delivery is not part of the request's durability guarantee.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FederationEvent {
    ChannelCreate { channel_id: String },
    MessageCreate { channel_id: String, message: serde_json::Value },
    GuildMemberAdd { guild_id: String, user_id: String },
}

/// The out-of-scope local event bus. A handler calls `publish` after its
/// database transaction commits; the bus owns fan-out to connected clients.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: FederationEvent);
}

/// Discards every event. Useful for tests and for deployments that only care
/// about the federation side effects (mirrors, messages) and not live fan-out.
#[derive(Debug, Default)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish(&self, event: FederationEvent) {
        tracing::debug!(?event, "event bus: discarding (null backend)");
    }
}

/// Logs every event at debug level before discarding it. A reasonable default
/// collaborator for a deployment that hasn't wired in its real client-facing
/// event bus yet; `publish` is the single seam a real implementation replaces.
#[derive(Debug, Default)]
pub struct LoggingEventBus;

#[async_trait]
impl EventBus for LoggingEventBus {
    async fn publish(&self, event: FederationEvent) {
        tracing::info!(?event, "federation event published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_bus_accepts_every_event_variant() {
        let bus = NullEventBus;
        bus.publish(FederationEvent::ChannelCreate {
            channel_id: "c1".into(),
        })
        .await;
        bus.publish(FederationEvent::MessageCreate {
            channel_id: "c1".into(),
            message: serde_json::json!({"id": "m1"}),
        })
        .await;
        bus.publish(FederationEvent::GuildMemberAdd {
            guild_id: "g1".into(),
            user_id: "u1".into(),
        })
        .await;
    }
}
