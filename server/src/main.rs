use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use amityvox_federation::federation::discovery::TrivialInstanceDiscovery;
use amityvox_federation::federation::envelope::P256SignatureVerifier;
use amityvox_federation::federation::event_bus::{EventBus, LoggingEventBus, NullEventBus};
use amityvox_federation::federation::local_auth::HeaderUserIdAuthenticator;
use amityvox_federation::federation::outbound::OutboundClient;
use amityvox_federation::federation::peer_policy::PeerPolicyEngine;
use amityvox_federation::federation::FederationConfig;
use amityvox_federation::health::HealthState;
use amityvox_federation::state::AppState;
use amityvox_federation::{db, handlers, health, middleware};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }
        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    #[cfg(debug_assertions)]
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    #[cfg(not(debug_assertions))]
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting AmityVox federation core");

    let config = Arc::new(FederationConfig::from_env());
    tracing::info!(
        self_instance_id = %config.self_instance_id,
        enforce_source_ip = config.enforce_source_ip,
        peer_policy_cache_ttl_secs = config.peer_policy_cache_ttl_secs,
        signing_key_configured = config.signing_key_pem.is_some(),
        "federation configuration loaded"
    );

    let pool = db::init_db_default().await?;
    tracing::info!("database initialized, migrations applied");

    let health_state = HealthState::new(pool.clone(), &config);

    // Default to a logging sink so a deployment that hasn't wired in its real
    // client-facing event bus yet still sees what would have been published.
    let event_bus: Arc<dyn EventBus> = if std::env::var("FEDERATION_EVENT_BUS_SILENT")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        Arc::new(NullEventBus)
    } else {
        Arc::new(LoggingEventBus)
    };

    let app_state = AppState {
        pool: pool.clone(),
        health: health_state,
        peer_policy: Arc::new(PeerPolicyEngine::new(
            config.peer_policy_cache_capacity,
            Duration::from_secs(config.peer_policy_cache_ttl_secs),
        )),
        signature_verifier: Arc::new(P256SignatureVerifier),
        event_bus,
        discovery: Arc::new(TrivialInstanceDiscovery),
        local_auth: Arc::new(HeaderUserIdAuthenticator),
        outbound: Arc::new(OutboundClient::new(
            config.outbound_connect_timeout_secs,
            config.outbound_timeout_secs,
        )),
        config,
    };

    let federation_router = Router::new()
        .route("/dm/create", post(handlers::dm::create))
        .route("/dm/message", post(handlers::dm::message))
        .route("/dm/recipient-add", post(handlers::dm::recipient_add))
        .route("/dm/recipient-remove", post(handlers::dm::recipient_remove))
        .route("/invites/{code}", get(handlers::invites::preview))
        .route("/invites/{code}/accept", post(handlers::invites::accept))
        .route(
            "/guilds/{guild_id}/channels/{channel_id}/mls/key-packages/{user_id}",
            get(handlers::mls::list_key_packages),
        )
        .route(
            "/guilds/{guild_id}/channels/{channel_id}/mls/key-packages/{user_id}/claim",
            post(handlers::mls::claim_key_package),
        )
        .route(
            "/guilds/{guild_id}/channels/{channel_id}/mls/welcome",
            post(handlers::mls::welcome),
        )
        .route(
            "/guilds/{guild_id}/channels/{channel_id}/mls/commits",
            post(handlers::mls::publish_commit).get(handlers::mls::list_commits),
        )
        .route(
            "/guilds/{guild_id}/channels/{channel_id}/mls/group-state",
            get(handlers::mls::group_state),
        );

    let app = Router::new()
        .nest("/federation/v1", federation_router)
        .route(
            "/api/v1/federation/invites/resolve",
            post(handlers::proxy::resolve),
        )
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::logging::log_headers_middleware))
        .with_state(app_state);

    let port = std::env::var("SERVER_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
