//! REST surface for the scheduling/agent layer
//!
//! This module exposes the engine's scheduling surface over HTTP:
//! schedule/unschedule/status/execute/test for measure instances, plus the
//! endpoints remote agents use to register, heartbeat and pull their
//! assigned work.
//!
//! ## Endpoints
//!
//! - `GET  /api/v1/health` - Health check
//! - `GET  /api/v1/scheduling/start?id=` - Schedule an instance
//! - `GET  /api/v1/scheduling/stop?id=` - Unschedule an instance
//! - `GET  /api/v1/scheduling/status?id=` - Is the instance scheduled?
//! - `GET  /api/v1/scheduling/execute?id=` - Execute immediately
//! - `GET  /api/v1/scheduling/test?id=` - Dry run (nothing persisted)
//! - `GET  /api/v1/scheduling/external?id=&date=&dateField=` - Back-dated execution
//! - `GET  /api/v1/agents` - Registered agents
//! - `POST /api/v1/agents/:label/register` - Register an agent
//! - `POST /api/v1/agents/:label/lifesign` - Heartbeat
//! - `GET  /api/v1/agents/:label/assignments` - Pull assigned work
//! - `GET  /api/v1/logs?limit=` - Recent execution logs

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for external dashboards
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().unwrap(),
            enable_cors: true,
        }
    }
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    info!("starting API server on {}", config.bind_addr);

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health))
        .route("/api/v1/scheduling/start", get(routes::start_scheduling))
        .route("/api/v1/scheduling/stop", get(routes::stop_scheduling))
        .route("/api/v1/scheduling/status", get(routes::scheduling_status))
        .route("/api/v1/scheduling/execute", get(routes::execute_measure))
        .route("/api/v1/scheduling/test", get(routes::test_measure))
        .route(
            "/api/v1/scheduling/external",
            get(routes::external_execution),
        )
        .route("/api/v1/agents", get(routes::list_agents))
        .route("/api/v1/agents/:label/register", post(routes::register_agent))
        .route(
            "/api/v1/agents/:label/lifesign",
            post(routes::register_life_sign),
        )
        .route(
            "/api/v1/agents/:label/assignments",
            get(routes::agent_assignments),
        )
        .route("/api/v1/logs", get(routes::recent_logs))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
