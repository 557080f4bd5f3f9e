//! REST observability API (spec.md §6 "Ambient stack", additive only)
//!
//! Thin read-only endpoints over a running [`AgentMeshRuntime`]: health,
//! per-component stats, and the live agent roster. None of this is on the
//! `handle_turn` path — it exists for operators, not the mesh itself.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::event_bus::BusStats;
use crate::cache::CacheStats;
use crate::domain_types::{AgentId, CapabilityName};
use crate::registry::{AgentStatus, AgentType};
use crate::runtime::AgentMeshRuntime;

/// Health check response for `/api/v1/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Always `"healthy"` once the runtime has finished constructing.
    pub status: String,
}

/// Aggregated point-in-time stats across the Event Bus and Response Cache.
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Event Bus publish/delivery/retry/dead-letter counters.
    pub bus: BusStats,
    /// Response Cache hit/miss counters.
    pub cache: CacheStats,
}

/// One entry in the `/api/v1/agents` roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    /// The agent's identity.
    pub id: AgentId,
    /// Capabilities this agent declares it can serve.
    pub capabilities: Vec<CapabilityName>,
    /// Free-form agent classification.
    pub agent_type: AgentType,
    /// Current lifecycle status.
    pub status: AgentStatus,
}

/// Builds the Axum router over a shared [`AgentMeshRuntime`] handle.
#[must_use]
pub fn create_app(runtime: Arc<AgentMeshRuntime>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/stats", get(stats))
        .route("/api/v1/agents", get(list_agents))
        .with_state(runtime)
}

/// Binds `addr` and serves the observability API until the process is
/// terminated.
///
/// # Errors
/// Returns an error if the server fails to bind to `addr` or serve requests.
pub async fn start_server(
    runtime: Arc<AgentMeshRuntime>,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_app(runtime);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse { status: "healthy".to_string() })
}

async fn stats(State(runtime): State<Arc<AgentMeshRuntime>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        bus: runtime.bus().stats(),
        cache: runtime.cache().stats().await,
    })
}

async fn list_agents(State(runtime): State<Arc<AgentMeshRuntime>>) -> Json<Vec<AgentSummary>> {
    let agents = runtime
        .registry()
        .get_all()
        .into_iter()
        .map(|r| AgentSummary {
            id: r.agent_id,
            capabilities: r.capabilities.into_iter().collect(),
            agent_type: r.agent_type,
            status: r.status,
        })
        .collect();
    Json(agents)
}
