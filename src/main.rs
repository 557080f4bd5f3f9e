//! Agent Mesh - core orchestration runtime server
//!
//! Main entry point: wires the seven components, starts background
//! sweepers, and serves the REST observability API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use agentmesh_core::config::AppConfig;
use agentmesh_core::ports::llm::{LlmError, LlmParams};
use agentmesh_core::ports::LlmProvider;
use agentmesh_core::rest_api::start_server;
use agentmesh_core::runtime::AgentMeshRuntime;

/// Placeholder `LLMProvider` that always returns an empty plan. Replace with
/// a concrete vendor binding before deploying against real traffic; the
/// core never depends on one directly (spec.md §6).
struct NullLlmProvider;

#[async_trait::async_trait]
impl LlmProvider for NullLlmProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _model: &str,
        _params: &LlmParams,
        _timeout: std::time::Duration,
    ) -> Result<String, LlmError> {
        Ok("[]".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agentmesh_core=info".parse()?),
        )
        .init();

    info!("starting agent-mesh orchestration runtime");

    let config = AppConfig::production("gpt-4o-mini");
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let runtime = AgentMeshRuntime::new(config, Arc::new(NullLlmProvider), None, None);
    runtime.start();

    info!("REST API server listening on http://{addr}");
    start_server(runtime, addr).await.map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
