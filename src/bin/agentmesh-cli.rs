//! Agent Mesh CLI
//!
//! Command-line interface for driving a conversational turn against a
//! locally-constructed runtime, without standing up the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use agentmesh_core::config::AppConfig;
use agentmesh_core::domain_types::UserId;
use agentmesh_core::ports::llm::{LlmError, LlmParams};
use agentmesh_core::ports::LlmProvider;
use agentmesh_core::runtime::AgentMeshRuntime;
use clap::Parser;

/// Agent Mesh CLI - command-line interface for the orchestration runtime.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// The user query to send as a single conversational turn.
    query: String,

    /// User ID to attribute the turn to.
    #[arg(long, default_value = "cli-user")]
    user: String,

    /// Model identifier passed to the `LLMProvider`.
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,
}

struct NullLlmProvider;

#[async_trait::async_trait]
impl LlmProvider for NullLlmProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _model: &str,
        _params: &LlmParams,
        _timeout: Duration,
    ) -> Result<String, LlmError> {
        Ok("[]".to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::development(args.model);
    let runtime = AgentMeshRuntime::new(config, Arc::new(NullLlmProvider), None, None);
    runtime.start();

    let user_id = UserId::try_new(args.user)?;
    let result = runtime.handle_turn(None, user_id, args.query).await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    runtime.shutdown().await;
    Ok(())
}
