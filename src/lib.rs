//! # Agent Mesh Core - agent-mesh orchestration runtime
//!
//! A core orchestration runtime for conversational multi-agent systems:
//! topic-based pub/sub (Event Bus), a capability-indexed directory of live
//! agents (Agent Registry), an LLM-driven planner that dispatches tasks
//! across the mesh and composes their results (Orchestrator), request/
//! response correlation for asynchronous agent replies (Correlation
//! Tracker), retry/circuit-breaker/reprompt resilience (Resilience Layer),
//! a two-tier response cache (Response Cache), and per-session
//! conversational context (Conversation Memory).
//!
//! ## Architecture
//!
//! Every component depends only on the ports in [`ports`] for its external
//! collaborators (an LLM vendor, a blob store, a clock) — never on a
//! concrete binding — so the core stays testable and deployment-agnostic.
//! [`runtime::AgentMeshRuntime`] wires the seven components together and is
//! the entry point an embedding binary uses:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentmesh_core::config::AppConfig;
//! use agentmesh_core::domain_types::UserId;
//! use agentmesh_core::ports::llm::{LlmError, LlmParams, LlmProvider};
//! use agentmesh_core::runtime::AgentMeshRuntime;
//!
//! struct EchoLlm;
//!
//! #[async_trait::async_trait]
//! impl LlmProvider for EchoLlm {
//!     async fn generate(
//!         &self,
//!         _prompt: &str,
//!         _model: &str,
//!         _params: &LlmParams,
//!         _timeout: std::time::Duration,
//!     ) -> Result<String, LlmError> {
//!         Ok("[]".to_string())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::development("gpt-4o-mini");
//!     let runtime = AgentMeshRuntime::new(config, Arc::new(EchoLlm), None, None);
//!     runtime.start();
//!
//!     let user = UserId::try_new("demo-user".to_string()).unwrap();
//!     let result = runtime.handle_turn(None, user, "hello".to_string()).await;
//!     println!("{}", result.answer);
//!
//!     runtime.shutdown().await;
//! }
//! ```

pub mod domain_types;
pub mod error;
pub mod ports;

pub mod cache;
pub mod correlation;
pub mod event_bus;
pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod resilience;

pub mod config;
pub mod rest_api;
pub mod runtime;

pub use error::CaxtonError;
