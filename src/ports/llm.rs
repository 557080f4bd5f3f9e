//! `LLMProvider` port (spec.md §6)

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors an `LLMProvider` implementation may raise.
#[derive(Debug, Error, Clone)]
pub enum LlmError {
    /// The upstream provider is down or refused the connection.
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its configured timeout.
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider replied but the content failed schema validation.
    #[error("LLM returned invalid output: {0}")]
    InvalidOutput(String),
}

/// Model call parameters, serialised deterministically for cache fingerprinting
/// (spec.md §4.6, "Key derivation").
pub type LlmParams = BTreeMap<String, String>;

/// Port to a large-language-model backend.
///
/// The core depends only on this trait; concrete vendor bindings (OpenAI,
/// Anthropic, a local model server…) live outside this crate.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generates a single completion for `prompt`.
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        params: &LlmParams,
        timeout: Duration,
    ) -> Result<String, LlmError>;

    /// Generates completions for a batch of prompts.
    ///
    /// The default implementation calls [`LlmProvider::generate`]
    /// sequentially; providers with native batch APIs should override this.
    async fn generate_batch(
        &self,
        prompts: &[String],
        model: &str,
        params: &LlmParams,
        timeout: Duration,
    ) -> Vec<Result<String, LlmError>> {
        let mut results = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            results.push(self.generate(prompt, model, params, timeout).await);
        }
        results
    }
}
