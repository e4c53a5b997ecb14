//! Model access for the loop's two roles.
//!
//! [`llm`] is the provider layer: one trait, Anthropic and OpenAI
//! backends, and a scriptable mock for tests. [`extract`] digs structured
//! payloads (JSON objects, unified diffs) out of free-form completions.

pub mod extract;
pub mod llm;

// Re-export canonical LLM types for convenience.
pub use llm::{
    AnthropicProvider, LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse, LlmRole,
    LlmUsageTracker, MockProvider, OpenAiProvider,
};
