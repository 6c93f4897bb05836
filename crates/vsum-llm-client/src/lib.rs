//! Transcript summarization over an OpenAI-compatible chat-completions API.
//!
//! The pipeline depends only on the [`Summarizer`] trait; [`ChatCompletionClient`]
//! is the HTTP implementation.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ChatCompletionClient, DisabledSummarizer, LlmClientConfig, Summarizer, SUMMARY_PROMPT};
pub use error::{LlmError, LlmResult};
pub use types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
