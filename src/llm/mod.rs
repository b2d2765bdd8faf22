//! Vision-language model access.
//!
//! Requests go through [`ModelClient`], which is generic over a
//! [`ChatCompletionProvider`] so the synthesizer and decomposer can be exercised
//! against scripted providers. [`OpenAiChatProvider`] is the production
//! provider backed by `async-openai`.

pub mod client;
pub mod error;
pub mod openai;
pub mod prompts;
pub mod provider;

pub use client::{ChatCompletionOptions, MetricsCallback, ModelClient};
pub use error::ModelError;
pub use openai::OpenAiChatProvider;
pub use provider::ChatCompletionProvider;
