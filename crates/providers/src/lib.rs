//! Language model service implementations for CodeAct.
//!
//! All providers implement the `codeact_core::Provider` trait. One
//! OpenAI-compatible client covers OpenAI, OpenRouter, Ollama, vLLM and
//! other `/chat/completions` endpoints.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
