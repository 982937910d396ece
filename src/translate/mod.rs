//! Translation between the client dialects and the provider.
//!
//! Converts inbound Messages and Chat Completions requests into provider
//! requests, and aggregated provider output back into either dialect, buffered
//! or streamed. All translation functions are pure (no I/O).

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
