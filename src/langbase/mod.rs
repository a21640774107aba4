//! Langbase Pipes client: the HTTP-backed [`ReasoningProvider`](crate::providers::ReasoningProvider).

mod client;
mod types;

pub use client::LangbaseClient;
pub use types::{
    extract_json, parse_candidates, CreatePipeRequest, CreatePipeResponse, Message, MessageRole,
    PipeRequest, PipeResponse, RawResponse, Usage,
};
