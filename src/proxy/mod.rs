//! HTTP relay module.
//!
//! Accepts chat requests, answers known prompts from the interception table
//! and streams everything else from the upstream provider as raw text.

mod handlers;
mod server;
pub mod stream;
pub mod types;
pub mod upstream;

pub use server::{create_router, run_server, AppState, RequestId, REQUEST_ID_HEADER};
pub use stream::{
    decode_events, extract_delta, relay_fragments, DeltaFragment, SseDecoder, StreamEvent,
};
pub use types::{ChatMessage, ChatRequest, Role, UpstreamRequest};
pub use upstream::UpstreamClient;
