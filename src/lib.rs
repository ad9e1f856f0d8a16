//! promptrelay - streaming chat-completion relay
//!
//! This library provides the core of the relay: configuration, credential
//! pooling, the canned-response interception table, and the SSE-to-text
//! streaming pipeline behind the HTTP endpoint.

pub mod config;
pub mod credentials;
pub mod error;
pub mod intercept;
pub mod proxy;

pub use config::Config;
pub use error::{RelayError, Result};
