//! Upstream realtime link.
//!
//! The relay speaks the Realtime API event protocol to either Azure OpenAI or
//! OpenAI. This module only owns the transport: opening the socket with the
//! right URL and credentials and exposing it as an [`EventLink`]. Event
//! semantics live in [`crate::core::bridge`].

pub mod base;
pub mod client;
pub mod config;

pub use base::{EventLink, LINK_CHANNEL_CAPACITY, RealtimeError, RealtimeResult, UpstreamConnector};
pub use client::RealtimeConnector;
pub use config::{
    AZURE_REALTIME_PATH, DEFAULT_AZURE_API_VERSION, OPENAI_REALTIME_URL, RealtimeProvider,
    UpstreamConfig,
};
