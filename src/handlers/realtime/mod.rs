//! Realtime WebSocket relay endpoint
//!
//! The browser speaks the realtime event protocol directly. Every text frame
//! is relayed to an upstream session through a [`crate::core::bridge::SessionBridge`],
//! which runs tools locally and keeps session configuration server-side.

mod handler;

pub use handler::realtime_handler;
