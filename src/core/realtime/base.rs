//! Base types for the upstream realtime link.
//!
//! The bridge never touches a socket directly. Every duplex connection, the
//! upstream model as well as the browser client, is presented as an
//! [`EventLink`]: a pair of mpsc channels carrying JSON text frames.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel capacity for the frames of one link direction.
pub const LINK_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while opening or driving the upstream link.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Credential could not be resolved or was refused
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Event Link
// =============================================================================

/// One side of a duplex stream of JSON text frames.
///
/// `sender` pushes frames towards the peer, `receiver` yields frames the peer
/// produced. Dropping the sender is how a side signals close.
#[derive(Debug)]
pub struct EventLink {
    pub sender: mpsc::Sender<String>,
    pub receiver: mpsc::Receiver<String>,
}

impl EventLink {
    pub fn new(sender: mpsc::Sender<String>, receiver: mpsc::Receiver<String>) -> Self {
        Self { sender, receiver }
    }

    /// Two connected ends: frames sent on one are received on the other.
    pub fn duplex(capacity: usize) -> (EventLink, EventLink) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (EventLink::new(a_tx, a_rx), EventLink::new(b_tx, b_rx))
    }

    pub fn split(self) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        (self.sender, self.receiver)
    }
}

// =============================================================================
// Connector Trait
// =============================================================================

/// Opens a fresh upstream session.
///
/// Each call yields an independent link. Implementations own the transport
/// task; the link closes when either the transport ends or the returned
/// sender is dropped.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self) -> RealtimeResult<EventLink>;

    /// Human readable target, used in logs.
    fn describe(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplex_links_are_crossed() {
        let (mut left, mut right) = EventLink::duplex(4);

        left.sender.send("ping".to_string()).await.unwrap();
        assert_eq!(right.receiver.recv().await.as_deref(), Some("ping"));

        right.sender.send("pong".to_string()).await.unwrap();
        assert_eq!(left.receiver.recv().await.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_dropping_sender_closes_peer() {
        let (left, mut right) = EventLink::duplex(4);
        let (sender, _receiver) = left.split();
        drop(sender);
        assert!(right.receiver.recv().await.is_none());
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionFailed("refused".to_string());
        assert_eq!(err.to_string(), "Connection failed: refused");
    }
}
