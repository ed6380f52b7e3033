pub mod bridge;
pub mod credential;
pub mod email;
pub mod realtime;
pub mod search;
pub mod tools;

// Re-export commonly used types for convenience
pub use bridge::{
    BridgeError, BridgeResult, SessionBridge, SessionHandle, SessionOptions, SessionPolicy,
    SessionSetup, SessionStatsSnapshot,
};

pub use credential::{AuthToken, Credential, CredentialError, IdentityCredential, KeyCredential};

pub use realtime::{
    EventLink, RealtimeConnector, RealtimeError, RealtimeProvider, RealtimeResult,
    UpstreamConfig, UpstreamConnector,
};

pub use tools::{
    GroundingTracker, ToolContext, ToolDependencies, ToolError, ToolHandler, ToolOutput,
    ToolRegistry, standard_registry,
};
