//! Session bridge: one browser connection relayed to one upstream session.
//!
//! The browser and the model talk the same realtime event protocol. The
//! bridge sits in between and
//! - executes tool calls locally and feeds their results back upstream,
//! - hides session configuration (prompt, tool schemas, secrets) from the
//!   browser,
//! - refuses browser attempts to override that configuration.
//!
//! Audio and every other event pass through untouched and in order.

pub mod error;
pub mod events;
pub mod policy;
pub mod session;


pub use error::{BridgeError, BridgeResult};
pub use events::{ClientNotice, SessionSettings, UpstreamCommand};
pub use policy::{
    ClientUpdateReview, DEFAULT_CLIENT_TUNABLE_FIELDS, DEFAULT_SESSION_FIELD_ALLOW_LIST,
    RESERVED_SESSION_FIELDS, SessionPolicy, reserved_fields_in,
};
pub use session::{
    DEFAULT_TOOL_TIMEOUT, SessionBridge, SessionHandle, SessionOptions, SessionSetup,
    SessionStats, SessionStatsSnapshot,
};
