//! # Session Management
//!
//! Realtime relay sessions: the supported-language table and the bounded
//! registry of concurrently active sessions. The per-connection session
//! state machine itself lives in the websocket module.

pub mod language;
pub mod registry;

pub use language::Language;
pub use registry::SessionRegistry;
