//! # HTTP Request Handlers
//!
//! REST endpoints for the relay. The realtime WebSocket endpoint lives in
//! the top-level `websocket` module; everything request/response-shaped
//! lives here.

pub mod transcribe;

pub use transcribe::transcribe_file;
