//! # Upstream Provider Connections
//!
//! Everything that talks to the Speechmatics APIs:
//! - `client`: one realtime WebSocket connection per relay session
//! - `messages`: the realtime wire vocabulary (both directions)
//! - `batch`: the batch job API used by the file transcription endpoint

pub mod batch;
pub mod client;
pub mod messages;
