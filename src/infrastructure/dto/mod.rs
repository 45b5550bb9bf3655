//! Data Transfer Objects (DTOs) for the relay.
//!
//! DTOs are organized by protocol:
//! - `websocket`: WebSocket wire envelopes and frames
//! - `http`: HTTP API response DTOs
//!
//! The frame parser here is the only place in the repository that names
//! wire tags; everything else matches on the typed variants.

pub mod http;
pub mod websocket;
