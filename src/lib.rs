//! Blind WebSocket relay for end-to-end encrypted ephemeral group chat.
//!
//! Clients encrypt locally; this server only admits sockets under quota,
//! verifies capability tokens, tracks ephemeral room membership in an
//! external key-value store, and fans opaque ciphertext out to the other
//! members of a room. It never inspects, stores, or logs message payloads.

// layers
pub mod domain;
pub mod infrastructure;
pub mod ui;
pub mod usecase;

// shared library
pub mod common;
