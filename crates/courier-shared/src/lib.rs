//! # courier-shared
//!
//! Domain value types and the WebSocket wire protocol shared between the
//! store and the server.
//!
//! Every payload that crosses the socket is an explicit tagged enum variant
//! ([`events::ClientEvent`] / [`events::ServerEvent`]), validated at the
//! boundary by serde so a malformed frame can never reach the stores.

pub mod events;
pub mod types;

pub use events::{ClientEvent, ServerEvent};
pub use types::*;
