//! # courier-store
//!
//! Durable storage for the chat backend, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model: users and block lists, conversations with per-member state,
//! messages with release gating and soft deletes, the pending-delivery
//! queue, and call records.
//!
//! All counter and release-flag mutations are expressed as single SQL
//! statements (atomic at the row level) rather than read-modify-write at
//! the application layer, so they stay correct under concurrent senders.

pub mod calls;
pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod pending;
pub mod reactions;
pub mod users;

mod error;

pub use chats::RemovalOutcome;
pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
