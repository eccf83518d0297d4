//! Brigade server library.
//!
//! Exposes the server for use in tests and embedding. The server accepts
//! location reports over HTTP and the `/ws` push channel, keeps the latest
//! position per member, and fans complete presence snapshots out to every
//! push subscriber. It also keeps chat history with per-member unread
//! counters.

pub mod api;
pub mod chat;
pub mod config;
pub mod hub;
pub mod push;
pub mod registry;
pub mod server;
