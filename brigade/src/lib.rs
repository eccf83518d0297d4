//! Brigade client: live presence and notification sync for a volunteer fire
//! brigade.
//!
//! A [`session::Session`] keeps a member's view of the brigade current. It
//! receives presence snapshots over a supervised push channel
//! ([`transport`]), polls the REST API as a second feed ([`poller`]), keeps
//! the unread private-message count fresh ([`notify`]), and reports the
//! device's own position upstream ([`reporter`]).

pub mod api;
pub mod config;
pub mod location;
pub mod notify;
pub mod poller;
pub mod presence;
pub mod reporter;
pub mod session;
pub mod transport;
