//! Shared data model and push-channel wire format for Brigade.

pub mod api;
pub mod chat;
pub mod codec;
pub mod location;
pub mod presence;
pub mod push;
