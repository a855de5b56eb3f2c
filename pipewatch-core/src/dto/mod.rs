//! Data Transfer Objects
//!
//! Wire shapes exchanged with the API server. Every field the backend may
//! omit is optional here; the domain layer decides what absence means.

pub mod resource;
pub mod watch;
