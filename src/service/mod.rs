//! # Service Layer
//!
//! High-level entry points: [`host::Host`] serves registered services and
//! [`channel::Channel`] calls them.

pub mod channel;
pub mod host;
