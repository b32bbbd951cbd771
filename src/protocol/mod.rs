//! # Protocol Layer
//!
//! Message types, the zero-knowledge handshake, the service registry and the
//! per-connection dispatcher.
//!
//! ## Connection Lifecycle
//! 1. Optional `ZkInitiate` / `ZkProof` exchange establishing a session key
//! 2. `SyncInterface` per service the client wants to call
//! 3. Any number of `MethodInvocation` requests, answered in order
//! 4. `TerminateConnection` or the peer hanging up
//!
//! When a session key exists every payload after the handshake is encrypted, except
//! the empty "service not found" sync reply.

pub mod dispatcher;
pub mod message;
pub mod registry;
pub mod zk;

#[cfg(test)]
mod tests;
