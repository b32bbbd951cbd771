//! # wirecall
//!
//! Interface-shaped remote procedure calls over stream transports.
//!
//! A host registers service singletons under interface names. A client opens a
//! [`Channel`] to one of them, learns its method table with a single round trip and then
//! invokes methods by ordinal. Arguments and return values are serialized per slot,
//! large slots are compressed past a configurable threshold, and by-reference
//! parameters travel back with the return value.
//!
//! Connections can be authenticated with a password-based zero-knowledge exchange;
//! afterwards every payload is encrypted with the agreed session key.
//!
//! ## Layout
//! - [`core`]: wire primitives, frame codec, parameter blocks, serializers
//! - [`protocol`]: messages, handshake, registry, dispatcher
//! - [`service`]: [`Host`] and [`Channel`]
//! - [`transport`]: TCP and Unix domain sockets
//! - [`utils`]: compression, crypto, logging, statistics, timeouts
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use wirecall::{Channel, Endpoint, Host, HostConfig, Interface, MethodSpec};
//!
//! struct Calculator;
//!
//! # async fn run() -> wirecall::Result<()> {
//! let mut host = Host::new(HostConfig::default());
//! host.add_service(
//!     Interface::<Calculator>::new("Calculator").method(
//!         MethodSpec::new("Max").param::<i32>().param::<i32>().returns::<i32>(),
//!         |_, inv| {
//!             let a: i32 = inv.arg(0)?;
//!             let b: i32 = inv.arg(1)?;
//!             inv.set_return(&a.max(b))
//!         },
//!     ),
//!     Arc::new(Calculator),
//! )?;
//! let running = host.start_tcp("127.0.0.1:0").await?;
//! let addr = running.local_addr().map(|a| a.to_string()).unwrap_or_default();
//!
//! let mut channel = Channel::connect_tcp(&Endpoint::new(addr), "Calculator").await?;
//! let max = channel.method("Max", &["i32", "i32"])?;
//! let reply = channel.call(&max).arg(&4_i32)?.arg(&9_i32)?.send().await?;
//! assert_eq!(reply.value::<i32>()?, 9);
//!
//! channel.close().await?;
//! running.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::{ChannelConfig, HostConfig, LoggingConfig, RpcConfig};
pub use error::{RemoteError, Result, RpcError};
pub use protocol::registry::{
    Interface, Invocation, InvokeError, MethodSpec, ServiceOptions, ServiceRegistry,
};
pub use protocol::zk::{InMemoryZkRepository, ZkCredentials, ZkPasswordHash, ZkRepository};
pub use service::channel::{Call, Channel, ChannelOptions, Endpoint, MethodRef, Reply};
pub use service::host::{Host, RunningHost};
