//! # Channel
//!
//! Client side of a connection to one service.
//!
//! Opening a channel authenticates (when credentials are given) and synchronizes the
//! service's interface. Calls are then encoded against the method table the host sent:
//!
//! ```rust,no_run
//! use wirecall::service::channel::{Channel, Endpoint};
//!
//! # async fn run() -> wirecall::error::Result<()> {
//! let endpoint = Endpoint::new("127.0.0.1:8098");
//! let mut channel = Channel::connect_tcp(&endpoint, "Calculator").await?;
//!
//! let min = channel.method("Min", &["i32", "i32"])?;
//! let reply = channel.call(&min).arg(&3_i32)?.arg(&7_i32)?.send().await?;
//! assert_eq!(reply.value::<i32>()?, 3);
//!
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! A channel handles one call at a time (`&mut self`). Share it behind a
//! `tokio::sync::Mutex` or open several channels for concurrent callers. Once a
//! connection-level error occurs the channel is unusable and every later call fails
//! with `RpcError::ConnectionClosed`.

use crate::config::{ChannelConfig, MAX_PAYLOAD_SIZE};
use crate::core::codec::ClientCodec;
use crate::core::params::{CompressionPolicy, ParamCodec, Slot};
use crate::core::serialization::SerializationFormat;
use crate::error::{constants, RemoteError, Result, RpcError};
use crate::protocol::message::{Request, Response, ServiceSyncInfo};
use crate::protocol::registry::MethodSpec;
use crate::protocol::zk::{
    client_zk_confirm, client_zk_initiate, client_zk_prove, ZkCredentials, ZkSession,
};
use crate::transport;
use crate::utils::compression::CompressionKind;
use crate::utils::timeout::DEFAULT_CONNECT_TIMEOUT;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

/// Settings for opening a channel on an existing stream.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub credentials: Option<ZkCredentials>,
    pub serialization: SerializationFormat,
    pub compression_kind: CompressionKind,
    pub max_payload_size: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            serialization: SerializationFormat::default(),
            compression_kind: CompressionKind::default(),
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl From<&ChannelConfig> for ChannelOptions {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            credentials: None,
            serialization: config.serialization,
            compression_kind: config.compression_kind,
            max_payload_size: config.max_payload_size,
        }
    }
}

impl ChannelOptions {
    pub fn with_credentials(mut self, credentials: ZkCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct Endpoint {
    address: String,
    connect_timeout: Duration,
    options: ChannelOptions,
}

impl Endpoint {
    /// `address` is `host:port` for TCP or a socket path for Unix domain sockets.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            options: ChannelOptions::default(),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            address: config.address.clone(),
            connect_timeout: config.connect_timeout,
            options: ChannelOptions::from(config),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.options.credentials = Some(ZkCredentials::new(username, password));
        self
    }

    pub fn with_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// A resolved remote method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    ordinal: i32,
    name: String,
    param_count: usize,
}

impl MethodRef {
    pub fn ordinal(&self) -> i32 {
        self.ordinal
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Connection to one remote service.
pub struct Channel<S> {
    framed: Framed<S, ClientCodec>,
    service_name: String,
    sync: ServiceSyncInfo,
    codec: ParamCodec,
    session: Option<ZkSession>,
    poisoned: bool,
}

impl Channel<TcpStream> {
    /// Dial a TCP endpoint and open a channel to `service_name`.
    pub async fn connect_tcp(endpoint: &Endpoint, service_name: &str) -> Result<Self> {
        let stream = transport::tcp::connect(&endpoint.address, endpoint.connect_timeout).await?;
        Self::open(stream, service_name, endpoint.options.clone()).await
    }
}

#[cfg(unix)]
impl Channel<UnixStream> {
    /// Dial a Unix domain socket endpoint and open a channel to `service_name`.
    pub async fn connect_unix(endpoint: &Endpoint, service_name: &str) -> Result<Self> {
        let stream =
            transport::local::connect(Path::new(&endpoint.address), endpoint.connect_timeout)
                .await?;
        Self::open(stream, service_name, endpoint.options.clone()).await
    }
}

async fn roundtrip<S>(framed: &mut Framed<S, ClientCodec>, request: Request) -> Result<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    framed.send(request).await?;
    match framed.next().await {
        Some(response) => response,
        None => Err(RpcError::ConnectionClosed),
    }
}

fn handshake_rejected() -> RpcError {
    RpcError::AuthenticationFailed(constants::ERR_HANDSHAKE_REJECTED.to_string())
}

#[instrument(skip_all, fields(username = %credentials.username()))]
async fn authenticate<S>(
    framed: &mut Framed<S, ClientCodec>,
    credentials: &ZkCredentials,
) -> Result<ZkSession>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (state, init) = client_zk_initiate(credentials)?;
    let (salt, b) = match roundtrip(framed, init).await? {
        Response::ZkInitiate { salt, b } => (salt, b),
        Response::TerminateConnection => return Err(handshake_rejected()),
        _ => return Err(RpcError::UnexpectedMessage),
    };

    let (state, proof) = client_zk_prove(state, &salt, &b)?;
    match roundtrip(framed, proof).await? {
        Response::ZkProof { proof } => client_zk_confirm(state, &proof),
        Response::TerminateConnection => Err(handshake_rejected()),
        _ => Err(RpcError::UnexpectedMessage),
    }
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Authenticate if credentials are given, then synchronize `service_name`.
    #[instrument(skip(stream, options), fields(authenticated = options.credentials.is_some()))]
    pub async fn open(stream: S, service_name: &str, options: ChannelOptions) -> Result<Self> {
        let mut framed = Framed::new(stream, ClientCodec::new(options.max_payload_size));

        let session = match &options.credentials {
            Some(credentials) => Some(authenticate(&mut framed, credentials).await?),
            None => None,
        };

        let name = match &session {
            Some(session) => session.encrypt(service_name.as_bytes())?,
            None => service_name.as_bytes().to_vec(),
        };

        let sync = match roundtrip(&mut framed, Request::SyncInterface { name }).await? {
            Response::SyncInterface { sync } if sync.is_empty() => {
                return Err(RpcError::ServiceNotFound(service_name.to_string()))
            }
            Response::SyncInterface { sync } => {
                let plain = match &session {
                    Some(session) => session.decrypt(&sync)?,
                    None => sync,
                };
                ServiceSyncInfo::decode(&plain)?
            }
            Response::TerminateConnection => return Err(handshake_rejected()),
            _ => return Err(RpcError::UnexpectedMessage),
        };

        let threshold = sync.compression_threshold.max(0) as usize;
        let policy = sync
            .use_compression
            .then(|| CompressionPolicy::new(options.compression_kind, threshold));
        let codec = ParamCodec::new(options.serialization).with_compression(policy);

        debug!(
            service_ordinal = sync.service_ordinal,
            methods = sync.methods.len(),
            "Channel synchronized"
        );

        Ok(Self {
            framed,
            service_name: service_name.to_string(),
            sync,
            codec,
            session,
            poisoned: false,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn sync_info(&self) -> &ServiceSyncInfo {
        &self.sync
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// False once a connection-level error has occurred.
    pub fn is_usable(&self) -> bool {
        !self.poisoned
    }

    /// Resolve a method by name and parameter type names.
    pub fn method<P: AsRef<str>>(&self, name: &str, parameter_types: &[P]) -> Result<MethodRef> {
        let found = self.sync.find_method(name, parameter_types).ok_or_else(|| {
            let signature: Vec<&str> = parameter_types.iter().map(AsRef::as_ref).collect();
            RpcError::VersionMismatch(format!(
                "{}.{}({})",
                self.service_name,
                name,
                signature.join(", ")
            ))
        })?;
        Ok(MethodRef {
            ordinal: found.ordinal,
            name: found.name.clone(),
            param_count: found.parameter_types.len(),
        })
    }

    /// Resolve a method described by the same [`MethodSpec`] the host registered.
    pub fn resolve(&self, spec: &MethodSpec) -> Result<MethodRef> {
        self.method(spec.name(), spec.parameter_types())
    }

    /// Start encoding a call to `method`.
    pub fn call(&mut self, method: &MethodRef) -> Call<'_, S> {
        Call {
            method: method.clone(),
            args: Vec::with_capacity(method.param_count),
            channel: self,
        }
    }

    /// Send an invocation by raw method ordinal, bypassing signature checks.
    pub async fn invoke_ordinal(&mut self, method: i32, args: Vec<Slot>) -> Result<Reply> {
        let label = format!("{}#{method}", self.service_name);
        let result = self.invoke_inner(method, &label, &args).await;
        self.track(result)
    }

    /// Tell the host this connection is done.
    pub async fn close(mut self) -> Result<()> {
        if self.poisoned {
            return Ok(());
        }
        self.framed.send(Request::TerminateConnection).await?;
        debug!(service = %self.service_name, "Channel closed");
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(service = %self.service_name, error = %e, "Channel poisoned");
                self.poisoned = true;
            }
        }
        result
    }

    async fn invoke_inner(&mut self, method: i32, label: &str, args: &[Slot]) -> Result<Reply> {
        if self.poisoned {
            return Err(RpcError::ConnectionClosed);
        }

        let block = self.codec.encode_block(args)?;
        let params = match &self.session {
            Some(session) => session.encrypt(&block)?,
            None => block,
        };

        let request = Request::MethodInvocation {
            service: self.sync.service_ordinal,
            method,
            params,
        };

        match roundtrip(&mut self.framed, request).await? {
            Response::ReturnValues { values } => Ok(Reply {
                codec: self.codec,
                slots: self.codec.decode_block(&self.unseal(values)?)?,
            }),
            Response::ThrowException { values } => {
                let slots = self.codec.decode_block(&self.unseal(values)?)?;
                let record = slots
                    .into_iter()
                    .next()
                    .flatten()
                    .ok_or_else(|| RpcError::DeserializeError("Empty exception record".into()))?;
                let remote: RemoteError = self.codec.deserialize(&record)?;
                Err(RpcError::Remote(remote))
            }
            Response::UnknownMethod => Err(RpcError::VersionMismatch(label.to_string())),
            Response::TerminateConnection => Err(RpcError::ConnectionClosed),
            _ => Err(RpcError::UnexpectedMessage),
        }
    }

    fn unseal(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        match &self.session {
            Some(session) => session.decrypt(&data),
            None => Ok(data),
        }
    }
}

/// One call being encoded. Arguments are added in declaration order.
pub struct Call<'a, S> {
    channel: &'a mut Channel<S>,
    method: MethodRef,
    args: Vec<Slot>,
}

impl<'a, S> Call<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Append a by-value argument.
    pub fn arg<A: Serialize + ?Sized>(mut self, value: &A) -> Result<Self> {
        self.args.push(Some(self.channel.codec.serialize(value)?));
        Ok(self)
    }

    /// Append a by-reference argument; read its new value with [`Reply::out`].
    pub fn arg_ref<A: Serialize + ?Sized>(self, value: &A) -> Result<Self> {
        self.arg(value)
    }

    /// Send the invocation and wait for its reply.
    pub async fn send(self) -> Result<Reply> {
        if self.args.len() != self.method.param_count {
            return Err(RpcError::SerializeError(format!(
                "{} expects {} arguments, got {}",
                self.method.name,
                self.method.param_count,
                self.args.len()
            )));
        }

        let label = format!("{}.{}", self.channel.service_name, self.method.name);
        let result = self
            .channel
            .invoke_inner(self.method.ordinal, &label, &self.args)
            .await;
        self.channel.track(result)
    }
}

/// Values returned by a call: the return value and the by-reference parameters.
#[derive(Debug, Clone)]
pub struct Reply {
    codec: ParamCodec,
    slots: Vec<Slot>,
}

impl Reply {
    /// The return value.
    pub fn value<R: DeserializeOwned>(&self) -> Result<R> {
        self.value_opt()?
            .ok_or_else(|| RpcError::DeserializeError("Method returned no value".to_string()))
    }

    /// The return value, `None` if the method returned nothing.
    pub fn value_opt<R: DeserializeOwned>(&self) -> Result<Option<R>> {
        match self.slots.first() {
            Some(Some(bytes)) => Ok(Some(self.codec.deserialize(bytes)?)),
            _ => Ok(None),
        }
    }

    /// New value of the by-reference parameter at `index` (0-based parameter position).
    pub fn out<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        match self.slots.get(index + 1) {
            Some(Some(bytes)) => self.codec.deserialize(bytes),
            _ => Err(RpcError::DeserializeError(format!(
                "Parameter {index} was not returned by reference"
            ))),
        }
    }

    /// Overwrite `target` with the by-reference parameter at `index`.
    pub fn write_back<T: DeserializeOwned>(&self, index: usize, target: &mut T) -> Result<()> {
        *target = self.out(index)?;
        Ok(())
    }

    /// Number of value slots, the return value included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}
