//! Per-connection request loop.
//!
//! Reads one request frame at a time, answers it, and goes back to waiting. A handshake
//! failure, a malformed frame or an I/O error ends the connection; an unknown method or
//! a failing service method does not.

use crate::core::codec::ServerCodec;
use crate::error::{constants, Result, RpcError};
use crate::protocol::message::{Request, Response};
use crate::protocol::registry::{InvokeError, ServiceRegistry};
use crate::protocol::zk::{
    server_zk_respond, server_zk_verify, ServerZkState, ZkRepository, ZkSession,
};
use crate::utils::metrics::{StatsSink, Timer, CATEGORY_INVOKE, CATEGORY_SYNC};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

/// What the loop does after a request has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

#[derive(Default)]
struct ConnectionState {
    pending: Option<ServerZkState>,
    session: Option<ZkSession>,
}

impl ConnectionState {
    fn open(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        match &self.session {
            Some(session) => session.decrypt(&data),
            None => Ok(data),
        }
    }

    fn seal(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        match &self.session {
            Some(session) => session.encrypt(&data),
            None => Ok(data),
        }
    }
}

/// Serves connections against a started registry.
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    zk_repository: Option<Arc<dyn ZkRepository>>,
    stats: Arc<dyn StatsSink>,
    max_payload_size: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        zk_repository: Option<Arc<dyn ZkRepository>>,
        stats: Arc<dyn StatsSink>,
        max_payload_size: usize,
    ) -> Self {
        Self {
            registry,
            zk_repository,
            stats,
            max_payload_size,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &dyn StatsSink {
        self.stats.as_ref()
    }

    /// Serve one connection until the peer leaves, an error occurs or `shutdown` fires.
    ///
    /// A request that is already being dispatched when shutdown fires is answered first.
    #[instrument(skip_all, fields(peer = %peer))]
    pub async fn run<S>(
        &self,
        stream: S,
        peer: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut framed = Framed::new(stream, ServerCodec::new(self.max_payload_size));
        let mut conn = ConnectionState::default();

        self.stats.connection_opened();
        let result = self.serve_frames(&mut framed, &mut conn, &mut shutdown).await;
        self.stats.connection_closed();

        if let Err(e) = &result {
            if !matches!(e, RpcError::AuthenticationFailed(_)) {
                self.stats.protocol_error();
            }
        }
        result
    }

    async fn serve_frames<S>(
        &self,
        framed: &mut Framed<S, ServerCodec>,
        conn: &mut ConnectionState,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        loop {
            if *shutdown.borrow() {
                debug!("Host shutting down, closing connection");
                return Ok(());
            }

            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // host handle dropped
                        return Ok(());
                    }
                    continue;
                }
                frame = framed.next() => frame,
            };

            let request = match next {
                None => {
                    debug!("Peer closed connection");
                    return Ok(());
                }
                Some(frame) => frame?,
            };

            if self.handle(request, framed, conn).await? == Flow::Close {
                debug!("Peer terminated connection");
                return Ok(());
            }
        }
    }

    async fn handle<S>(
        &self,
        request: Request,
        framed: &mut Framed<S, ServerCodec>,
        conn: &mut ConnectionState,
    ) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        match request {
            Request::TerminateConnection => Ok(Flow::Close),
            Request::ZkInitiate { username, a } => {
                self.on_zk_initiate(&username, &a, framed, conn).await
            }
            Request::ZkProof { proof } => self.on_zk_proof(&proof, framed, conn).await,
            Request::SyncInterface { name } => {
                self.require_session(conn)?;
                self.on_sync(name, framed, conn).await
            }
            Request::MethodInvocation {
                service,
                method,
                params,
            } => {
                self.require_session(conn)?;
                self.on_invoke(service, method, params, framed, conn).await
            }
        }
    }

    fn require_session(&self, conn: &ConnectionState) -> Result<()> {
        if self.zk_repository.is_some() && conn.session.is_none() {
            warn!("Request before authentication");
            return Err(RpcError::AuthenticationFailed(
                constants::ERR_SESSION_REQUIRED.to_string(),
            ));
        }
        Ok(())
    }

    async fn on_zk_initiate<S>(
        &self,
        username: &str,
        a: &[u8],
        framed: &mut Framed<S, ServerCodec>,
        conn: &mut ConnectionState,
    ) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        conn.session = None;
        let result = match &self.zk_repository {
            Some(repository) => server_zk_respond(repository.as_ref(), username, a),
            None => Err(RpcError::AuthenticationFailed(
                "Host does not accept zero-knowledge authentication".to_string(),
            )),
        };

        match result {
            Ok((state, reply)) => {
                conn.pending = Some(state);
                framed.send(reply).await?;
                Ok(Flow::Continue)
            }
            Err(e) => self.reject(framed, e).await,
        }
    }

    async fn on_zk_proof<S>(
        &self,
        proof: &[u8],
        framed: &mut Framed<S, ServerCodec>,
        conn: &mut ConnectionState,
    ) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some(state) = conn.pending.take() else {
            let err = RpcError::AuthenticationFailed(constants::ERR_PROOF_WITHOUT_INIT.to_string());
            return self.reject(framed, err).await;
        };

        match server_zk_verify(state, proof) {
            Ok((session, reply)) => {
                debug!(username = %session.username(), "Client authenticated");
                conn.session = Some(session);
                self.stats.handshake_finished(true);
                framed.send(reply).await?;
                Ok(Flow::Continue)
            }
            Err(e) => self.reject(framed, e).await,
        }
    }

    async fn reject<S>(&self, framed: &mut Framed<S, ServerCodec>, err: RpcError) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.stats.handshake_finished(false);
        warn!(error = %err, "Handshake rejected");
        if let Err(e) = framed.send(Response::TerminateConnection).await {
            debug!(error = %e, "Could not notify peer of rejection");
        }
        Err(err)
    }

    async fn on_sync<S>(
        &self,
        name: Vec<u8>,
        framed: &mut Framed<S, ServerCodec>,
        conn: &mut ConnectionState,
    ) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let name = String::from_utf8(conn.open(name)?)
            .map_err(|_| RpcError::InvalidFrame(constants::ERR_INVALID_UTF8.to_string()))?;
        let timer = Timer::start(CATEGORY_SYNC, &name);

        let sync = match self.registry.service(&name) {
            Some(entry) => {
                debug!(service = %name, "Interface synchronized");
                conn.seal(entry.sync_bytes().to_vec())?
            }
            None => {
                debug!(service = %name, "Service not found");
                Vec::new()
            }
        };

        framed.send(Response::SyncInterface { sync }).await?;
        timer.finish(self.stats.as_ref());
        Ok(Flow::Continue)
    }

    async fn on_invoke<S>(
        &self,
        service: i32,
        method: i32,
        params: Vec<u8>,
        framed: &mut Framed<S, ServerCodec>,
        conn: &mut ConnectionState,
    ) -> Result<Flow>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let Some((entry, target)) = self.registry.resolve(service, method) else {
            debug!(service, method, "Unknown method");
            framed.send(Response::UnknownMethod).await?;
            return Ok(Flow::Continue);
        };

        let call_name = format!("{}.{}", entry.descriptor().name, target.name);
        let timer = Timer::start(CATEGORY_INVOKE, &call_name);
        let codec = entry.codec();

        let args = codec.decode_block(&conn.open(params)?)?;
        if args.len() != target.parameter_types.len() {
            return Err(RpcError::InvalidFrame(format!(
                "{call_name} takes {} arguments, got {}",
                target.parameter_types.len(),
                args.len()
            )));
        }

        let response = match entry.invoke(target, args).await {
            Ok(invocation) => Response::ReturnValues {
                values: conn.seal(codec.encode_block(&invocation.into_reply_slots())?)?,
            },
            Err(InvokeError::Remote(err)) => {
                debug!(method = %call_name, kind = %err.kind, error = %err.message, "Service method failed");
                let record = codec.serialize(&err)?;
                Response::ThrowException {
                    values: conn.seal(codec.encode_block(&[Some(record)])?)?,
                }
            }
            Err(InvokeError::Codec(e)) => {
                warn!(method = %call_name, error = %e, "Invocation could not be completed");
                return Err(e);
            }
        };

        framed.send(response).await?;
        timer.finish(self.stats.as_ref());
        Ok(Flow::Continue)
    }
}
