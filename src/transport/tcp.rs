use crate::error::{constants, Result};
use crate::utils::timeout::with_timeout_error;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, instrument};

/// Bind a TCP listener on `addr` (e.g. `"127.0.0.1:0"`).
#[instrument]
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Listening on TCP");
    Ok(listener)
}

/// Connect to `addr`, failing with `RpcError::Timeout` after `timeout`.
#[instrument(skip(timeout), fields(timeout_ms = timeout.as_millis() as u64))]
pub async fn connect(addr: &str, timeout: Duration) -> Result<TcpStream> {
    let stream = with_timeout_error(
        async { Ok(TcpStream::connect(addr).await?) },
        timeout,
        constants::ERR_CONNECT_TIMEOUT,
    )
    .await?;
    stream.set_nodelay(true)?;
    debug!("Connected");
    Ok(stream)
}
