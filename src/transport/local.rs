//! Unix domain socket transport for same-machine IPC.

#[cfg(unix)]
use crate::error::{constants, Result};
#[cfg(unix)]
use crate::utils::timeout::with_timeout_error;
#[cfg(unix)]
use std::path::Path;
#[cfg(unix)]
use std::time::Duration;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
#[cfg(unix)]
use tracing::{debug, error, info, instrument};

/// Bind a Unix domain socket, replacing a stale socket file at `path`.
#[cfg(unix)]
#[instrument(skip(path), fields(socket_path = %path.as_ref().display()))]
pub async fn bind<P: AsRef<Path>>(path: P) -> Result<UnixListener> {
    if path.as_ref().exists() {
        tokio::fs::remove_file(&path).await.ok();
    }

    let listener = UnixListener::bind(&path)?;
    info!("Listening on unix socket");
    Ok(listener)
}

/// Connect to a Unix domain socket, failing with `RpcError::Timeout` after `timeout`.
#[cfg(unix)]
#[instrument(skip(path, timeout), fields(socket_path = %path.as_ref().display()))]
pub async fn connect<P: AsRef<Path>>(path: P, timeout: Duration) -> Result<UnixStream> {
    let stream = with_timeout_error(
        async { Ok(UnixStream::connect(path.as_ref()).await?) },
        timeout,
        constants::ERR_CONNECT_TIMEOUT,
    )
    .await?;
    debug!("Connected");
    Ok(stream)
}

/// Remove the socket file left behind by a listener.
#[cfg(unix)]
pub async fn cleanup<P: AsRef<Path>>(path: P) {
    let path = path.as_ref();
    if path.exists() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            error!(error = %e, path = %path.display(), "Failed to remove socket file");
        } else {
            info!(path = %path.display(), "Removed socket file");
        }
    }
}
