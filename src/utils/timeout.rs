//! Timeout constants and helpers.

use crate::error::{Result, RpcError};
use std::future::Future;
use std::time::Duration;

/// Default time allowed for establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default time allowed for connections to drain after shutdown is requested
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `fut`, turning an elapsed deadline into `RpcError::Timeout(message)`.
pub async fn with_timeout_error<F, T>(fut: F, dur: Duration, message: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(dur, fut).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(message.to_string())),
    }
}
