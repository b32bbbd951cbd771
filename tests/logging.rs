//! Logger installation. Kept in its own test binary since the subscriber is global.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use wirecall::config::{HostConfig, LoggingConfig};
use wirecall::utils::logging::init_logging;
use wirecall::{Channel, Endpoint, Host, Interface, MethodSpec, RpcError};

struct Echo;

#[tokio::test]
async fn test_console_and_file_logging_together() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wirecall.log");

    let config = LoggingConfig {
        log_level: tracing::Level::DEBUG,
        log_to_console: true,
        log_to_file: true,
        log_file_path: Some(path.to_string_lossy().to_string()),
        ..LoggingConfig::default()
    };
    assert!(config.validate().is_empty());
    init_logging(&config).unwrap();

    // a second global subscriber is refused
    assert!(matches!(
        init_logging(&config),
        Err(RpcError::ConfigError(_))
    ));

    let mut host = Host::new(HostConfig::default());
    host.add_service(
        Interface::<Echo>::new("IEcho").method(
            MethodSpec::new("Say").param::<String>().returns::<String>(),
            |_, inv| {
                let text: String = inv.arg(0)?;
                inv.set_return(&text)
            },
        ),
        Arc::new(Echo),
    )
    .unwrap();
    let running = host.start_tcp("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::new(running.local_addr().unwrap().to_string());
    let channel = Channel::connect_tcp(&endpoint, "IEcho").await.unwrap();
    channel.close().await.unwrap();
    running.shutdown().await.unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("Logging initialized"));
    // the console layer is installed alongside the file layer
    assert!(written.contains("console=true"));
    assert!(written.contains("file=true"));
    assert!(written.contains("Listening on TCP"));
    assert!(written.contains("Interface synchronized"));
}
