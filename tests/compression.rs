//! Threshold compression of parameters and return values through a real host.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use wirecall::config::HostConfig;
use wirecall::core::params::{CompressionPolicy, ParamCodec};
use wirecall::core::serialization::SerializationFormat;
use wirecall::service::channel::ChannelOptions;
use wirecall::utils::compression::CompressionKind;
use wirecall::{Channel, Endpoint, Host, Interface, MethodSpec, ServiceOptions};

struct Archive;

fn archive_interface() -> Interface<Archive> {
    Interface::<Archive>::new("IArchive")
        .method(
            MethodSpec::new("Echo").param::<String>().returns::<String>(),
            |_, inv| {
                let text: String = inv.arg(0)?;
                inv.set_return(&text)
            },
        )
        .method(
            MethodSpec::new("Length").param::<String>().returns::<u64>(),
            |_, inv| {
                let text: String = inv.arg(0)?;
                inv.set_return(&(text.len() as u64))
            },
        )
}

fn compressing_config() -> HostConfig {
    HostConfig {
        use_compression: true,
        compression_threshold: 128 * 1024,
        ..HostConfig::default()
    }
}

#[tokio::test]
async fn test_large_string_survives_compression() {
    let mut host = Host::new(compressing_config());
    host.add_service(archive_interface(), Arc::new(Archive))
        .unwrap();
    let running = host.start_tcp("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::new(running.local_addr().unwrap().to_string());

    let mut channel = Channel::connect_tcp(&endpoint, "IArchive").await.unwrap();
    assert!(channel.sync_info().use_compression);
    assert_eq!(channel.sync_info().compression_threshold, 128 * 1024);

    let text = "x".repeat(200 * 1024);
    let length = channel
        .method("Length", &["alloc::string::String"])
        .unwrap();
    let reply = channel
        .call(&length)
        .arg(&text)
        .unwrap()
        .send()
        .await
        .unwrap();
    assert_eq!(reply.value::<u64>().unwrap(), 200 * 1024);

    let echo = channel.method("Echo", &["alloc::string::String"]).unwrap();
    let reply = channel
        .call(&echo)
        .arg(&text)
        .unwrap()
        .send()
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), text);

    // below the threshold nothing is compressed, the call still works
    let reply = channel
        .call(&echo)
        .arg("short")
        .unwrap()
        .send()
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), "short");

    channel.close().await.unwrap();
    running.shutdown().await.unwrap();
}

#[test]
fn test_block_above_threshold_is_smaller() {
    let policy = CompressionPolicy::new(CompressionKind::Lz4, 128 * 1024);
    let plain = ParamCodec::default();
    let compressed = ParamCodec::default().with_compression(Some(policy));

    let slot = plain.serialize(&"a".repeat(200 * 1024)).unwrap();
    let slots = vec![Some(slot), None];

    let raw_block = plain.encode_block(&slots).unwrap();
    let small_block = compressed.encode_block(&slots).unwrap();
    assert!(small_block.len() < raw_block.len() / 10);

    assert_eq!(compressed.decode_block(&small_block).unwrap(), slots);
    // the slot tag tells any reader how to undo it
    assert_eq!(plain.decode_block(&small_block).unwrap(), slots);
}

#[tokio::test]
async fn test_per_service_zstd_and_messagepack() {
    let options = ServiceOptions {
        serialization: SerializationFormat::MessagePack,
        use_compression: true,
        compression_kind: CompressionKind::Zstd,
        compression_threshold: 2048,
    };
    let mut host = Host::new(HostConfig::default());
    host.add_service_with_options(archive_interface(), Arc::new(Archive), options)
        .unwrap();
    let running = host.start();

    let (client, server) = tokio::io::duplex(64 * 1024);
    running.serve(server, "duplex");

    let channel_options = ChannelOptions {
        serialization: SerializationFormat::MessagePack,
        compression_kind: CompressionKind::Zstd,
        ..ChannelOptions::default()
    };
    let mut channel = Channel::open(client, "IArchive", channel_options)
        .await
        .unwrap();
    assert_eq!(channel.sync_info().compression_threshold, 2048);

    let text: String = (0..50_000).map(|i| char::from(b'a' + (i % 7) as u8)).collect();
    let echo = channel.method("Echo", &["alloc::string::String"]).unwrap();
    let reply = channel
        .call(&echo)
        .arg(&text)
        .unwrap()
        .send()
        .await
        .unwrap();
    assert_eq!(reply.value::<String>().unwrap(), text);

    channel.close().await.unwrap();
    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_compression_off_by_default() {
    let mut host = Host::new(HostConfig::default());
    host.add_service(archive_interface(), Arc::new(Archive))
        .unwrap();
    let running = host.start();

    let (client, server) = tokio::io::duplex(64 * 1024);
    running.serve(server, "duplex");
    let channel = Channel::open(client, "IArchive", ChannelOptions::default())
        .await
        .unwrap();

    assert!(!channel.sync_info().use_compression);
    assert_eq!(channel.sync_info().compression_threshold, 131_072);

    channel.close().await.unwrap();
    running.shutdown().await.unwrap();
}
