// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::codec::ClientCodec;
use crate::core::params::ParamCodec;
use crate::error::{constants, RpcError};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::{Request, Response, ServiceSyncInfo};
use crate::protocol::registry::{Interface, MethodSpec, ServiceRegistry};
use crate::protocol::zk::{InMemoryZkRepository, ZkCredentials, ZkRepository};
use crate::service::channel::{Channel, ChannelOptions};
use crate::utils::metrics::{Metrics, StatsSink};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

const USER: &str = "myuser@userdomain.com";
const PASSWORD: &str = "cc3a6a12-0e5b-47fb-ae45-3485e34582d4";

struct Calculator;

fn calculator() -> Interface<Calculator> {
    Interface::<Calculator>::new("Calculator")
        .method(
            MethodSpec::new("Min").param::<i32>().param::<i32>().returns::<i32>(),
            |_, inv| {
                let a: i32 = inv.arg(0)?;
                let b: i32 = inv.arg(1)?;
                inv.set_return(&a.min(b))
            },
        )
        .method(
            MethodSpec::new("Max").param::<i32>().param::<i32>().returns::<i32>(),
            |_, inv| {
                let a: i32 = inv.arg(0)?;
                let b: i32 = inv.arg(1)?;
                inv.set_return(&a.max(b))
            },
        )
}

struct Harness {
    metrics: Arc<Metrics>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<crate::error::Result<()>>,
}

fn serve(repository: Option<InMemoryZkRepository>) -> (DuplexStream, Harness) {
    let mut registry = ServiceRegistry::default();
    registry
        .register(calculator(), Arc::new(Calculator))
        .unwrap();
    registry.start();

    let metrics = Arc::new(Metrics::new());
    let stats: Arc<dyn StatsSink> = metrics.clone();
    let repository = repository.map(|r| Arc::new(r) as Arc<dyn ZkRepository>);
    let dispatcher = Dispatcher::new(Arc::new(registry), repository, stats, MAX_PAYLOAD_SIZE);

    let (client, server) = tokio::io::duplex(64 * 1024);
    let (shutdown, rx) = watch::channel(false);
    let server = tokio::spawn(async move { dispatcher.run(server, "duplex", rx).await });

    (
        client,
        Harness {
            metrics,
            shutdown,
            server,
        },
    )
}

fn users() -> InMemoryZkRepository {
    let mut repository = InMemoryZkRepository::new();
    repository.add_user(USER, PASSWORD).unwrap();
    repository
}

async fn ask(framed: &mut Framed<DuplexStream, ClientCodec>, request: Request) -> Response {
    framed.send(request).await.unwrap();
    framed.next().await.expect("reply").unwrap()
}

fn params(values: &[i32]) -> Vec<u8> {
    let codec = ParamCodec::default();
    let slots: Vec<_> = values
        .iter()
        .map(|v| Some(codec.serialize(v).unwrap()))
        .collect();
    codec.encode_block(&slots).unwrap()
}

#[tokio::test]
async fn test_sync_then_invoke_by_ordinal() {
    let (client, harness) = serve(None);
    let mut framed = Framed::new(client, ClientCodec::default());

    let sync = match ask(&mut framed, Request::SyncInterface { name: b"Calculator".to_vec() }).await
    {
        Response::SyncInterface { sync } => ServiceSyncInfo::decode(&sync).unwrap(),
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(sync.service_ordinal, 0);
    let max = sync.find_method("Max", &["i32", "i32"]).unwrap();
    assert_eq!(max.ordinal, 1);

    let request = Request::MethodInvocation {
        service: sync.service_ordinal,
        method: max.ordinal,
        params: params(&[3, 9]),
    };
    match ask(&mut framed, request).await {
        Response::ReturnValues { values } => {
            let codec = ParamCodec::default();
            let slots = codec.decode_block(&values).unwrap();
            assert_eq!(slots.len(), 3);
            let ret: i32 = codec.deserialize(slots[0].as_deref().unwrap()).unwrap();
            assert_eq!(ret, 9);
            assert!(slots[1].is_none() && slots[2].is_none());
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    framed.send(Request::TerminateConnection).await.unwrap();
    assert!(harness.server.await.unwrap().is_ok());
    assert_eq!(harness.metrics.snapshot().invocations_total, 1);
}

#[tokio::test]
async fn test_unknown_service_gets_empty_sync() {
    let (client, harness) = serve(None);
    let mut framed = Framed::new(client, ClientCodec::default());

    match ask(&mut framed, Request::SyncInterface { name: b"Nope".to_vec() }).await {
        Response::SyncInterface { sync } => assert!(sync.is_empty()),
        other => panic!("unexpected reply: {other:?}"),
    }

    drop(framed);
    assert!(harness.server.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_unknown_method_keeps_connection_open() {
    let (client, _harness) = serve(None);
    let mut framed = Framed::new(client, ClientCodec::default());

    for (service, method) in [(0, 7), (3, 0), (-1, -1)] {
        let request = Request::MethodInvocation {
            service,
            method,
            params: params(&[1, 2]),
        };
        assert_eq!(ask(&mut framed, request).await, Response::UnknownMethod);
    }

    let request = Request::MethodInvocation {
        service: 0,
        method: 0,
        params: params(&[1, 2]),
    };
    assert!(matches!(
        ask(&mut framed, request).await,
        Response::ReturnValues { .. }
    ));
}

#[tokio::test]
async fn test_wrong_argument_count_closes_connection() {
    let (client, harness) = serve(None);
    let mut framed = Framed::new(client, ClientCodec::default());

    let request = Request::MethodInvocation {
        service: 0,
        method: 0,
        params: params(&[1]),
    };
    framed.send(request).await.unwrap();
    assert!(framed.next().await.is_none());
    assert!(matches!(
        harness.server.await.unwrap(),
        Err(RpcError::InvalidFrame(_))
    ));
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (mut client, harness) = serve(None);
    client.write_all(&99_i32.to_le_bytes()).await.unwrap();
    client.flush().await.unwrap();

    assert!(matches!(
        harness.server.await.unwrap(),
        Err(RpcError::InvalidFrame(_))
    ));
    assert_eq!(harness.metrics.snapshot().protocol_errors, 1);
}

#[tokio::test]
async fn test_request_before_authentication_is_rejected() {
    let (client, harness) = serve(Some(users()));
    let mut framed = Framed::new(client, ClientCodec::default());

    framed
        .send(Request::SyncInterface { name: b"Calculator".to_vec() })
        .await
        .unwrap();
    assert!(framed.next().await.is_none());

    match harness.server.await.unwrap() {
        Err(RpcError::AuthenticationFailed(msg)) => {
            assert_eq!(msg, constants::ERR_SESSION_REQUIRED)
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_proof_without_initiate_is_rejected() {
    let (client, harness) = serve(Some(users()));
    let mut framed = Framed::new(client, ClientCodec::default());

    let reply = ask(&mut framed, Request::ZkProof { proof: vec![0; 32] }).await;
    assert_eq!(reply, Response::TerminateConnection);
    assert!(harness.server.await.unwrap().is_err());
    assert_eq!(harness.metrics.snapshot().handshakes_failed, 1);
}

#[tokio::test]
async fn test_authenticated_channel_over_duplex() {
    let (client, harness) = serve(Some(users()));
    let options = ChannelOptions::default().with_credentials(ZkCredentials::new(USER, PASSWORD));

    let mut channel = Channel::open(client, "Calculator", options).await.unwrap();
    assert!(channel.is_authenticated());

    let min = channel.method("Min", &["i32", "i32"]).unwrap();
    let reply = channel
        .call(&min)
        .arg(&-4_i32)
        .unwrap()
        .arg(&12_i32)
        .unwrap()
        .send()
        .await
        .unwrap();
    assert_eq!(reply.value::<i32>().unwrap(), -4);

    channel.close().await.unwrap();
    assert!(harness.server.await.unwrap().is_ok());

    let snapshot = harness.metrics.snapshot();
    assert_eq!(snapshot.handshakes_success, 1);
    assert_eq!(snapshot.syncs_total, 1);
}

#[tokio::test]
async fn test_wrong_password_terminates_handshake() {
    let (client, harness) = serve(Some(users()));
    let options =
        ChannelOptions::default().with_credentials(ZkCredentials::new(USER, "not-the-password"));

    match Channel::open(client, "Calculator", options).await {
        Err(RpcError::AuthenticationFailed(msg)) => {
            assert_eq!(msg, constants::ERR_HANDSHAKE_REJECTED)
        }
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("handshake should fail"),
    }
    assert!(matches!(
        harness.server.await.unwrap(),
        Err(RpcError::AuthenticationFailed(_))
    ));
}

#[tokio::test]
async fn test_unknown_user_terminates_handshake() {
    let (client, _harness) = serve(Some(users()));
    let options =
        ChannelOptions::default().with_credentials(ZkCredentials::new("someone@else", PASSWORD));

    assert!(matches!(
        Channel::open(client, "Calculator", options).await,
        Err(RpcError::AuthenticationFailed(_))
    ));
}

#[tokio::test]
async fn test_shutdown_closes_idle_connection() {
    let (client, harness) = serve(None);
    let _framed = Framed::new(client, ClientCodec::default());

    harness.shutdown.send_replace(true);
    assert!(harness.server.await.unwrap().is_ok());
}
