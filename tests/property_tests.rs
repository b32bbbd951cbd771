//! Property-based tests using proptest
//!
//! These tests check codec invariants over randomly generated inputs: parameter blocks,
//! request/response framing, sync records and the session cipher.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};
use wirecall::core::codec::{ClientCodec, ServerCodec};
use wirecall::core::params::{CompressionPolicy, ParamCodec, Slot};
use wirecall::protocol::message::{MethodSyncInfo, Request, Response, ServiceSyncInfo};
use wirecall::utils::compression::CompressionKind;
use wirecall::utils::crypto::ZkCipher;

fn slot_strategy() -> impl Strategy<Value = Slot> {
    prop_oneof![
        1 => Just(None),
        3 => prop::collection::vec(any::<u8>(), 0..512).prop_map(Some),
        // long runs that cross the smallest threshold and compress well
        1 => (any::<u8>(), 1024usize..8192).prop_map(|(b, n)| Some(vec![b; n])),
    ]
}

fn kind_strategy() -> impl Strategy<Value = CompressionKind> {
    prop_oneof![Just(CompressionKind::Lz4), Just(CompressionKind::Zstd)]
}

fn request_strategy() -> impl Strategy<Value = Request> {
    let blob = || prop::collection::vec(any::<u8>(), 0..256);
    prop_oneof![
        Just(Request::TerminateConnection),
        (any::<i32>(), any::<i32>(), blob()).prop_map(|(service, method, params)| {
            Request::MethodInvocation {
                service,
                method,
                params,
            }
        }),
        blob().prop_map(|name| Request::SyncInterface { name }),
        ("[a-z@.]{0,24}", blob()).prop_map(|(username, a)| Request::ZkInitiate { username, a }),
        blob().prop_map(|proof| Request::ZkProof { proof }),
    ]
}

fn response_strategy() -> impl Strategy<Value = Response> {
    let blob = || prop::collection::vec(any::<u8>(), 0..256);
    prop_oneof![
        Just(Response::TerminateConnection),
        Just(Response::UnknownMethod),
        blob().prop_map(|values| Response::ReturnValues { values }),
        blob().prop_map(|values| Response::ThrowException { values }),
        blob().prop_map(|sync| Response::SyncInterface { sync }),
        (blob(), blob()).prop_map(|(salt, b)| Response::ZkInitiate { salt, b }),
        blob().prop_map(|proof| Response::ZkProof { proof }),
    ]
}

// Property: any parameter array survives encoding, compressed or not
proptest! {
    #[test]
    fn prop_param_block_roundtrip(
        slots in prop::collection::vec(slot_strategy(), 0..12),
        kind in kind_strategy(),
        threshold in 0usize..4096,
        compress in any::<bool>(),
    ) {
        let policy = compress.then(|| CompressionPolicy::new(kind, threshold));
        let codec = ParamCodec::default().with_compression(policy);

        let block = codec.encode_block(&slots).expect("encode should not fail");
        let decoded = codec.decode_block(&block).expect("decode should not fail");
        prop_assert_eq!(decoded, slots);
    }
}

// Property: decoding arbitrary bytes as a parameter block never panics
proptest! {
    #[test]
    fn prop_param_block_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = ParamCodec::default().decode_block(&data);
    }
}

// Property: a stream of requests decodes back in order, however the bytes are split
proptest! {
    #[test]
    fn prop_request_stream_roundtrip(
        requests in prop::collection::vec(request_strategy(), 1..8),
        chunk in 1usize..64,
    ) {
        let mut client = ClientCodec::default();
        let mut wire = BytesMut::new();
        for request in &requests {
            client.encode(request.clone(), &mut wire).expect("encode should not fail");
        }

        let mut server = ServerCodec::default();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(request) = server.decode(&mut buf).expect("decode should not fail") {
                decoded.push(request);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, requests);
    }
}

// Property: every response type frames and unframes losslessly
proptest! {
    #[test]
    fn prop_response_roundtrip(response in response_strategy()) {
        let mut server = ServerCodec::default();
        let mut buf = BytesMut::new();
        server.encode(response.clone(), &mut buf).expect("encode should not fail");

        let mut client = ClientCodec::default();
        let decoded = client.decode(&mut buf).expect("decode should not fail");
        prop_assert_eq!(decoded, Some(response));
        prop_assert!(buf.is_empty());
    }
}

// Property: the server decoder rejects or waits on garbage, it never panics
proptest! {
    #[test]
    fn prop_server_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let mut server = ServerCodec::default();
        let mut buf = BytesMut::from(&data[..]);
        let _ = server.decode(&mut buf);
    }
}

// Property: sync records survive encoding for any method table
proptest! {
    #[test]
    fn prop_sync_info_roundtrip(
        service_ordinal in 0i32..1000,
        use_compression in any::<bool>(),
        threshold in 1024i32..i32::MAX,
        methods in prop::collection::vec(
            ("[A-Za-z]{1,12}", "[a-z:<>]{0,20}", prop::collection::vec("[a-z0-9&: ]{1,16}", 0..5)),
            0..10,
        ),
    ) {
        let sync = ServiceSyncInfo {
            service_ordinal,
            use_compression,
            compression_threshold: threshold,
            methods: methods
                .into_iter()
                .enumerate()
                .map(|(i, (name, return_type, parameter_types))| MethodSyncInfo {
                    ordinal: i as i32,
                    name,
                    return_type,
                    parameter_types,
                })
                .collect(),
        };

        let bytes = sync.encode().expect("encode should not fail");
        prop_assert_eq!(ServiceSyncInfo::decode(&bytes).expect("decode should not fail"), sync);
    }
}

// Property: the session cipher round-trips and always emits whole blocks after the IV
proptest! {
    #[test]
    fn prop_cipher_roundtrip(
        key in prop::array::uniform32(any::<u8>()),
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        let cipher = ZkCipher::new(key);
        let sealed = cipher.encrypt(&plaintext).expect("encrypt should not fail");

        prop_assert_eq!(sealed.len() % 16, 0);
        prop_assert!(sealed.len() > plaintext.len() + 16);
        prop_assert_eq!(cipher.decrypt(&sealed).expect("decrypt should not fail"), plaintext);
    }
}

// Property: decrypting with a different key never yields the plaintext
proptest! {
    #[test]
    fn prop_cipher_wrong_key(
        key in prop::array::uniform32(any::<u8>()),
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
    ) {
        let mut other_key = key;
        other_key[0] ^= 0x01;

        let sealed = ZkCipher::new(key).encrypt(&plaintext).expect("encrypt should not fail");
        match ZkCipher::new(other_key).decrypt(&sealed) {
            Ok(opened) => prop_assert_ne!(opened, plaintext),
            Err(_) => {}
        }
    }
}
