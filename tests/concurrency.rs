#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Concurrency tests: many streams served in parallel on a multi-threaded
//! runtime, concurrent registration and metrics consistency.

use futures::FutureExt;
use reqresp_core::protocol::dispatcher::Router;
use reqresp_core::protocol::handler::handler_fn;
use reqresp_core::protocol::request::write_raw_request;
use reqresp_core::protocol::response::{ResponseChunkReader, ResultCode};
use reqresp_core::protocol::{ProtocolId, RpcMethod};
use reqresp_core::service::context::{stream_context_fn, StreamContext};
use reqresp_core::transport::memory::MemoryTransport;
use reqresp_core::utils::compression::{SharedCompression, Snappy};
use reqresp_core::utils::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;

fn register_echo(
    transport: &MemoryTransport,
    compression: Option<SharedCompression>,
    metrics: Arc<Metrics>,
) -> ProtocolId {
    RpcMethod::new("/test/echo/1", 64 * 1024)
        .register(
            transport,
            stream_context_fn(StreamContext::background(), Some(Duration::from_secs(10))),
            compression,
            Some(metrics),
            handler_fn(|mut req| {
                async move {
                    let _ = match req.read_request_bytes().await {
                        Ok(body) => req.write_raw_response_chunk(ResultCode::Success, &body).await,
                        Err(e) => {
                            req.write_error_chunk(ResultCode::InvalidRequest, &e.to_string())
                                .await
                        }
                    };
                }
                .boxed()
            }),
        )
        .unwrap()
}

async fn run_parallel_echo(compression: Option<SharedCompression>, streams: usize) {
    let transport = Arc::new(MemoryTransport::new());
    let metrics = Arc::new(Metrics::new());
    let protocol = register_echo(&transport, compression.clone(), metrics.clone());

    let mut tasks = JoinSet::new();
    for i in 0..streams {
        let transport = transport.clone();
        let protocol = protocol.clone();
        let compression = compression.clone();
        tasks.spawn(async move {
            let payload = vec![(i & 0xFF) as u8; 100 + i * 37];
            let (client, handle) = transport
                .open_stream(format!("peer-{i}").as_str(), &protocol)
                .unwrap();
            let (read_half, mut write_half) = tokio::io::split(client);
            write_raw_request(&mut write_half, &payload, compression.as_ref())
                .await
                .unwrap();

            let mut reader = ResponseChunkReader::new(read_half, compression, 64 * 1024);
            let chunk = reader.read_chunk().await.unwrap().expect("one chunk");
            assert!(chunk.is_success());
            assert_eq!(chunk.payload.as_ref(), payload.as_slice());
            assert!(reader.read_chunk().await.unwrap().is_none());
            handle.await.unwrap();
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let snapshot = metrics.snapshot();
    let streams = streams as u64;
    assert_eq!(snapshot.streams_total, streams);
    assert_eq!(snapshot.streams_closed, streams);
    assert_eq!(snapshot.streams_active, 0);
    assert_eq!(snapshot.requests_accepted, streams);
    assert_eq!(snapshot.chunks_written, streams);
    assert_eq!(snapshot.streams_timed_out, 0);
    assert_eq!(snapshot.streams_cancelled, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_echo_streams() {
    run_parallel_echo(None, 50).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_echo_streams_snappy() {
    run_parallel_echo(Some(Arc::new(Snappy)), 50).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registration() {
    let router = Router::new();

    let mut tasks = JoinSet::new();
    for i in 0..32 {
        let router = router.clone();
        tasks.spawn(async move {
            RpcMethod::new(format!("/test/method_{i}/1"), 1024)
                .register(
                    &router,
                    stream_context_fn(StreamContext::background(), None),
                    None,
                    None,
                    handler_fn(|_req| async {}.boxed()),
                )
                .unwrap()
        });
    }

    let mut registered = Vec::new();
    while let Some(res) = tasks.join_next().await {
        registered.push(res.unwrap());
    }
    registered.sort();

    assert_eq!(router.protocols(), registered);
    for protocol in &registered {
        assert!(router.supports(protocol));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancel_and_complete() {
    let root = StreamContext::background();
    let transport = Arc::new(MemoryTransport::new());
    let metrics = Arc::new(Metrics::new());
    let protocol = RpcMethod::new("/test/park/1", 1024)
        .register(
            transport.as_ref(),
            stream_context_fn(root.clone(), None),
            None,
            Some(metrics.clone()),
            handler_fn(|mut req| {
                async move {
                    // Even peers get answered, odd peers hang on a missing body
                    if let Ok(body) = req.read_request_bytes().await {
                        let _ = req.write_raw_response_chunk(ResultCode::Success, &body).await;
                    }
                }
                .boxed()
            }),
        )
        .unwrap();

    let mut handles = Vec::new();
    let mut parked = Vec::new();
    for i in 0..20 {
        let (client, handle) = transport
            .open_stream(format!("peer-{i}").as_str(), &protocol)
            .unwrap();
        let (read_half, mut write_half) = tokio::io::split(client);
        if i % 2 == 0 {
            write_raw_request(&mut write_half, b"done", None).await.unwrap();
            let mut reader = ResponseChunkReader::new(read_half, None, 1024);
            assert!(reader.read_chunk().await.unwrap().unwrap().is_success());
        } else {
            // Claim 10 bytes, send 2, keep the stream open
            write_half.write_all(&[10, 1, 2]).await.unwrap();
            parked.push((read_half, write_half));
        }
        handles.push(handle);
    }

    while metrics.snapshot().streams_closed < 10 {
        tokio::task::yield_now().await;
    }
    root.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.streams_total, 20);
    assert_eq!(snapshot.streams_closed, 20);
    assert_eq!(snapshot.streams_cancelled, 10);
    assert_eq!(snapshot.streams_active, 0);
    drop(parked);
}
