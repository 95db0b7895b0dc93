//! Adapter lifecycle: readiness, admission control, graceful shutdown and
//! stop idempotence.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::time::timeout;

use nfs_tundra::xdr::rpc::opaque_auth;
use nfs_tundra::xdr::nfs3;
use support::{call_record, connect, parse_reply, roundtrip, start_adapter, start_adapter_with};

#[tokio::test]
async fn stop_is_idempotent_and_concurrent_with_serve() {
    let adapter = start_adapter().await;
    let mut stream = connect(&adapter).await;
    let record = call_record(1, nfs3::PROGRAM, 3, 0, opaque_auth::default(), &[]);
    let _ = roundtrip(&mut stream, &record).await;

    let first = adapter.clone();
    let second = adapter.clone();
    let (a, b) = tokio::join!(
        timeout(Duration::from_secs(10), first.stop()),
        timeout(Duration::from_secs(10), second.stop()),
    );
    assert!(a.expect("first stop timed out").is_ok());
    assert!(b.expect("second stop timed out").is_ok());

    // A third stop after close is a no-op.
    timeout(Duration::from_secs(1), adapter.stop())
        .await
        .expect("late stop timed out")
        .expect("late stop failed");
}

#[tokio::test]
async fn serve_can_only_run_once() {
    let adapter = start_adapter().await;
    // The background serve already took the listener.
    assert!(adapter.serve().await.is_err());
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let adapter = start_adapter().await;
    let mut idle = connect(&adapter).await;

    adapter.stop().await.unwrap();

    // The idle connection observes EOF shortly after shutdown.
    let mut buf = [0u8; 4];
    let read = timeout(Duration::from_secs(5), idle.read(&mut buf))
        .await
        .expect("connection was not closed by shutdown")
        .unwrap_or(0);
    assert_eq!(read, 0);
}

#[tokio::test]
async fn pre_accept_hook_rejects_connections() {
    let adapter = start_adapter().await;
    let denied = Arc::new(AtomicUsize::new(0));
    let counter = denied.clone();
    adapter.set_pre_accept(Arc::new(move |_addr| {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    }));

    let mut stream = connect(&adapter).await;
    let mut buf = [0u8; 4];
    let read = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("rejected connection was not closed")
        .unwrap_or(0);
    assert_eq!(read, 0);
    assert_eq!(denied.load(Ordering::SeqCst), 1);
    adapter.stop().await.unwrap();
}

#[tokio::test]
async fn requests_in_flight_complete_before_close() {
    let adapter = start_adapter_with(|settings| {
        settings.timeouts.shutdown = 5;
    })
    .await;

    // A batch of live connections, each mid-conversation.
    let mut streams = Vec::new();
    for xid in 0..4u32 {
        let mut stream = connect(&adapter).await;
        let record = call_record(xid, nfs3::PROGRAM, 3, 0, opaque_auth::default(), &[]);
        let reply = roundtrip(&mut stream, &record).await;
        let (msg, _) = parse_reply(&reply);
        assert_eq!(msg.xid, xid);
        streams.push(stream);
    }

    // Serve returns within the shutdown budget despite open connections.
    timeout(Duration::from_secs(8), adapter.stop())
        .await
        .expect("drain exceeded the shutdown budget")
        .expect("stop failed");
}

#[tokio::test]
async fn connection_cap_queues_excess_connections() {
    let adapter = start_adapter_with(|settings| {
        settings.max_connections = 1;
    })
    .await;

    let mut first = connect(&adapter).await;
    let record = call_record(1, nfs3::PROGRAM, 3, 0, opaque_auth::default(), &[]);
    let _ = roundtrip(&mut first, &record).await;

    // The second connection is accepted by the OS but not serviced until
    // the first releases its slot.
    let mut second = connect(&adapter).await;
    let pool = nfs_tundra::pool::BufferPool::new();
    nfs_tundra::protocol::rpc::write_record(
        &mut second,
        &call_record(2, nfs3::PROGRAM, 3, 0, opaque_auth::default(), &[]),
    )
    .await
    .unwrap();
    let pending =
        timeout(Duration::from_millis(300), nfs_tundra::protocol::rpc::read_record(&mut second, &pool))
            .await;
    assert!(pending.is_err(), "second connection should be waiting on the cap");

    drop(first);
    let reply =
        timeout(Duration::from_secs(5), nfs_tundra::protocol::rpc::read_record(&mut second, &pool))
            .await
            .expect("capped connection was never admitted")
            .expect("read reply");
    let (msg, _) = parse_reply(reply.as_slice());
    assert_eq!(msg.xid, 2);
    adapter.stop().await.unwrap();
}
