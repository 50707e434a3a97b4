//! Loopback integration tests covering the end-to-end scenarios this crate
//! is expected to support: echo, a foreground job round trip, submission
//! dedup, a full function queue, a foreground client disappearing before
//! its job is taken, and queue-backed restart replay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gearman_rs::queue::{MemoryQueue, NullQueue, QueueBackend};
use gearman_rs::server::Server;
use gearman_rs::shard::Shard;
use gearman_rs::wire::protocol::Priority;
use gearman_rs::{acceptor, client::Client, worker::Worker};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

/// Spins up a single shard behind a loopback acceptor and returns its
/// address plus a token to tear it down with.
async fn start_server(queue: Arc<dyn QueueBackend>) -> (SocketAddr, CancellationToken) {
    let port = free_port();
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(256);

    let shard = Shard::new("H:test".to_string(), queue);
    let shard_cancel = cancel.clone();
    tokio::spawn(async move { shard.run(rx, shard_cancel).await });

    let accept_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = acceptor::run(addr, 128, vec![tx], accept_cancel).await;
    });

    // Give the acceptor a moment to bind before the first connection attempt.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (addr, cancel)
}

async fn raw_admin(addr: SocketAddr, command: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(command.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = tokio::time::timeout(Duration::from_millis(200), stream.read(&mut chunk)).await;
        match read {
            Ok(Ok(0)) | Err(_) => break, // EOF, or no more data within the timeout
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.ends_with(b".\n") || buf.ends_with(b"OK\n") || buf.starts_with(b"ERR") {
                    break;
                }
            },
            Ok(Err(_)) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn echo_round_trips() {
    let (addr, cancel) = start_server(Arc::new(NullQueue)).await;
    let mut client = Client::connect(addr).await.unwrap();

    let reply = client.echo(Bytes::from_static(b"hello")).await.unwrap();
    assert_eq!(reply, Bytes::from_static(b"hello"));

    cancel.cancel();
}

#[tokio::test]
async fn foreground_submit_completes_via_worker() {
    let (addr, cancel) = start_server(Arc::new(NullQueue)).await;

    let mut worker = Worker::connect(addr).await.unwrap();
    worker.can_do("reverse").await.unwrap();
    tokio::spawn(async move {
        worker
            .run(|job| async move {
                let mut data = job.data.to_vec();
                data.reverse();
                Ok(Bytes::from(data))
            })
            .await
            .ok();
    });

    let mut client = Client::connect(addr).await.unwrap();
    let result = client.submit("reverse", "", Bytes::from_static(b"abcdef"), Priority::Normal).await.unwrap();
    assert_eq!(result, Bytes::from_static(b"fedcba"));

    cancel.cancel();
}

#[tokio::test]
async fn duplicate_unique_is_deduplicated() {
    let (addr, cancel) = start_server(Arc::new(NullQueue)).await;

    let mut a = Client::connect(addr).await.unwrap();
    let mut b = Client::connect(addr).await.unwrap();

    let handle_a = a.submit_background("reverse", "same-key", Bytes::from_static(b"first"), Priority::Normal).await.unwrap();
    let handle_b = b.submit_background("reverse", "same-key", Bytes::from_static(b"second"), Priority::Normal).await.unwrap();

    assert_eq!(handle_a, handle_b);

    let status = raw_admin(addr, "status\n").await;
    assert!(status.contains("reverse\t1\t"), "expected exactly one queued job, got: {status}");

    cancel.cancel();
}

#[tokio::test]
async fn queue_full_rejects_submission() {
    let (addr, cancel) = start_server(Arc::new(NullQueue)).await;

    let admin_reply = raw_admin(addr, "maxqueue reverse 1\n").await;
    assert!(admin_reply.contains("OK"));

    let mut client = Client::connect(addr).await.unwrap();
    client.submit_background("reverse", "", Bytes::from_static(b"one"), Priority::Normal).await.unwrap();

    let second = client.submit_background("reverse", "", Bytes::from_static(b"two"), Priority::Normal).await;
    assert!(matches!(second, Err(gearman_rs::client::ClientError::Server { .. })));

    cancel.cancel();
}

#[tokio::test]
async fn foreground_client_disconnect_before_take_discards_the_job() {
    let (addr, cancel) = start_server(Arc::new(NullQueue)).await;

    {
        // A bare foreground submission, dropped before any WORK_COMPLETE.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let packet = gearman_rs::wire::protocol::Command::SubmitJob {
            priority: Priority::Normal,
            background: false,
            function: Bytes::from_static(b"reverse"),
            unique: Bytes::new(),
            data: Bytes::from_static(b"orphaned"),
        };
        stream.write_all(&gearman_rs::wire::codec::pack_command(packet)).await.unwrap();
        let mut buf = [0u8; 256];
        let _ = stream.read(&mut buf).await.unwrap(); // JOB_CREATED
    } // socket dropped here

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut worker = Worker::connect(addr).await.unwrap();
    worker.can_do("reverse").await.unwrap();
    let job = worker.grab_job().await.unwrap();
    assert!(job.is_none(), "the orphaned job should have been discarded, not handed out");

    cancel.cancel();
}

#[tokio::test]
async fn restart_replays_persisted_jobs() {
    // Only foreground submissions are durably persisted before their ack;
    // a bare socket write lets us submit foreground without blocking on
    // the client library's wait-for-completion loop.
    let queue = Arc::new(MemoryQueue::new());
    let (addr, cancel) = start_server(queue.clone() as Arc<dyn QueueBackend>).await;

    {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let packet = gearman_rs::wire::protocol::Command::SubmitJob {
            priority: Priority::Normal,
            background: false,
            function: Bytes::from_static(b"reverse"),
            unique: Bytes::new(),
            data: Bytes::from_static(b"persist-me"),
        };
        stream.write_all(&gearman_rs::wire::codec::pack_command(packet)).await.unwrap();
        let mut buf = [0u8; 256];
        let _ = stream.read(&mut buf).await.unwrap(); // JOB_CREATED
    }

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // "Restart": a brand new Server sharing the same queue backend.
    let mut server = Server::new("H:restarted".to_string(), queue.clone() as Arc<dyn QueueBackend>);
    let mut persisted = Vec::new();
    queue.replay(&mut |job| persisted.push(job)).await.unwrap();
    assert_eq!(persisted.len(), 1);

    server.queue_replay = true;
    for job in persisted {
        server
            .add_job(job.function, job.unique, job.data, job.priority, false, None)
            .await;
    }
    server.queue_replay = false;

    let connection = server.add_connection("test-worker".to_string());
    let function = server.get_or_create_function(Bytes::from_static(b"reverse"));
    server.functions[function.0].bind_worker(connection, None);
    let job_id = server.take(connection).await;
    assert!(job_id.is_some(), "replayed job should be available to take after restart");
}
