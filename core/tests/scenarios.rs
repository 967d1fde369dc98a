//! End-to-end scenarios driven over a real loopback TCP socket standing in for the
//! daemon: a dedicated task reads the bytes the controller writes and replies with
//! scripted lines, exactly the way the transport-layer unit tests substitute
//! `tokio::io::duplex` for the OS socket, just one layer up through the public API.

#![expect(
    unused_crate_dependencies,
    reason = "this integration test binary only exercises torctl_core's public API; \
    its transitive dependencies are still real deps of the lib target"
)]

use std::{future::Future, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

use torctl_core::{Command, ConnectAuth, Controller, ControllerBuilder, Endpoint, JobOutput, SignalKind, TorError};

async fn spawn_daemon<F, Fut>(session: F) -> SocketAddr
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        session(stream).await;
    });
    addr
}

async fn connect(addr: SocketAddr) -> Controller {
    ControllerBuilder::new(Endpoint::Tcp(addr), ConnectAuth::Null)
        .connect()
        .await
        .unwrap()
}

/// Read one CRLF-terminated line and assert it matches `expected` exactly.
async fn expect_line(reader: &mut BufReader<tokio::io::ReadHalf<TcpStream>>, expected: &str) {
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line, expected);
}

fn result_channel() -> (
    tokio::sync::mpsc::UnboundedSender<Result<JobOutput, TorError>>,
    tokio::sync::mpsc::UnboundedReceiver<Result<JobOutput, TorError>>,
) {
    tokio::sync::mpsc::unbounded_channel()
}

#[tokio::test]
async fn auth_then_newnym_both_succeed() {
    let addr = spawn_daemon(|stream| async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        expect_line(&mut reader, "AUTHENTICATE\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
        expect_line(&mut reader, "SIGNAL NEWNYM\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
    })
    .await;

    let controller = connect(addr).await;
    let (tx, mut rx) = result_channel();
    let tx2 = tx.clone();
    controller.enqueue(
        "newnym",
        Command::Signal(SignalKind::NewNym),
        move |out| {
            let _ = tx.send(Ok(out));
        },
        move |err| {
            let _ = tx2.send(Err(err));
        },
    );

    let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Ok(JobOutput::Ok)));
}

#[tokio::test]
async fn getinfo_batch_parses_into_key_values() {
    let addr = spawn_daemon(|stream| async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        expect_line(&mut reader, "AUTHENTICATE\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
        expect_line(&mut reader, "GETINFO version config-file\r\n").await;
        write_half
            .write_all(b"250-version=0.4.8.10\r\n250-config-file=/etc/tor/torrc\r\n250 OK\r\n")
            .await
            .unwrap();
    })
    .await;

    let controller = connect(addr).await;
    let (tx, mut rx) = result_channel();
    let tx2 = tx.clone();
    controller.enqueue(
        "getinfo",
        Command::GetInfo(vec!["version".to_owned(), "config-file".to_owned()]),
        move |out| {
            let _ = tx.send(Ok(out));
        },
        move |err| {
            let _ = tx2.send(Err(err));
        },
    );

    let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let JobOutput::KeyValues(pairs) = result else {
        panic!("expected KeyValues")
    };
    assert_eq!(
        pairs,
        vec![
            ("version".to_owned(), "0.4.8.10".to_owned()),
            ("config-file".to_owned(), "/etc/tor/torrc".to_owned()),
        ]
    );
}

#[tokio::test]
async fn shutdown_preempts_jobs_not_yet_written() {
    let addr = spawn_daemon(|stream| async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        expect_line(&mut reader, "AUTHENTICATE\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
        // The three GETINFOs must never reach the wire: only SHUTDOWN does.
        expect_line(&mut reader, "SIGNAL SHUTDOWN\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
    })
    .await;

    let controller = connect(addr).await;
    let (tx, mut rx) = result_channel();

    // No `.await` between these calls: the dispatcher cannot have dequeued
    // anything yet, so the preemption check in `enqueue` sees all three pending.
    for i in 0..3 {
        let tx = tx.clone();
        controller.enqueue(
            format!("getinfo-{i}"),
            Command::GetInfo(vec!["version".to_owned()]),
            move |out| {
                let _ = tx.send(Ok(out));
            },
            move |err| {
                let _ = tx.send(Err(err));
            },
        );
    }
    let (shutdown_tx, mut shutdown_rx) = result_channel();
    let shutdown_tx2 = shutdown_tx.clone();
    controller.enqueue(
        "shutdown",
        Command::Signal(SignalKind::Shutdown),
        move |out| {
            let _ = shutdown_tx.send(Ok(out));
        },
        move |err| {
            let _ = shutdown_tx2.send(Err(err));
        },
    );

    for _ in 0..3 {
        let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Err(TorError::Interrupted(reason)) = result else {
            panic!("expected Interrupted, got {result:?}")
        };
        assert!(reason.contains("SIGNAL SHUTDOWN"));
    }

    let shutdown_result = tokio::time::timeout(Duration::from_secs(1), shutdown_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(shutdown_result, Ok(JobOutput::Ok)));
}

#[tokio::test]
async fn eos_while_awaiting_reply_interrupts_the_job() {
    let addr = spawn_daemon(|stream| async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        expect_line(&mut reader, "AUTHENTICATE\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
        expect_line(&mut reader, "GETINFO version\r\n").await;
        // Close without ever replying.
    })
    .await;

    let controller = connect(addr).await;
    let (tx, mut rx) = result_channel();
    let tx2 = tx.clone();
    controller.enqueue(
        "getinfo",
        Command::GetInfo(vec!["version".to_owned()]),
        move |out| {
            let _ = tx.send(Ok(out));
        },
        move |err| {
            let _ = tx2.send(Err(err));
        },
    );

    let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(TorError::Interrupted(_))));
}

#[tokio::test]
async fn reply_error_carries_code_and_message() {
    let addr = spawn_daemon(|stream| async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        expect_line(&mut reader, "AUTHENTICATE\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
        expect_line(&mut reader, "GETINFO does-not-exist\r\n").await;
        write_half
            .write_all(b"552 Unrecognized key \"does-not-exist\"\r\n")
            .await
            .unwrap();
    })
    .await;

    let controller = connect(addr).await;
    let (tx, mut rx) = result_channel();
    let tx2 = tx.clone();
    controller.enqueue(
        "getinfo",
        Command::GetInfo(vec!["does-not-exist".to_owned()]),
        move |out| {
            let _ = tx.send(Ok(out));
        },
        move |err| {
            let _ = tx2.send(Err(err));
        },
    );

    let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        result,
        Err(TorError::ReplyError { code: 552, .. })
    ));
}

#[tokio::test]
async fn destroy_is_idempotent_and_rejects_further_enqueues() {
    let addr = spawn_daemon(|stream| async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        expect_line(&mut reader, "AUTHENTICATE\r\n").await;
        write_half.write_all(b"250 OK\r\n").await.unwrap();
        // Keep the connection open; the test drives destroy() itself.
        tokio::time::sleep(Duration::from_secs(5)).await;
    })
    .await;

    let controller = connect(addr).await;
    controller.destroy().unwrap();
    controller.destroy().unwrap();
    assert!(controller.is_destroyed());

    let (tx, mut rx) = result_channel();
    let tx2 = tx.clone();
    controller.enqueue(
        "getinfo",
        Command::GetInfo(vec!["version".to_owned()]),
        move |out| {
            let _ = tx.send(Ok(out));
        },
        move |err| {
            let _ = tx2.send(Err(err));
        },
    );
    let result = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(TorError::IllegalState(_))));
}
