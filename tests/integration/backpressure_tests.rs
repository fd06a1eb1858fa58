//! Full buffers never stall the worker or the interrupt path.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use gdbrpc::config::ShellConfig;
use gdbrpc::models::Request;
use gdbrpc::AppError;

use super::test_helpers::{
    connect, server_config, start_server, start_server_with, wait_until, write_raw_frame,
    THREADS_LISTING,
};

#[tokio::test]
async fn client_that_never_reads_does_not_block_others() {
    let mut harness = start_server().await;

    // Large outputs fill the silent client's socket and outbound channel.
    let silent = TcpStream::connect(harness.addr).await.unwrap();
    let (_unread, mut write_half) = silent.into_split();
    let flood = tokio::spawn(async move {
        let command = "x".repeat(200 * 1024);
        for _ in 0..200 {
            let request = Request::exec(command.clone());
            write_raw_frame(&mut write_half, &serde_json::to_vec(&request).unwrap()).await;
        }
        write_half
    });

    let stats = Arc::clone(&harness.stats);
    tokio::time::timeout(Duration::from_secs(30), async {
        while stats.executed.lock().unwrap().len() < 200 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("every request of the silent client runs");

    let other = connect(harness.addr).await;
    let listing = other
        .call_with_timeout("info threads", Duration::from_secs(10))
        .await
        .expect("the worker keeps serving other clients");
    assert_eq!(listing, THREADS_LISTING);

    other.disconnect().await;
    let _write_half = flood.await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), harness.server.stop())
        .await
        .expect("stop does not wait on a client that never reads");
}

#[tokio::test]
async fn interrupt_is_read_while_queue_is_full() {
    let mut config = server_config();
    config.queue_capacity = 2;
    let mut harness = start_server_with(config, ShellConfig::default()).await;
    let client = Arc::new(connect(harness.addr).await);

    let caller = Arc::clone(&client);
    let call = tokio::spawn(async move { caller.call("run-forever").await });
    let stats = Arc::clone(&harness.stats);
    assert!(wait_until(|| stats.active.load(Ordering::SeqCst) == 1).await);

    // Two posts fill the queue, the third waits for admission.
    let mut posts = Vec::new();
    for name in ["first", "second", "third"] {
        posts.push(client.post(name).await.expect("post is acknowledged"));
    }

    let detail = tokio::time::timeout(Duration::from_secs(3), client.interrupt())
        .await
        .expect("interrupt is not stuck behind admission")
        .unwrap();
    assert!(detail.starts_with("interrupt delivered"), "got {detail:?}");

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, AppError::Interrupted(_)), "got {err:?}");

    for (post, name) in posts.into_iter().zip(["first", "second", "third"]) {
        assert_eq!(post.wait(Duration::from_secs(5)).await.unwrap(), format!("ran {name}"));
    }
    assert_eq!(
        harness.stats.executed(),
        vec!["run-forever", "first", "second", "third"]
    );

    client.disconnect().await;
    harness.server.stop().await;
}

#[tokio::test]
async fn overflowing_backlog_is_rejected() {
    let mut config = server_config();
    config.queue_capacity = 1;
    let mut harness = start_server_with(config, ShellConfig::default()).await;
    let client = Arc::new(connect(harness.addr).await);

    let caller = Arc::clone(&client);
    let call = tokio::spawn(async move { caller.call("run-forever").await });
    let stats = Arc::clone(&harness.stats);
    assert!(wait_until(|| stats.active.load(Ordering::SeqCst) == 1).await);

    // One post fits the queue and 64 wait in the connection backlog.
    let mut accepted = Vec::new();
    let rejection = loop {
        match client.post(&format!("post {}", accepted.len())).await {
            Ok(handle) => accepted.push(handle),
            Err(err) => break err,
        }
        assert!(accepted.len() <= 100, "backlog never filled");
    };
    assert_eq!(accepted.len(), 65);
    assert!(
        matches!(rejection, AppError::ConnectionClosed(ref msg) if msg.contains("queue is full")),
        "got {rejection:?}"
    );

    client.interrupt().await.unwrap();
    assert!(matches!(
        call.await.unwrap(),
        Err(AppError::Interrupted(_))
    ));

    let last = accepted.pop().unwrap();
    assert_eq!(last.wait(Duration::from_secs(5)).await.unwrap(), "ran post 64");

    drop(accepted);
    client.disconnect().await;
    harness.server.stop().await;
}
