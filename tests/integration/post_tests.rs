//! Fire-and-forget posts: admission is acknowledged at once, the result
//! arrives later under the same id.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::oneshot;

use gdbrpc::models::{Outcome, Request};
use gdbrpc::AppError;

use super::test_helpers::{connect, read_raw_response, start_server, write_raw_frame};

#[tokio::test]
async fn post_returns_before_command_runs() {
    let mut harness = start_server().await;
    let client = connect(harness.addr).await;

    let started = Instant::now();
    let handle = client.post("sleep 300").await.expect("post is admitted");
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "post must not wait for execution"
    );
    assert_eq!(client.pending_count(), 1);

    let output = handle.wait(Duration::from_secs(5)).await.unwrap();
    assert_eq!(output, "slept 300");
    assert_eq!(client.pending_count(), 0);

    client.disconnect().await;
    harness.server.stop().await;
}

#[tokio::test]
async fn post_completion_callback() {
    let mut harness = start_server().await;
    let client = connect(harness.addr).await;

    let (tx, rx) = oneshot::channel();
    let handle = client.post("fail").await.unwrap();
    handle.on_complete(move |result| async move {
        let _ = tx.send(result);
    });

    let result = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(AppError::Execution(_))));

    client.disconnect().await;
    harness.server.stop().await;
}

#[tokio::test]
async fn dropped_handle_releases_entry_but_command_runs() {
    let mut harness = start_server().await;
    let client = connect(harness.addr).await;

    let handle = client.post("sleep 50").await.unwrap();
    drop(handle);
    assert_eq!(client.pending_count(), 0);

    // The next call queues behind the post, so the post has run by then.
    assert_eq!(client.call("after").await.unwrap(), "ran after");
    assert_eq!(harness.stats.executed(), vec!["sleep 50", "after"]);

    client.disconnect().await;
    harness.server.stop().await;
}

#[tokio::test]
async fn wire_shows_ack_then_completion() {
    let mut harness = start_server().await;
    let mut stream = TcpStream::connect(harness.addr).await.unwrap();

    let request = Request::post("sleep 20");
    write_raw_frame(&mut stream, &serde_json::to_vec(&request).unwrap()).await;

    let ack = read_raw_response(&mut stream).await.unwrap();
    assert_eq!(ack.id, request.id);
    assert_eq!(ack.outcome, Outcome::Accepted);

    let done = read_raw_response(&mut stream).await.unwrap();
    assert_eq!(done.id, request.id);
    assert_eq!(
        done.outcome,
        Outcome::Success {
            output: "slept 20".into()
        }
    );

    drop(stream);
    harness.server.stop().await;
}
