//! Execution worker driven directly through its queue handle.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gdbrpc::config::ShellConfig;
use gdbrpc::models::{CallId, Outcome, RemoteErrorKind, Response};
use gdbrpc::server::dispatch::Dispatcher;
use gdbrpc::server::queue::{spawn_worker, Job, JobMode, QueueHandle};

use super::test_helpers::{wait_until, FakeDebugger, Stats, THREADS_LISTING};

struct Worker {
    queue: QueueHandle,
    task: JoinHandle<Dispatcher>,
    stats: Arc<Stats>,
    cancel: CancellationToken,
}

fn start_worker() -> Worker {
    let (debugger, stats) = FakeDebugger::new();
    let dispatcher = Dispatcher::new(Box::new(debugger), ShellConfig::default());
    let cancel = CancellationToken::new();
    let (queue, task) = spawn_worker(dispatcher, 8, cancel.clone());
    Worker {
        queue,
        task,
        stats,
        cancel,
    }
}

/// Enqueue `command`; the receiver yields its response.
async fn enqueue(queue: &QueueHandle, command: &str) -> (CallId, mpsc::Receiver<Response>) {
    let (reply, rx) = mpsc::channel(4);
    let call_id = CallId::new();
    let job = Job {
        call_id,
        command: command.to_owned(),
        mode: JobMode::Call,
        reply,
        peer: "test".into(),
    };
    queue.reserve().await.expect("worker is running").send(job);
    (call_id, rx)
}

async fn run(queue: &QueueHandle, command: &str) -> Response {
    let (_, mut rx) = enqueue(queue, command).await;
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("job completes")
        .expect("worker replies")
}

fn success(output: &str) -> Outcome {
    Outcome::Success {
        output: output.to_owned(),
    }
}

#[tokio::test]
async fn interrupt_for_finished_call_is_ignored() {
    let worker = start_worker();

    let first = run(&worker.queue, "sleep 10").await;
    assert_eq!(first.outcome, success("slept 10"));

    // Signal raced past the end of its call; the next job must not see it.
    worker.queue.interrupt_call(first.id);
    let second = run(&worker.queue, "sleep 50").await;
    assert_eq!(second.outcome, success("slept 50"));
    assert_eq!(worker.stats.stops.load(Ordering::SeqCst), 0);

    worker.cancel.cancel();
    worker.task.await.unwrap();
}

#[tokio::test]
async fn idle_interrupt_signals_nothing() {
    let worker = start_worker();

    assert_eq!(worker.queue.interrupt(), None);
    assert_eq!(worker.queue.current(), None);
    let response = run(&worker.queue, "info threads").await;
    assert_eq!(response.outcome, success(THREADS_LISTING));

    worker.cancel.cancel();
    worker.task.await.unwrap();
}

#[tokio::test]
async fn interrupt_targets_executing_call() {
    let worker = start_worker();

    let (call_id, mut rx) = enqueue(&worker.queue, "run-forever").await;
    let queue = worker.queue.clone();
    assert!(wait_until(|| queue.current() == Some(call_id)).await);

    assert_eq!(worker.queue.interrupt(), Some(call_id));
    let response = rx.recv().await.unwrap();
    assert_eq!(response.id, call_id);
    let Outcome::Failure { error } = response.outcome else {
        panic!("expected an interrupted failure, got {:?}", response.outcome);
    };
    assert_eq!(error.kind, RemoteErrorKind::Interrupted);
    assert_eq!(worker.stats.stops.load(Ordering::SeqCst), 1);

    worker.cancel.cancel();
    worker.task.await.unwrap();
}

#[tokio::test]
async fn full_reply_channel_does_not_stall_worker() {
    let worker = start_worker();

    // Capacity one and never drained: only the first response fits.
    let (reply, _held) = mpsc::channel(1);
    for _ in 0..3 {
        let job = Job {
            call_id: CallId::new(),
            command: "sleep 1".into(),
            mode: JobMode::Post,
            reply: reply.clone(),
            peer: "stalled".into(),
        };
        worker.queue.reserve().await.unwrap().send(job);
    }

    let response = run(&worker.queue, "info threads").await;
    assert_eq!(response.outcome, success(THREADS_LISTING));
    assert_eq!(worker.stats.executed().len(), 4);

    worker.cancel.cancel();
    worker.task.await.unwrap();
}

#[tokio::test]
async fn cancel_returns_dispatcher_mid_command() {
    let worker = start_worker();

    let (_call_id, _rx) = enqueue(&worker.queue, "run-forever").await;
    let stats = Arc::clone(&worker.stats);
    assert!(wait_until(|| stats.active.load(Ordering::SeqCst) == 1).await);

    worker.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), worker.task)
        .await
        .expect("worker stops on cancel")
        .unwrap();
    assert_eq!(worker.stats.stops.load(Ordering::SeqCst), 1);
}
