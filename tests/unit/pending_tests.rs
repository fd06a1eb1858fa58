//! Unit tests for the client's pending-call table.

use gdbrpc::client::pending::PendingCalls;
use gdbrpc::models::{CallId, Outcome, RemoteErrorKind, Response};
use gdbrpc::AppError;

#[tokio::test]
async fn call_resolves_and_leaves_table() {
    let pending = PendingCalls::new();
    let id = CallId::new();
    let rx = pending.register_call(id);
    assert_eq!(pending.len(), 1);

    assert!(pending.resolve(Response::success(id, "ok")));
    assert!(pending.is_empty());

    let outcome = rx.await.unwrap().unwrap();
    assert_eq!(outcome.into_result().unwrap(), "ok");
}

#[tokio::test]
async fn responses_route_by_id_not_order() {
    let pending = PendingCalls::new();
    let first = CallId::new();
    let second = CallId::new();
    let rx_first = pending.register_call(first);
    let rx_second = pending.register_call(second);

    pending.resolve(Response::success(second, "two"));
    pending.resolve(Response::success(first, "one"));

    assert_eq!(rx_first.await.unwrap().unwrap().into_result().unwrap(), "one");
    assert_eq!(rx_second.await.unwrap().unwrap().into_result().unwrap(), "two");
}

#[test]
fn unknown_id_is_dropped() {
    let pending = PendingCalls::new();
    let _rx = pending.register_call(CallId::new());

    assert!(!pending.resolve(Response::success(CallId::new(), "stray")));
    assert_eq!(pending.len(), 1, "the real entry must be untouched");
}

#[tokio::test]
async fn post_gets_ack_then_completion() {
    let pending = PendingCalls::new();
    let id = CallId::new();
    let (ack, completion) = pending.register_post(id);

    assert!(pending.resolve(Response::accepted(id)));
    assert_eq!(pending.len(), 1, "entry stays until the completion");
    assert!(ack.await.unwrap().unwrap().is_accepted());

    assert!(pending.resolve(Response::success(id, "done")));
    assert!(pending.is_empty());
    assert_eq!(
        completion.await.unwrap().unwrap().into_result().unwrap(),
        "done"
    );
}

#[tokio::test]
async fn post_failure_before_ack_answers_both() {
    let pending = PendingCalls::new();
    let id = CallId::new();
    let (ack, completion) = pending.register_post(id);

    pending.resolve(Response::failure(
        id,
        RemoteErrorKind::Unavailable,
        "execution queue is shut down",
    ));

    assert!(matches!(
        ack.await.unwrap().unwrap().into_result(),
        Err(AppError::ConnectionClosed(_))
    ));
    assert!(completion.await.unwrap().unwrap().into_result().is_err());
}

#[tokio::test]
async fn fail_all_closes_everything() {
    let pending = PendingCalls::new();
    let call = pending.register_call(CallId::new());
    let (ack, completion) = pending.register_post(CallId::new());

    pending.fail_all("client disconnected");
    assert!(pending.is_empty());

    for rx in [call, ack, completion] {
        let result: gdbrpc::Result<Outcome> = rx.await.unwrap();
        assert!(matches!(
            result,
            Err(AppError::ConnectionClosed(ref msg)) if msg == "client disconnected"
        ));
    }
}

#[test]
fn remove_releases_entry() {
    let pending = PendingCalls::new();
    let id = CallId::new();
    let _rx = pending.register_call(id);

    assert!(pending.remove(id));
    assert!(!pending.remove(id));
    assert!(!pending.resolve(Response::success(id, "late")));
}
