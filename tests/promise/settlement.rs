// Tests for settlement: idempotency and deferred execution

use super::{create_test_runtime, new_log, object, tagged};
use promise_jobs::{JsValue, PromiseStatus};

#[test]
fn test_resolve_is_idempotent() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p = rt.create_promise();
    let on_fulfilled = tagged(&mut rt, &log, "f");
    let on_rejected = tagged(&mut rt, &log, "r");
    rt.then(&p, Some(on_fulfilled), Some(on_rejected), None)
        .unwrap();

    rt.resolve(&p, 1.into()).unwrap();
    rt.resolve(&p, 2.into()).unwrap();
    rt.reject(&p, 3.into()).unwrap();

    assert_eq!(rt.pending_microtasks(), 1);
    rt.drain_microtasks();
    assert_eq!(*log.borrow(), vec!["f:1"]);
    assert_eq!(rt.promise_result(&p), Some(JsValue::Number(1.0)));
}

#[test]
fn test_reject_is_idempotent() {
    let mut rt = create_test_runtime();
    let p = rt.create_promise();
    rt.reject(&p, "first".into()).unwrap();
    rt.reject(&p, "second".into()).unwrap();
    rt.resolve(&p, "third".into()).unwrap();
    assert_eq!(rt.promise_status(&p), Some(PromiseStatus::Rejected));
    assert_eq!(rt.promise_result(&p), Some(JsValue::from("first")));
}

#[test]
fn test_handlers_never_run_synchronously() {
    let mut rt = create_test_runtime();
    let log = new_log();

    let pending = rt.create_promise();
    let h1 = tagged(&mut rt, &log, "pending");
    rt.then(&pending, Some(h1), None, None).unwrap();
    rt.resolve(&pending, "a".into()).unwrap();

    let settled = rt.create_fulfilled_promise("b".into());
    let h2 = tagged(&mut rt, &log, "settled");
    rt.then(&settled, Some(h2), None, None).unwrap();

    assert!(log.borrow().is_empty());
    assert_eq!(rt.drain_microtasks(), 2);
    assert_eq!(*log.borrow(), vec!["pending:\"a\"", "settled:\"b\""]);
}

#[test]
fn test_fulfilled_promise_stores_thenable_as_is() {
    let mut rt = create_test_runtime();
    let inner = rt.create_promise();
    let outer = rt.create_fulfilled_promise(JsValue::Object(inner.clone()));
    assert_eq!(rt.promise_status(&outer), Some(PromiseStatus::Fulfilled));
    assert_eq!(rt.promise_result(&outer), Some(JsValue::Object(inner)));
    assert_eq!(rt.pending_microtasks(), 0);
}

#[test]
fn test_reaction_list_is_cleared_on_settlement() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p = rt.create_promise();
    for label in ["a", "b", "c"] {
        let h = tagged(&mut rt, &log, label);
        rt.observe(&p, Some(h), None).unwrap();
    }
    assert_eq!(rt.pending_reactions(&p).len(), 3);

    rt.reject(&p, "x".into()).unwrap();
    assert!(rt.pending_reactions(&p).is_empty());
    assert_eq!(rt.pending_microtasks(), 3);

    // No reject handlers: the reason is rethrown into a discarded outcome
    rt.drain_microtasks();
    assert!(log.borrow().is_empty());
    assert!(rt.take_reported_errors().is_empty());
}

#[test]
fn test_then_returns_new_pending_promise() {
    let mut rt = create_test_runtime();
    let p = rt.create_promise();
    let derived = rt.then(&p, None, None, None).unwrap();
    let derived = object(&derived);
    assert!(!promise_jobs::Gc::ptr_eq(&p, &derived));
    assert_eq!(rt.promise_status(&derived), Some(PromiseStatus::Pending));
}
