// Tests for microtask ordering

use super::{create_test_runtime, new_log, tagged};
use promise_jobs::JsValue;

#[test]
fn test_reactions_run_in_registration_order() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p = rt.create_promise();
    for label in ["first", "second", "third", "fourth"] {
        let h = tagged(&mut rt, &log, label);
        rt.then(&p, Some(h), None, None).unwrap();
    }
    rt.resolve(&p, 0.into()).unwrap();
    rt.drain_microtasks();
    assert_eq!(
        *log.borrow(),
        vec!["first:0", "second:0", "third:0", "fourth:0"]
    );
}

#[test]
fn test_settlement_order_decides_queue_order() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p1 = rt.create_promise();
    let p2 = rt.create_promise();
    let a = tagged(&mut rt, &log, "p1");
    let b = tagged(&mut rt, &log, "p2");
    rt.then(&p1, Some(a), None, None).unwrap();
    rt.then(&p2, Some(b), None, None).unwrap();

    rt.resolve(&p2, 2.into()).unwrap();
    rt.resolve(&p1, 1.into()).unwrap();
    rt.drain_microtasks();
    assert_eq!(*log.borrow(), vec!["p2:2", "p1:1"]);
}

#[test]
fn test_jobs_queued_while_draining_run_last() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p = rt.create_promise();
    let q = rt.create_promise();

    let late = tagged(&mut rt, &log, "late");
    rt.then(&q, Some(late), None, None).unwrap();

    let log_first = log.clone();
    let q_handle = q.clone();
    let first = rt.create_native_function("first", 1, move |rt, _this, _args| {
        log_first.borrow_mut().push("first".to_string());
        rt.resolve(&q_handle, "q".into())?;
        Ok(JsValue::Undefined)
    });
    let second = tagged(&mut rt, &log, "second");
    rt.then(&p, Some(first), None, None).unwrap();
    rt.then(&p, Some(second), None, None).unwrap();

    rt.resolve(&p, 1.into()).unwrap();
    assert_eq!(rt.drain_microtasks(), 3);
    assert_eq!(*log.borrow(), vec!["first", "second:1", "late:\"q\""]);
}

#[test]
fn test_adopting_a_native_promise_takes_two_extra_jobs() {
    let mut rt = create_test_runtime();
    let log = new_log();

    let adopted = rt.create_fulfilled_promise("inner".into());
    let outer = rt.create_promise();
    rt.resolve(&outer, JsValue::Object(adopted)).unwrap();
    let on_outer = tagged(&mut rt, &log, "outer");
    rt.then(&outer, Some(on_outer), None, None).unwrap();

    let start = rt.create_fulfilled_promise(0.into());
    let r1 = tagged(&mut rt, &log, "r1");
    let r2 = tagged(&mut rt, &log, "r2");
    let r3 = tagged(&mut rt, &log, "r3");
    let d1 = rt.then(&start, Some(r1), None, None).unwrap();
    let d2 = rt
        .then(&super::object(&d1), Some(r2), None, None)
        .unwrap();
    rt.then(&super::object(&d2), Some(r3), None, None).unwrap();

    rt.drain_microtasks();
    assert_eq!(
        *log.borrow(),
        vec!["r1:0", "r2:0", "outer:\"inner\"", "r3:0"]
    );
}

#[test]
fn test_nested_drain_from_handler_runs_nothing() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p = rt.create_fulfilled_promise(1.into());

    let log_nested = log.clone();
    let nested = rt.create_native_function("nested", 1, move |rt, _this, _args| {
        let ran = rt.drain_microtasks();
        log_nested.borrow_mut().push(format!("nested drain ran {}", ran));
        Ok(JsValue::Undefined)
    });
    let after = tagged(&mut rt, &log, "after");
    rt.then(&p, Some(nested), None, None).unwrap();
    rt.then(&p, Some(after), None, None).unwrap();

    assert_eq!(rt.drain_microtasks(), 2);
    assert_eq!(*log.borrow(), vec!["nested drain ran 0", "after:1"]);
}

#[test]
fn test_drain_on_empty_queue() {
    let mut rt = create_test_runtime();
    assert_eq!(rt.drain_microtasks(), 0);
    assert_eq!(rt.pending_microtasks(), 0);
}
