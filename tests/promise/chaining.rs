// Tests for then-chains: return fulfils, throw rejects, omitted handlers pass through

use super::{create_test_runtime, new_log, object, tagged, thrower};
use promise_jobs::{JsValue, PromiseStatus};

#[test]
fn test_return_value_fulfils_derived_promise() {
    let mut rt = create_test_runtime();
    let p = rt.create_promise();
    let double = rt.create_native_function("double", 1, |_rt, _this, args| {
        match args.first() {
            Some(JsValue::Number(n)) => Ok(JsValue::Number(n * 2.0)),
            _ => Ok(JsValue::Undefined),
        }
    });
    let derived = object(&rt.then(&p, Some(double), None, None).unwrap());
    rt.resolve(&p, 21.into()).unwrap();
    rt.drain_microtasks();
    assert_eq!(rt.promise_status(&derived), Some(PromiseStatus::Fulfilled));
    assert_eq!(rt.promise_result(&derived), Some(JsValue::Number(42.0)));
}

#[test]
fn test_throw_rejects_derived_promise() {
    let mut rt = create_test_runtime();
    let p = rt.create_fulfilled_promise(1.into());
    let boom = thrower(&mut rt, "boom");
    let derived = object(&rt.then(&p, Some(boom), None, None).unwrap());
    rt.drain_microtasks();
    assert_eq!(rt.promise_status(&derived), Some(PromiseStatus::Rejected));
    assert_eq!(rt.promise_result(&derived), Some(JsValue::from("boom")));
}

#[test]
fn test_omitted_handlers_pass_through() {
    let mut rt = create_test_runtime();
    let fulfilled = rt.create_fulfilled_promise("value".into());
    let rejected = rt.create_rejected_promise("reason".into());

    let from_fulfilled = object(&rt.then(&fulfilled, None, None, None).unwrap());
    let from_rejected = object(&rt.then(&rejected, None, None, None).unwrap());
    rt.drain_microtasks();

    assert_eq!(
        rt.promise_status(&from_fulfilled),
        Some(PromiseStatus::Fulfilled)
    );
    assert_eq!(
        rt.promise_result(&from_fulfilled),
        Some(JsValue::from("value"))
    );
    assert_eq!(
        rt.promise_status(&from_rejected),
        Some(PromiseStatus::Rejected)
    );
    assert_eq!(
        rt.promise_result(&from_rejected),
        Some(JsValue::from("reason"))
    );
}

#[test]
fn test_rejection_skips_fulfil_handlers_until_caught() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p = rt.create_promise();

    let skipped = tagged(&mut rt, &log, "skipped");
    let d1 = object(&rt.then(&p, Some(skipped), None, None).unwrap());
    let recovered = rt.create_native_function("recover", 1, |_rt, _this, _args| {
        Ok(JsValue::from("recovered"))
    });
    let d2 = object(&rt.catch(&d1, recovered).unwrap());
    let after = tagged(&mut rt, &log, "after");
    let d3 = object(&rt.then(&d2, Some(after), None, None).unwrap());

    rt.reject(&p, "bad".into()).unwrap();
    rt.drain_microtasks();

    assert_eq!(*log.borrow(), vec!["after:\"recovered\""]);
    assert_eq!(rt.promise_status(&d1), Some(PromiseStatus::Rejected));
    assert_eq!(rt.promise_result(&d3), Some(JsValue::from("recovered")));
}

#[test]
fn test_handler_returning_promise_is_adopted() {
    let mut rt = create_test_runtime();
    let inner = rt.create_promise();
    let inner_handle = inner.clone();
    let p = rt.create_fulfilled_promise(1.into());
    let returns_inner = rt.create_native_function("returnsInner", 1, move |_rt, _this, _args| {
        Ok(JsValue::Object(inner_handle.clone()))
    });
    let derived = object(&rt.then(&p, Some(returns_inner), None, None).unwrap());

    rt.drain_microtasks();
    assert_eq!(rt.promise_status(&derived), Some(PromiseStatus::Pending));

    rt.resolve(&inner, "late".into()).unwrap();
    rt.drain_microtasks();
    assert_eq!(rt.promise_status(&derived), Some(PromiseStatus::Fulfilled));
    assert_eq!(rt.promise_result(&derived), Some(JsValue::from("late")));
}

#[test]
fn test_handler_returning_rejected_promise_rejects() {
    let mut rt = create_test_runtime();
    let p = rt.create_fulfilled_promise(1.into());
    let returns_rejected = rt.create_native_function("returnsRejected", 1, |rt, _this, _args| {
        Ok(JsValue::Object(rt.create_rejected_promise("nested".into())))
    });
    let derived = object(&rt.then(&p, Some(returns_rejected), None, None).unwrap());
    rt.drain_microtasks();
    assert_eq!(rt.promise_status(&derived), Some(PromiseStatus::Rejected));
    assert_eq!(rt.promise_result(&derived), Some(JsValue::from("nested")));
}

#[test]
fn test_builtin_then_callable_chains() {
    let mut rt = create_test_runtime();
    let log = new_log();
    let p = rt.create_fulfilled_promise("x".into());
    let then = rt.then_function();
    let h = tagged(&mut rt, &log, "h");
    let derived = rt
        .call_function(&then, JsValue::Object(p), &[h])
        .unwrap();
    assert!(derived.is_promise());
    rt.drain_microtasks();
    assert_eq!(*log.borrow(), vec!["h:\"x\""]);

    let err = rt
        .call_function(&then, JsValue::from(1), &[])
        .unwrap_err();
    assert!(err.is_type_error());
}
