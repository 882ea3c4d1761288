// Tests for unhandled rejection tracking

use super::{create_test_runtime, object, thrower};
use promise_jobs::{JsValue, Runtime, RuntimeConfig};

#[test]
fn test_rejection_without_handler_is_tracked() {
    let mut rt = create_test_runtime();
    let p = rt.create_promise();
    rt.reject(&p, "lonely".into()).unwrap();
    assert_eq!(rt.take_unhandled_rejections(), vec![JsValue::Object(p)]);
}

#[test]
fn test_handler_added_after_rejection_untracks() {
    let mut rt = create_test_runtime();
    let p = rt.create_rejected_promise("late".into());
    let noop = rt.create_native_function("noop", 1, |_rt, _this, _args| Ok(JsValue::Undefined));
    rt.catch(&p, noop).unwrap();
    assert!(rt.take_unhandled_rejections().is_empty());
    rt.drain_microtasks();
    assert!(rt.take_unhandled_rejections().is_empty());
}

#[test]
fn test_throwing_handler_rejects_unobserved_derived_promise() {
    let mut rt = create_test_runtime();
    let p = rt.create_fulfilled_promise(1.into());
    let boom = thrower(&mut rt, "boom");
    let derived = object(&rt.then(&p, Some(boom), None, None).unwrap());
    rt.drain_microtasks();
    assert_eq!(
        rt.take_unhandled_rejections(),
        vec![JsValue::Object(derived)]
    );
}

#[test]
fn test_tracking_can_be_disabled() {
    let config = RuntimeConfig {
        track_unhandled_rejections: false,
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config);
    let p = rt.create_promise();
    rt.reject(&p, "quiet".into()).unwrap();
    assert!(rt.take_unhandled_rejections().is_empty());
}

#[test]
fn test_unpolled_rejections_keep_only_the_newest() {
    let config = RuntimeConfig {
        diagnostics_capacity: 2,
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config);
    let first = rt.create_promise();
    let first_weak = first.downgrade();
    rt.reject(&first, "one".into()).unwrap();
    drop(first);
    let second = rt.create_promise();
    rt.reject(&second, "two".into()).unwrap();
    let third = rt.create_promise();
    rt.reject(&third, "three".into()).unwrap();

    // The dropped entry no longer keeps its promise alive
    assert!(!first_weak.is_alive());
    assert_eq!(
        rt.take_unhandled_rejections(),
        vec![JsValue::Object(second), JsValue::Object(third)]
    );
}

#[test]
fn test_unpolled_reported_errors_keep_only_the_newest() {
    let config = RuntimeConfig {
        diagnostics_capacity: 2,
        ..RuntimeConfig::default()
    };
    let mut rt = Runtime::with_config(config);
    for reason in ["a", "b", "c"] {
        let callback = thrower(&mut rt, reason);
        rt.enqueue_microtask(callback).unwrap();
    }
    assert_eq!(rt.drain_microtasks(), 3);
    assert_eq!(
        rt.take_reported_errors(),
        vec![JsValue::from("b"), JsValue::from("c")]
    );
    assert!(rt.take_reported_errors().is_empty());
}
