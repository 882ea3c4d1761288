// Tests for heap behaviour under promise workloads

use super::{create_test_runtime, new_log, object, tagged};
use promise_jobs::{JsValue, PromiseStatus};

#[test]
fn test_workload_under_aggressive_collection() {
    let mut rt = create_test_runtime();
    rt.set_gc_threshold(1);
    let log = new_log();

    let p = rt.create_promise();
    let h = tagged(&mut rt, &log, "h");
    let mut last = p.clone();
    for _ in 0..50 {
        last = object(&rt.then(&last, Some(h.clone()), None, None).unwrap());
    }
    let ctor = rt.promise_constructor();
    let capability = rt.new_capability(&ctor).unwrap();
    rt.then(&last, None, None, Some(&capability)).unwrap();
    let (cap_promise, _, _) = rt.capability_parts(&capability).unwrap();

    let inner = rt.create_fulfilled_promise("seed".into());
    rt.resolve(&p, JsValue::Object(inner)).unwrap();
    rt.drain_microtasks();

    assert_eq!(log.borrow().len(), 50);
    let cap_promise = object(&cap_promise);
    assert_eq!(rt.promise_status(&cap_promise), Some(PromiseStatus::Fulfilled));
    assert_eq!(rt.promise_result(&cap_promise), Some(JsValue::from("seed")));
    assert!(rt.gc_stats().collections > 0);
}

#[test]
fn test_everything_is_reclaimed_after_drain() {
    let mut rt = create_test_runtime();
    rt.set_gc_threshold(0);
    let baseline = rt.gc_stats().live_objects;

    {
        let log = new_log();
        let p = rt.create_promise();
        let h = tagged(&mut rt, &log, "h");
        let derived = object(&rt.then(&p, Some(h), None, None).unwrap());
        let thenable_source = rt.create_fulfilled_promise(3.into());
        rt.resolve(&p, JsValue::Object(thenable_source)).unwrap();
        rt.catch(&derived, JsValue::Undefined).unwrap();
        rt.drain_microtasks();
    }
    rt.take_unhandled_rejections();
    rt.collect_garbage();

    assert_eq!(rt.gc_stats().live_objects, baseline);
}

#[test]
fn test_collection_reclaims_resolving_function_cycles() {
    let mut rt = create_test_runtime();
    rt.set_gc_threshold(0);
    let baseline = rt.gc_stats().live_objects;

    {
        let p = rt.create_promise();
        // The promise keeps its own resolve function reachable through a property
        let (resolve, _reject) = rt.create_resolving_functions(&p);
        rt.set_property(&p, "resolve", resolve);
    }
    assert!(rt.gc_stats().live_objects > baseline);
    rt.collect_garbage();
    assert_eq!(rt.gc_stats().live_objects, baseline);
}

#[test]
fn test_handles_outliving_runtime_see_plain_objects() {
    let mut rt = create_test_runtime();
    let p = rt.create_promise();
    let derived = object(&rt.then(&p, None, None, None).unwrap());
    rt.resolve(&p, 5.into()).unwrap();
    drop(rt);

    let p = JsValue::Object(p);
    assert!(!p.is_promise());
    assert!(!p.is_callable());
    let copy = derived.clone();
    assert!(copy.borrow().get_property("then").is_none());
    drop(copy);
}
