#![no_main]

use libfuzzer_sys::fuzz_target;
use promise_jobs::{JsObjectRef, JsValue, PromiseStatus, Runtime};

const MAX_OPS: usize = 2_000;

fuzz_target!(|data: &[u8]| {
    let mut rt = Runtime::new();
    rt.set_gc_threshold(1 + data.first().copied().unwrap_or(0) as usize % 16);

    let identity = rt.create_native_function("identity", 1, |_rt, _this, args| {
        Ok(args.first().cloned().unwrap_or_default())
    });
    let thrower = rt.create_native_function("thrower", 1, |_rt, _this, args| {
        Err(promise_jobs::JsError::thrown(
            args.first().cloned().unwrap_or_default(),
        ))
    });

    let mut promises: Vec<JsObjectRef> = vec![rt.create_promise()];

    for chunk in data.chunks(2).take(MAX_OPS) {
        let op = chunk[0];
        let arg = chunk.get(1).copied().unwrap_or(0) as usize;
        let target = promises[arg % promises.len()].clone();
        let other = promises[(arg / 7) % promises.len()].clone();

        match op % 9 {
            0 => promises.push(rt.create_promise()),
            1 => {
                let _ = rt.resolve(&target, JsValue::from(arg as i32));
            }
            2 => {
                let _ = rt.reject(&target, JsValue::from(arg as i32));
            }
            3 => {
                let derived = rt.then(&target, Some(identity.clone()), Some(thrower.clone()), None);
                if let Ok(JsValue::Object(p)) = derived {
                    promises.push(p);
                }
            }
            4 => {
                let _ = rt.observe(&target, None, Some(identity.clone()));
            }
            5 => {
                // Includes self-resolution when both indices match
                let _ = rt.resolve(&target, JsValue::Object(other));
            }
            6 => {
                rt.drain_microtasks();
            }
            7 => {
                let ctor = rt.promise_constructor();
                if let Ok(cap) = rt.new_capability(&ctor) {
                    let _ = rt.then(&target, None, None, Some(&cap));
                }
            }
            _ => {
                rt.collect_garbage();
            }
        }
    }

    rt.drain_microtasks();
    assert_eq!(rt.pending_microtasks(), 0);
    for p in &promises {
        let status = rt.promise_status(p);
        assert!(status.is_some());
        if status != Some(PromiseStatus::Pending) {
            assert!(rt.pending_reactions(p).is_empty());
        }
    }
});
