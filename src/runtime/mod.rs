//! The promise runtime: heap, microtask queue and the callable dispatcher
//!
//! Promise operations are split by concern:
//! - `promise`: state machine and reaction registration
//! - `reaction`: list reversal and the reaction-to-job morph
//! - `queue`: the microtask queue and job execution
//! - `thenable`: thenable detection and deferred `then` calls
//! - `capability`: capability records and the built-in constructor

pub mod capability;
pub mod promise;
pub mod queue;
pub mod reaction;
pub mod thenable;

pub use queue::MicrotaskQueue;

use std::collections::VecDeque;

use tracing::warn;

use crate::config::RuntimeConfig;
use crate::error::JsError;
use crate::gc::{GcStats, Heap};
use crate::value::{
    CheapClone, ExoticObject, JsFunction, JsObject, JsObjectRef, JsString, JsValue,
    NativeFunction,
};

/// Owner of all promise state. Single-threaded: the host calls
/// [`Runtime::drain_microtasks`] between synchronous units of work.
pub struct Runtime {
    // Dropped first: every object is reset, and the handles below (or any the
    // host still holds) only see default objects afterwards.
    pub(crate) heap: Heap<JsObject>,
    pub(crate) queue: MicrotaskQueue,
    /// Ambient context captured by jobs created from now on
    context: JsValue,
    /// Set while `drain_microtasks` is running
    draining: bool,
    /// Both capped by `RuntimeConfig::diagnostics_capacity`
    unhandled_rejections: VecDeque<JsObjectRef>,
    reported_errors: VecDeque<JsValue>,
    config: RuntimeConfig,
    then_function: JsObjectRef,
    promise_constructor: JsObjectRef,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let heap: Heap<JsObject> = Heap::new();
        heap.set_gc_threshold(config.gc_threshold);
        let then_function = heap.alloc_with(function_object(JsFunction::PromiseThen));
        let promise_constructor = heap.alloc_with(function_object(JsFunction::PromiseConstructor));
        Self {
            heap,
            queue: MicrotaskQueue::with_capacity(config.queue_capacity),
            context: JsValue::Undefined,
            draining: false,
            unhandled_rejections: VecDeque::new(),
            reported_errors: VecDeque::new(),
            config,
            then_function,
            promise_constructor,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Set the GC threshold (0 = disable automatic collection)
    pub fn set_gc_threshold(&mut self, threshold: usize) {
        self.config.gc_threshold = threshold;
        self.heap.set_gc_threshold(threshold);
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    pub fn collect_garbage(&self) -> usize {
        self.heap.collect()
    }

    // ------------------------------------------------------------------
    // Objects and functions
    // ------------------------------------------------------------------

    /// Create an ordinary object with no properties
    pub fn create_object(&mut self) -> JsObjectRef {
        self.heap.alloc()
    }

    pub fn create_function(&mut self, func: JsFunction) -> JsObjectRef {
        self.heap.alloc_with(function_object(func))
    }

    /// Wrap a Rust closure as a callable value
    pub fn create_native_function<F>(&mut self, name: &str, arity: usize, func: F) -> JsValue
    where
        F: Fn(&mut Runtime, JsValue, &[JsValue]) -> Result<JsValue, JsError> + 'static,
    {
        let native = NativeFunction {
            name: JsString::from(name),
            func: std::rc::Rc::new(func),
            arity,
        };
        JsValue::Object(self.create_function(JsFunction::Native(native)))
    }

    /// Own data property lookup; undefined when absent or not an object
    pub fn get_property(&self, target: &JsValue, key: &str) -> JsValue {
        match target {
            JsValue::Object(obj) => obj.borrow().get_property(key).unwrap_or_default(),
            _ => JsValue::Undefined,
        }
    }

    pub fn set_property(&mut self, target: &JsObjectRef, key: &str, value: JsValue) {
        target.borrow_mut().set_property(key, value);
    }

    /// The built-in `then`, as found on every native promise
    pub fn then_function(&self) -> JsValue {
        JsValue::Object(self.then_function.cheap_clone())
    }

    /// The built-in constructor-like callable for native promises
    pub fn promise_constructor(&self) -> JsValue {
        JsValue::Object(self.promise_constructor.cheap_clone())
    }

    /// Invoke `callee` with `this` and `args`.
    ///
    /// A thrown value comes back as `Err`; it is up to the caller whether that
    /// becomes a rejection.
    pub fn call_function(
        &mut self,
        callee: &JsValue,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, JsError> {
        let JsValue::Object(obj) = callee else {
            return Err(JsError::type_error(format!(
                "{} is not a function",
                callee.type_of()
            )));
        };

        let func = {
            let obj_ref = obj.borrow();
            match &obj_ref.exotic {
                ExoticObject::Function(f) => f.clone(),
                other => {
                    return Err(JsError::type_error(format!(
                        "{} is not a function",
                        other.kind_name()
                    )));
                }
            }
        };

        let first = args.first().cloned().unwrap_or_default();
        match func {
            JsFunction::Native(native) => (native.func)(self, this, args),
            JsFunction::PromiseResolve(f) => {
                if !f.already_resolved.replace(true) {
                    self.resolve(&f.promise, first)?;
                }
                Ok(JsValue::Undefined)
            }
            JsFunction::PromiseReject(f) => {
                if !f.already_resolved.replace(true) {
                    self.reject(&f.promise, first)?;
                }
                Ok(JsValue::Undefined)
            }
            JsFunction::PromiseThen => self.promise_then_builtin(this, args),
            JsFunction::PromiseConstructor => self.construct_promise(this, args),
            JsFunction::CapabilityExecutor(capability) => {
                self.capability_executor(&capability, args)
            }
        }
    }

    // ------------------------------------------------------------------
    // Ambient context
    // ------------------------------------------------------------------

    /// Replace the ambient context, returning the previous one
    pub fn set_context(&mut self, context: JsValue) -> JsValue {
        std::mem::replace(&mut self.context, context)
    }

    /// The context of the running job, or the ambient one outside a drain
    pub fn current_context(&self) -> &JsValue {
        &self.context
    }

    pub(crate) fn with_context<R>(
        &mut self,
        context: JsValue,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let saved = std::mem::replace(&mut self.context, context);
        let result = f(self);
        self.context = saved;
        result
    }

    // ------------------------------------------------------------------
    // Host-visible diagnostics
    // ------------------------------------------------------------------

    /// Errors that had no promise to reject, oldest first.
    ///
    /// At most `diagnostics_capacity` are kept between calls; older ones are
    /// dropped after being logged.
    pub fn take_reported_errors(&mut self) -> Vec<JsValue> {
        std::mem::take(&mut self.reported_errors).into()
    }

    pub(crate) fn report_error(&mut self, err: JsError) {
        warn!(error = %err, "microtask error has no promise to reject");
        let capacity = self.config.diagnostics_capacity;
        if push_bounded(&mut self.reported_errors, err.to_value(), capacity) {
            warn!(capacity, "reported error list full, oldest entry dropped");
        }
    }

    /// Promises rejected with no handler attached, oldest first.
    ///
    /// The list holds the promises alive, so hosts that track rejections
    /// should poll it. At most `diagnostics_capacity` are kept between calls.
    pub fn take_unhandled_rejections(&mut self) -> Vec<JsValue> {
        std::mem::take(&mut self.unhandled_rejections)
            .into_iter()
            .map(JsValue::Object)
            .collect()
    }

    pub(crate) fn track_rejection(&mut self, promise: &JsObjectRef) {
        if self.config.track_unhandled_rejections {
            warn!(promise = promise.id(), "promise rejected with no handler");
            let capacity = self.config.diagnostics_capacity;
            if push_bounded(&mut self.unhandled_rejections, promise.cheap_clone(), capacity) {
                warn!(capacity, "unhandled rejection list full, oldest entry dropped");
            }
        }
    }

    pub(crate) fn forget_rejection(&mut self, promise: &JsObjectRef) {
        self.unhandled_rejections.retain(|p| p != promise);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Append `item`, dropping the oldest entry when `capacity` (non-zero) is
/// reached. Returns whether an entry was dropped.
fn push_bounded<T>(list: &mut VecDeque<T>, item: T, capacity: usize) -> bool {
    let full = capacity > 0 && list.len() >= capacity;
    if full {
        list.pop_front();
    }
    list.push_back(item);
    full
}

fn function_object(func: JsFunction) -> JsObject {
    JsObject {
        exotic: ExoticObject::Function(func),
        ..JsObject::default()
    }
}
