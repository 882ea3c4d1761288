//! Promise state machine and reaction registration

use tracing::debug;

use crate::error::JsError;
use crate::gc::Gc;
use crate::runtime::Runtime;
use crate::value::{
    CheapClone, ExoticObject, JsObject, JsObjectRef, JsValue, PromiseRecord, PromiseStatus,
    ReactionRecord, ThenableJob,
};

impl Runtime {
    /// Create a new pending promise
    pub fn create_promise(&mut self) -> JsObjectRef {
        self.heap.alloc_with(JsObject {
            exotic: ExoticObject::Promise(PromiseRecord::new()),
            ..JsObject::default()
        })
    }

    /// Create a promise already fulfilled with `value`. The value is stored as
    /// is, without thenable unwrapping.
    pub fn create_fulfilled_promise(&mut self, value: JsValue) -> JsObjectRef {
        self.heap.alloc_with(JsObject {
            exotic: ExoticObject::Promise(PromiseRecord {
                status: PromiseStatus::Fulfilled,
                result: Some(value),
                ..PromiseRecord::new()
            }),
            ..JsObject::default()
        })
    }

    /// Create a promise already rejected with `reason`
    pub fn create_rejected_promise(&mut self, reason: JsValue) -> JsObjectRef {
        let promise = self.heap.alloc_with(JsObject {
            exotic: ExoticObject::Promise(PromiseRecord {
                status: PromiseStatus::Rejected,
                result: Some(reason),
                ..PromiseRecord::new()
            }),
            ..JsObject::default()
        });
        self.track_rejection(&promise);
        promise
    }

    /// Native promises are returned unchanged; anything else is wrapped in a
    /// new promise resolved with it.
    pub fn promise_resolve(&mut self, value: JsValue) -> Result<JsObjectRef, JsError> {
        if let JsValue::Object(obj) = &value {
            if value.is_promise() {
                return Ok(obj.cheap_clone());
            }
        }
        let promise = self.create_promise();
        self.resolve(&promise, value)?;
        Ok(promise)
    }

    /// `None` when `promise` is not a native promise
    pub fn promise_status(&self, promise: &JsObjectRef) -> Option<PromiseStatus> {
        match &promise.borrow().exotic {
            ExoticObject::Promise(state) => Some(state.status),
            _ => None,
        }
    }

    /// Settlement value or reason; `None` while pending
    pub fn promise_result(&self, promise: &JsObjectRef) -> Option<JsValue> {
        match &promise.borrow().exotic {
            ExoticObject::Promise(state) => state.result.clone(),
            _ => None,
        }
    }

    /// Resolve `promise` with `value`.
    ///
    /// Does nothing once the promise has settled. A value with a callable
    /// `then` is not inspected further here: a thenable job is queued and the
    /// promise stays pending until that job runs.
    pub fn resolve(&mut self, promise: &JsObjectRef, value: JsValue) -> Result<(), JsError> {
        if self.ensure_promise(promise)? != PromiseStatus::Pending {
            return Ok(());
        }

        if let JsValue::Object(obj) = &value {
            if Gc::ptr_eq(obj, promise) {
                let err = JsError::type_error("Chaining cycle detected for promise #<Promise>");
                return self.reject(promise, err.to_value());
            }
        }

        if let Some(then) = self.get_then(&value) {
            debug!(promise = promise.id(), "resolution deferred to thenable job");
            let job = self.heap.alloc_with(JsObject {
                exotic: ExoticObject::ResolveThenableJob(ThenableJob {
                    context: self.current_context().clone(),
                    promise_to_resolve: promise.cheap_clone(),
                    then,
                    thenable: value,
                }),
                ..JsObject::default()
            });
            self.queue.enqueue(job);
            return Ok(());
        }

        self.settle(promise, PromiseStatus::Fulfilled, value)
    }

    /// Reject `promise` with `reason`. Does nothing once settled.
    pub fn reject(&mut self, promise: &JsObjectRef, reason: JsValue) -> Result<(), JsError> {
        self.settle(promise, PromiseStatus::Rejected, reason)
    }

    fn settle(
        &mut self,
        promise: &JsObjectRef,
        status: PromiseStatus,
        result: JsValue,
    ) -> Result<(), JsError> {
        let (reactions, has_handler) = {
            let mut obj = promise.borrow_mut();
            let ExoticObject::Promise(ref mut state) = obj.exotic else {
                return Err(JsError::type_error("Not a promise"));
            };
            if state.status != PromiseStatus::Pending {
                return Ok(()); // Already settled, ignore
            }
            state.status = status;
            state.result = Some(result.clone());
            (std::mem::take(&mut state.reactions), state.has_handler)
        };

        debug!(promise = promise.id(), ?status, "promise settled");
        if status == PromiseStatus::Rejected && !has_handler {
            self.track_rejection(promise);
        }
        self.trigger_reactions(reactions, status, result)
    }

    /// Register reactions on `promise`.
    ///
    /// Settles a fresh native promise with the handler's outcome, or the given
    /// capability, and returns that promise (the capability's `promise` slot in
    /// the second case). Non-callable handlers pass the value through or rethrow
    /// the reason. Handlers never run before the next drain, even if `promise`
    /// has already settled.
    pub fn then(
        &mut self,
        promise: &JsObjectRef,
        on_fulfilled: Option<JsValue>,
        on_rejected: Option<JsValue>,
        capability: Option<&JsObjectRef>,
    ) -> Result<JsValue, JsError> {
        self.ensure_promise(promise)?;

        let (target, returned) = match capability {
            Some(capability) => {
                let promise_slot = match &capability.borrow().exotic {
                    ExoticObject::Capability(record) => record.promise.clone(),
                    _ => return Err(JsError::type_error("Not a promise capability")),
                };
                (JsValue::Object(capability.cheap_clone()), promise_slot)
            }
            None => {
                let derived = self.create_promise();
                (
                    JsValue::Object(derived.cheap_clone()),
                    JsValue::Object(derived),
                )
            }
        };

        self.perform_then(
            promise,
            on_fulfilled.unwrap_or_default(),
            on_rejected.unwrap_or_default(),
            target,
        )?;
        Ok(returned)
    }

    pub fn catch(
        &mut self,
        promise: &JsObjectRef,
        on_rejected: JsValue,
    ) -> Result<JsValue, JsError> {
        self.then(promise, None, Some(on_rejected), None)
    }

    /// Register reactions whose outcome is discarded (no derived promise)
    pub fn observe(
        &mut self,
        promise: &JsObjectRef,
        on_fulfilled: Option<JsValue>,
        on_rejected: Option<JsValue>,
    ) -> Result<(), JsError> {
        self.perform_then(
            promise,
            on_fulfilled.unwrap_or_default(),
            on_rejected.unwrap_or_default(),
            JsValue::Undefined,
        )
    }

    /// Reaction records still waiting on `promise`, in registration order.
    /// Empty once the promise has settled.
    pub fn pending_reactions(&self, promise: &JsObjectRef) -> Vec<JsObjectRef> {
        let mut current = match &promise.borrow().exotic {
            ExoticObject::Promise(state) => state.reactions.clone(),
            _ => JsValue::Undefined,
        };
        let mut nodes = Vec::new();
        while let JsValue::Object(node) = std::mem::take(&mut current) {
            current = match &node.borrow().exotic {
                ExoticObject::Reaction(reaction) => reaction.next.clone(),
                _ => JsValue::Undefined,
            };
            nodes.push(node);
        }
        nodes.reverse();
        nodes
    }

    pub(crate) fn perform_then(
        &mut self,
        promise: &JsObjectRef,
        on_fulfilled: JsValue,
        on_rejected: JsValue,
        target: JsValue,
    ) -> Result<(), JsError> {
        let fulfill_handler = if on_fulfilled.is_callable() {
            on_fulfilled
        } else {
            JsValue::Undefined
        };
        let reject_handler = if on_rejected.is_callable() {
            on_rejected
        } else {
            JsValue::Undefined
        };

        // Allocate before borrowing the promise: allocation may collect.
        let reaction = self.heap.alloc_with(JsObject {
            exotic: ExoticObject::Reaction(ReactionRecord {
                next: JsValue::Undefined,
                reject_handler,
                fulfill_handler,
                target,
            }),
            ..JsObject::default()
        });

        let settled = {
            let mut obj = promise.borrow_mut();
            let ExoticObject::Promise(ref mut state) = obj.exotic else {
                return Err(JsError::type_error("Not a promise"));
            };
            let had_handler = std::mem::replace(&mut state.has_handler, true);
            match state.status {
                PromiseStatus::Pending => {
                    let previous = std::mem::replace(
                        &mut state.reactions,
                        JsValue::Object(reaction.cheap_clone()),
                    );
                    let mut node = reaction.borrow_mut();
                    if let ExoticObject::Reaction(record) = &mut node.exotic {
                        record.next = previous;
                    }
                    None
                }
                status => Some((status, state.result.clone().unwrap_or_default(), had_handler)),
            }
        };

        if let Some((status, result, had_handler)) = settled {
            if status == PromiseStatus::Rejected && !had_handler {
                debug!(promise = promise.id(), "handler added after rejection");
                self.forget_rejection(promise);
            }
            self.morph_reaction(&reaction, status, result)?;
            self.queue.enqueue(reaction);
        }
        Ok(())
    }

    /// `then` as a callable: the receiver must be a native promise
    pub(crate) fn promise_then_builtin(
        &mut self,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, JsError> {
        let promise = match &this {
            JsValue::Object(obj) if this.is_promise() => obj.cheap_clone(),
            _ => {
                return Err(JsError::type_error(
                    "Method Promise.prototype.then called on incompatible receiver",
                ));
            }
        };
        self.then(
            &promise,
            args.first().cloned(),
            args.get(1).cloned(),
            None,
        )
    }

    fn ensure_promise(&self, promise: &JsObjectRef) -> Result<PromiseStatus, JsError> {
        self.promise_status(promise)
            .ok_or_else(|| JsError::type_error("Not a promise"))
    }
}
