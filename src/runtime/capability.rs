//! Capability records and the built-in promise constructor

use tracing::debug;

use crate::error::JsError;
use crate::runtime::Runtime;
use crate::value::{
    CapabilityRecord, CheapClone, ExoticObject, JsFunction, JsObject, JsObjectRef, JsValue,
    PromiseStatus,
};

impl Runtime {
    /// Build a capability by calling `constructor` the way `new C(executor)`
    /// would: `this` is a fresh pending promise and the only argument is an
    /// executor that captures the resolve and reject functions it is given.
    ///
    /// The capability's promise is whatever object the constructor returns,
    /// or the fresh promise when it returns a primitive. Errors thrown by the
    /// constructor are returned unchanged.
    pub fn new_capability(&mut self, constructor: &JsValue) -> Result<JsObjectRef, JsError> {
        if !constructor.is_callable() {
            return Err(JsError::type_error(format!(
                "Promise capability constructor {} is not a constructor",
                constructor.type_of()
            )));
        }

        let capability = self.heap.alloc_with(JsObject {
            exotic: ExoticObject::Capability(CapabilityRecord::default()),
            ..JsObject::default()
        });
        let executor =
            self.create_function(JsFunction::CapabilityExecutor(capability.cheap_clone()));
        let fresh = self.create_promise();

        let returned = self.call_function(
            constructor,
            JsValue::Object(fresh.cheap_clone()),
            &[JsValue::Object(executor)],
        )?;
        let promise = if returned.is_object() {
            returned
        } else {
            JsValue::Object(fresh)
        };

        let callable = {
            let mut obj = capability.borrow_mut();
            let ExoticObject::Capability(record) = &mut obj.exotic else {
                return Err(JsError::internal_error("capability record was replaced"));
            };
            record.promise = promise;
            record.resolve.is_callable() && record.reject.is_callable()
        };
        if !callable {
            return Err(JsError::type_error(
                "Promise resolve or reject function is not callable",
            ));
        }

        debug!(capability = capability.id(), "capability created");
        Ok(capability)
    }

    /// The `(promise, resolve, reject)` slots of a capability record
    pub fn capability_parts(&self, capability: &JsObjectRef) -> Option<(JsValue, JsValue, JsValue)> {
        match &capability.borrow().exotic {
            ExoticObject::Capability(record) => Some((
                record.promise.clone(),
                record.resolve.clone(),
                record.reject.clone(),
            )),
            _ => None,
        }
    }

    pub(crate) fn capability_executor(
        &mut self,
        capability: &JsObjectRef,
        args: &[JsValue],
    ) -> Result<JsValue, JsError> {
        let mut obj = capability.borrow_mut();
        let ExoticObject::Capability(record) = &mut obj.exotic else {
            return Err(JsError::internal_error("executor is not bound to a capability"));
        };
        if !record.resolve.is_undefined() || !record.reject.is_undefined() {
            return Err(JsError::type_error(
                "Promise executor has already been invoked with non-undefined arguments",
            ));
        }
        record.resolve = args.first().cloned().unwrap_or_default();
        record.reject = args.get(1).cloned().unwrap_or_default();
        Ok(JsValue::Undefined)
    }

    /// Built-in constructor: `this` is reused when it is an untouched pending
    /// promise, otherwise a new promise is created. The executor runs
    /// synchronously with a fresh resolving pair; if it throws before either
    /// function was called, the promise is rejected with the error.
    pub(crate) fn construct_promise(
        &mut self,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, JsError> {
        let executor = args.first().cloned().unwrap_or_default();
        if !executor.is_callable() {
            return Err(JsError::type_error(format!(
                "Promise resolver {} is not a function",
                executor.type_of()
            )));
        }

        let promise = match &this {
            JsValue::Object(obj) if is_untouched_promise(obj) => obj.cheap_clone(),
            _ => self.create_promise(),
        };

        let (resolve, reject, already_resolved) = self.resolving_functions(&promise);
        if let Err(err) = self.call_function(&executor, JsValue::Undefined, &[resolve, reject]) {
            if !already_resolved.replace(true) {
                self.reject(&promise, err.to_value())?;
            }
        }
        Ok(JsValue::Object(promise))
    }
}

fn is_untouched_promise(obj: &JsObjectRef) -> bool {
    match obj.try_borrow() {
        Ok(obj) => match &obj.exotic {
            ExoticObject::Promise(state) => {
                state.status == PromiseStatus::Pending
                    && state.reactions.is_undefined()
                    && !state.has_handler
            }
            _ => false,
        },
        Err(_) => false,
    }
}
