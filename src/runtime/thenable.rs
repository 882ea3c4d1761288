//! Thenable detection and the deferred `then` call

use std::cell::Cell;
use std::rc::Rc;

use tracing::trace;

use crate::runtime::Runtime;
use crate::value::{
    CheapClone, ExoticObject, JsFunction, JsObjectRef, JsValue, ResolvingFunction, ThenableJob,
};

impl Runtime {
    /// The callable `then` that `value` exposes, if any.
    ///
    /// An own `then` property decides on its own: callable means thenable,
    /// anything else means not. Without one, native promises use the built-in
    /// `then`. Nothing is invoked.
    pub fn get_then(&self, value: &JsValue) -> Option<JsValue> {
        let JsValue::Object(obj) = value else {
            return None;
        };
        let obj = obj.try_borrow().ok()?;
        if let Some(then) = obj.get_property("then") {
            return then.is_callable().then_some(then);
        }
        match obj.exotic {
            ExoticObject::Promise(_) => Some(self.then_function()),
            _ => None,
        }
    }

    pub fn is_thenable(&self, value: &JsValue) -> bool {
        self.get_then(value).is_some()
    }

    /// Mint a resolve/reject pair for `promise`. Whichever is called first
    /// wins; later calls to either do nothing.
    pub fn create_resolving_functions(&mut self, promise: &JsObjectRef) -> (JsValue, JsValue) {
        let (resolve, reject, _) = self.resolving_functions(promise);
        (resolve, reject)
    }

    pub(crate) fn resolving_functions(
        &mut self,
        promise: &JsObjectRef,
    ) -> (JsValue, JsValue, Rc<Cell<bool>>) {
        let already_resolved = Rc::new(Cell::new(false));
        let resolve = self.create_function(JsFunction::PromiseResolve(ResolvingFunction {
            promise: promise.cheap_clone(),
            already_resolved: already_resolved.clone(),
        }));
        let reject = self.create_function(JsFunction::PromiseReject(ResolvingFunction {
            promise: promise.cheap_clone(),
            already_resolved: already_resolved.clone(),
        }));
        (
            JsValue::Object(resolve),
            JsValue::Object(reject),
            already_resolved,
        )
    }

    pub(crate) fn run_thenable_job(&mut self, job: ThenableJob) {
        let ThenableJob {
            context,
            promise_to_resolve,
            then,
            thenable,
        } = job;

        self.with_context(context, |rt| {
            let (resolve_fn, reject_fn, already_resolved) =
                rt.resolving_functions(&promise_to_resolve);

            // Built-in then on a native promise: register directly, no derived
            // promise is needed since the outcome goes to the resolving pair.
            let native = match &thenable {
                JsValue::Object(obj) if then == rt.then_function() && thenable.is_promise() => {
                    Some(obj.cheap_clone())
                }
                _ => None,
            };
            let result = match native {
                Some(adopted) => {
                    trace!(
                        promise = promise_to_resolve.id(),
                        adopted = adopted.id(),
                        "adopting native promise"
                    );
                    rt.perform_then(&adopted, resolve_fn, reject_fn, JsValue::Undefined)
                }
                None => rt
                    .call_function(&then, thenable, &[resolve_fn, reject_fn])
                    .map(|_| ()),
            };

            if let Err(err) = result {
                if !already_resolved.replace(true) {
                    if let Err(err) = rt.reject(&promise_to_resolve, err.to_value()) {
                        rt.report_error(err);
                    }
                }
            }
        });
    }
}
