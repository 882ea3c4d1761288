//! Microtask queue and job execution

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::JsError;
use crate::runtime::Runtime;
use crate::value::{
    CallbackJob, CheapClone, ExoticObject, JsObject, JsObjectRef, JsValue, ReactionJob,
};

/// FIFO of job records awaiting execution
#[derive(Debug, Default)]
pub struct MicrotaskQueue {
    jobs: VecDeque<JsObjectRef>,
    /// Total jobs ever enqueued
    enqueued: u64,
}

impl MicrotaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            jobs: VecDeque::with_capacity(capacity),
            enqueued: 0,
        }
    }

    /// Append a job record at the tail
    pub fn enqueue(&mut self, job: JsObjectRef) {
        trace!(job = job.id(), kind = job.borrow().exotic.kind_name(), "enqueue");
        self.enqueued += 1;
        self.jobs.push_back(job);
    }

    pub fn pop(&mut self) -> Option<JsObjectRef> {
        self.jobs.pop_front()
    }

    /// The job that runs next
    pub fn front(&self) -> Option<&JsObjectRef> {
        self.jobs.front()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn total_enqueued(&self) -> u64 {
        self.enqueued
    }

    /// Queued jobs, head first
    pub fn iter(&self) -> impl Iterator<Item = &JsObjectRef> {
        self.jobs.iter()
    }
}

impl Runtime {
    /// Run queued jobs until the queue is empty, including jobs queued while
    /// draining. Returns the number of jobs run.
    ///
    /// Calling this from inside a running job does nothing and returns 0.
    pub fn drain_microtasks(&mut self) -> usize {
        if self.draining {
            trace!("nested drain ignored");
            return 0;
        }
        self.draining = true;

        let mut executed = 0usize;
        while let Some(job) = self.queue.pop() {
            if let Err(err) = self.run_job(&job) {
                self.report_error(err);
            }
            executed += 1;
        }

        self.draining = false;
        if executed > 0 {
            debug!(executed, "microtask queue drained");
        }
        executed
    }

    pub fn pending_microtasks(&self) -> usize {
        self.queue.len()
    }

    pub fn microtask_queue(&self) -> &MicrotaskQueue {
        &self.queue
    }

    /// Queue `callback` to be called with no arguments on the next drain
    pub fn enqueue_microtask(&mut self, callback: JsValue) -> Result<(), JsError> {
        if !callback.is_callable() {
            return Err(JsError::type_error(format!(
                "Microtask callback {} is not a function",
                callback.type_of()
            )));
        }
        let job = self.heap.alloc_with(JsObject {
            exotic: ExoticObject::CallbackJob(CallbackJob {
                context: self.current_context().clone(),
                callback,
            }),
            ..JsObject::default()
        });
        self.queue.enqueue(job);
        Ok(())
    }

    fn run_job(&mut self, job: &JsObjectRef) -> Result<(), JsError> {
        let record = std::mem::take(&mut job.borrow_mut().exotic);
        trace!(job = job.id(), kind = record.kind_name(), "run");
        match record {
            ExoticObject::FulfillReactionJob(reaction) => {
                self.run_reaction_job(reaction, true);
                Ok(())
            }
            ExoticObject::RejectReactionJob(reaction) => {
                self.run_reaction_job(reaction, false);
                Ok(())
            }
            ExoticObject::ResolveThenableJob(thenable) => {
                self.run_thenable_job(thenable);
                Ok(())
            }
            ExoticObject::CallbackJob(callback) => {
                self.run_callback_job(callback);
                Ok(())
            }
            other => Err(JsError::internal_error(format!(
                "{} is not a microtask",
                other.kind_name()
            ))),
        }
    }

    fn run_reaction_job(&mut self, job: ReactionJob, fulfilled: bool) {
        let ReactionJob {
            argument,
            context,
            handler,
            target,
        } = job;
        self.with_context(context, |rt| {
            let outcome = if handler.is_undefined() {
                if fulfilled { Ok(argument) } else { Err(argument) }
            } else {
                rt.call_function(&handler, JsValue::Undefined, &[argument])
                    .map_err(|err| err.to_value())
            };
            rt.settle_target(&target, outcome);
        });
    }

    /// Hand a job's outcome to its target: a native promise, a capability, or
    /// nothing.
    pub(crate) fn settle_target(&mut self, target: &JsValue, outcome: Result<JsValue, JsValue>) {
        let JsValue::Object(obj) = target else {
            return;
        };

        enum Target {
            Promise,
            Capability(JsValue, JsValue),
            Other(&'static str),
        }
        let kind = match &obj.borrow().exotic {
            ExoticObject::Promise(_) => Target::Promise,
            ExoticObject::Capability(record) => {
                Target::Capability(record.resolve.clone(), record.reject.clone())
            }
            other => Target::Other(other.kind_name()),
        };

        let result = match kind {
            Target::Promise => {
                let promise = obj.cheap_clone();
                match outcome {
                    Ok(value) => self.resolve(&promise, value),
                    Err(reason) => self.reject(&promise, reason),
                }
            }
            Target::Capability(resolve, reject) => {
                let (func, value) = match outcome {
                    Ok(value) => (resolve, value),
                    Err(reason) => (reject, reason),
                };
                self.call_function(&func, JsValue::Undefined, &[value])
                    .map(|_| ())
            }
            Target::Other(kind) => Err(JsError::internal_error(format!(
                "reaction target {} cannot be settled",
                kind
            ))),
        };
        if let Err(err) = result {
            self.report_error(err);
        }
    }

    fn run_callback_job(&mut self, job: CallbackJob) {
        let CallbackJob { context, callback } = job;
        self.with_context(context, |rt| {
            if let Err(err) = rt.call_function(&callback, JsValue::Undefined, &[]) {
                rt.report_error(err);
            }
        });
    }
}
