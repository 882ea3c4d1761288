//! Value and heap record representation
//!
//! Every heap record is a `Gc<JsObject>`. What kind of record it is lives in
//! [`ExoticObject`]; turning a reaction into a job only swaps that variant, so
//! the object keeps its id.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::JsError;
use crate::gc::{Gc, GcPtr, Reset, Traceable};
use crate::runtime::Runtime;

/// Trait for types that have cheap (O(1), reference-counted) clones.
///
/// Makes it explicit at the call site that a clone only bumps a count.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

impl<T: ?Sized> CheapClone for Rc<T> {}

impl CheapClone for Gc<JsObject> {}

/// Handle to a heap object
pub type JsObjectRef = Gc<JsObject>;

/// A runtime value
#[derive(Clone, Default)]
pub enum JsValue {
    /// Also the "no handler" / "no target" / end-of-list sentinel in record slots
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Object(JsObjectRef),
}

impl CheapClone for JsValue {}

impl JsValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, JsValue::Object(_))
    }

    pub fn as_object(&self) -> Option<&JsObjectRef> {
        match self {
            JsValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Check if this value is callable (a function)
    pub fn is_callable(&self) -> bool {
        match self {
            JsValue::Object(obj) => obj
                .try_borrow()
                .map(|o| matches!(o.exotic, ExoticObject::Function(_)))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether this value is a native promise
    pub fn is_promise(&self) -> bool {
        match self {
            JsValue::Object(obj) => obj
                .try_borrow()
                .map(|o| matches!(o.exotic, ExoticObject::Promise(_)))
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            JsValue::Undefined => "undefined",
            JsValue::Null => "object",
            JsValue::Boolean(_) => "boolean",
            JsValue::Number(_) => "number",
            JsValue::String(_) => "string",
            JsValue::Object(_) => {
                if self.is_callable() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    /// Strict equality (===)
    pub fn strict_equals(&self, other: &JsValue) -> bool {
        match (self, other) {
            (JsValue::Undefined, JsValue::Undefined) => true,
            (JsValue::Null, JsValue::Null) => true,
            (JsValue::Boolean(a), JsValue::Boolean(b)) => a == b,
            (JsValue::Number(a), JsValue::Number(b)) => a == b,
            (JsValue::String(a), JsValue::String(b)) => a == b,
            (JsValue::Object(a), JsValue::Object(b)) => Gc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsValue::Undefined => write!(f, "undefined"),
            JsValue::Null => write!(f, "null"),
            JsValue::Boolean(b) => write!(f, "{}", b),
            JsValue::Number(n) => write!(f, "{}", n),
            JsValue::String(s) => write!(f, "\"{}\"", s.as_str()),
            JsValue::Object(obj) => match obj.try_borrow() {
                Ok(o) => write!(f, "{}#{}", o.exotic.kind_name(), obj.id()),
                Err(_) => write!(f, "[object]#{}", obj.id()),
            },
        }
    }
}

impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        JsValue::Boolean(b)
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        JsValue::Number(n)
    }
}

impl From<i32> for JsValue {
    fn from(n: i32) -> Self {
        JsValue::Number(n as f64)
    }
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        JsValue::String(JsString::from(s))
    }
}

impl From<String> for JsValue {
    fn from(s: String) -> Self {
        JsValue::String(JsString::from(s))
    }
}

impl From<JsObjectRef> for JsValue {
    fn from(obj: JsObjectRef) -> Self {
        JsValue::Object(obj)
    }
}

/// Immutable shared string
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct JsString(Rc<str>);

impl CheapClone for JsString {}

impl JsString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl AsRef<str> for JsString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        JsString(Rc::from(s))
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString(Rc::from(s))
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

// ============================================================================
// Heap objects
// ============================================================================

/// A heap object: own data properties plus the record it carries.
#[derive(Debug, Default)]
pub struct JsObject {
    pub properties: FxHashMap<JsString, JsValue>,
    pub exotic: ExoticObject,
}

impl JsObject {
    pub fn get_property(&self, key: &str) -> Option<JsValue> {
        self.properties.get(&JsString::from(key)).cloned()
    }

    pub fn set_property(&mut self, key: impl Into<JsString>, value: JsValue) {
        self.properties.insert(key.into(), value);
    }
}

impl Reset for JsObject {
    fn reset(&mut self) {
        self.properties.clear();
        self.exotic = ExoticObject::Ordinary;
    }
}

impl Traceable for JsObject {
    fn trace<F: FnMut(GcPtr<Self>)>(&self, mut visitor: F) {
        for value in self.properties.values() {
            visit_value(value, &mut visitor);
        }
        match &self.exotic {
            ExoticObject::Ordinary => {}
            ExoticObject::Promise(promise) => {
                visit_value(&promise.reactions, &mut visitor);
                if let Some(result) = &promise.result {
                    visit_value(result, &mut visitor);
                }
            }
            ExoticObject::Reaction(reaction) => {
                for slot in reaction.slots() {
                    visit_value(slot, &mut visitor);
                }
            }
            ExoticObject::FulfillReactionJob(job) | ExoticObject::RejectReactionJob(job) => {
                for slot in job.slots() {
                    visit_value(slot, &mut visitor);
                }
            }
            ExoticObject::ResolveThenableJob(job) => {
                visit_value(&job.context, &mut visitor);
                visitor(job.promise_to_resolve.copy_ref());
                visit_value(&job.then, &mut visitor);
                visit_value(&job.thenable, &mut visitor);
            }
            ExoticObject::CallbackJob(job) => {
                visit_value(&job.context, &mut visitor);
                visit_value(&job.callback, &mut visitor);
            }
            ExoticObject::Capability(capability) => {
                visit_value(&capability.promise, &mut visitor);
                visit_value(&capability.resolve, &mut visitor);
                visit_value(&capability.reject, &mut visitor);
            }
            ExoticObject::Function(func) => match func {
                JsFunction::PromiseResolve(f) | JsFunction::PromiseReject(f) => {
                    visitor(f.promise.copy_ref())
                }
                JsFunction::CapabilityExecutor(capability) => visitor(capability.copy_ref()),
                JsFunction::Native(_) | JsFunction::PromiseThen | JsFunction::PromiseConstructor => {}
            },
        }
    }
}

fn visit_value<F: FnMut(GcPtr<JsObject>)>(value: &JsValue, visitor: &mut F) {
    if let JsValue::Object(obj) = value {
        visitor(obj.copy_ref());
    }
}

/// Record kind carried by a heap object
#[derive(Debug, Default)]
pub enum ExoticObject {
    #[default]
    Ordinary,
    Function(JsFunction),
    Promise(PromiseRecord),
    Reaction(ReactionRecord),
    FulfillReactionJob(ReactionJob),
    RejectReactionJob(ReactionJob),
    ResolveThenableJob(ThenableJob),
    CallbackJob(CallbackJob),
    Capability(CapabilityRecord),
}

impl ExoticObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExoticObject::Ordinary => "Object",
            ExoticObject::Function(_) => "Function",
            ExoticObject::Promise(p) => match p.status {
                PromiseStatus::Pending => "Promise<pending>",
                PromiseStatus::Fulfilled => "Promise<fulfilled>",
                PromiseStatus::Rejected => "Promise<rejected>",
            },
            ExoticObject::Reaction(_) => "PromiseReaction",
            ExoticObject::FulfillReactionJob(_) => "PromiseFulfillReactionJob",
            ExoticObject::RejectReactionJob(_) => "PromiseRejectReactionJob",
            ExoticObject::ResolveThenableJob(_) => "PromiseResolveThenableJob",
            ExoticObject::CallbackJob(_) => "CallbackJob",
            ExoticObject::Capability(_) => "PromiseCapability",
        }
    }

    /// Which queue job this record is, if any
    pub fn job_kind(&self) -> Option<JobKind> {
        match self {
            ExoticObject::FulfillReactionJob(_) => Some(JobKind::FulfillReaction),
            ExoticObject::RejectReactionJob(_) => Some(JobKind::RejectReaction),
            ExoticObject::ResolveThenableJob(_) => Some(JobKind::ResolveThenable),
            ExoticObject::CallbackJob(_) => Some(JobKind::Callback),
            _ => None,
        }
    }
}

/// Kinds of records that can sit on the microtask queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    FulfillReaction,
    RejectReaction,
    ResolveThenable,
    Callback,
}

/// Promise status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

/// State of a native promise
#[derive(Debug)]
pub struct PromiseRecord {
    pub status: PromiseStatus,
    /// Fulfillment value or rejection reason; written once at settlement
    pub result: Option<JsValue>,
    /// Head of the pending reaction list, newest first. Undefined when empty
    /// and always undefined once settled.
    pub reactions: JsValue,
    /// Set once any reaction has been registered
    pub has_handler: bool,
}

impl PromiseRecord {
    pub fn new() -> Self {
        Self {
            status: PromiseStatus::Pending,
            result: None,
            reactions: JsValue::Undefined,
            has_handler: false,
        }
    }
}

impl Default for PromiseRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered fulfill/reject handler pair waiting on a pending promise.
///
/// Same four-slot layout as [`ReactionJob`]; settlement rewrites one into the
/// other in place.
#[derive(Debug, Default)]
#[repr(C)]
pub struct ReactionRecord {
    /// Previously registered reaction, or undefined at the end of the list
    pub next: JsValue,
    /// Callable, or undefined to rethrow the reason
    pub reject_handler: JsValue,
    /// Callable, or undefined to pass the value through
    pub fulfill_handler: JsValue,
    /// Promise or capability to settle with the outcome; undefined for none
    pub target: JsValue,
}

impl ReactionRecord {
    fn slots(&self) -> [&JsValue; 4] {
        [
            &self.next,
            &self.reject_handler,
            &self.fulfill_handler,
            &self.target,
        ]
    }
}

/// Executable form of a reaction
#[derive(Debug, Default)]
#[repr(C)]
pub struct ReactionJob {
    pub argument: JsValue,
    pub context: JsValue,
    pub handler: JsValue,
    pub target: JsValue,
}

impl ReactionJob {
    fn slots(&self) -> [&JsValue; 4] {
        [&self.argument, &self.context, &self.handler, &self.target]
    }
}

/// Deferred call of a foreign `then`
#[derive(Debug)]
pub struct ThenableJob {
    pub context: JsValue,
    pub promise_to_resolve: JsObjectRef,
    pub then: JsValue,
    pub thenable: JsValue,
}

/// Host-enqueued callback
#[derive(Debug)]
pub struct CallbackJob {
    pub context: JsValue,
    pub callback: JsValue,
}

/// Promise together with the functions that settle it
#[derive(Debug, Default)]
pub struct CapabilityRecord {
    pub promise: JsValue,
    pub resolve: JsValue,
    pub reject: JsValue,
}

// ============================================================================
// Functions
// ============================================================================

/// Signature of host callables
pub type NativeFn = Rc<dyn Fn(&mut Runtime, JsValue, &[JsValue]) -> Result<JsValue, JsError>>;

/// Callable kinds
#[derive(Clone)]
pub enum JsFunction {
    Native(NativeFunction),
    /// Resolve half of a resolving-function pair
    PromiseResolve(ResolvingFunction),
    /// Reject half of a resolving-function pair
    PromiseReject(ResolvingFunction),
    /// Built-in `then`, called with the promise as receiver
    PromiseThen,
    /// Built-in constructor-like callable for native promises
    PromiseConstructor,
    /// Captures resolve/reject into the capability it was minted for
    CapabilityExecutor(JsObjectRef),
}

impl JsFunction {
    pub fn name(&self) -> &str {
        match self {
            JsFunction::Native(f) => f.name.as_str(),
            JsFunction::PromiseResolve(_) => "resolve",
            JsFunction::PromiseReject(_) => "reject",
            JsFunction::PromiseThen => "then",
            JsFunction::PromiseConstructor => "Promise",
            JsFunction::CapabilityExecutor(_) => "executor",
        }
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name())
    }
}

/// One half of a resolving-function pair. Both halves share `already_resolved`.
#[derive(Clone)]
pub struct ResolvingFunction {
    pub promise: JsObjectRef,
    pub already_resolved: Rc<Cell<bool>>,
}

/// Host closure wrapper
#[derive(Clone)]
pub struct NativeFunction {
    pub name: JsString,
    pub func: NativeFn,
    pub arity: usize,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}
