//! Promise reactions and microtask scheduling for embeddable script runtimes
//!
//! Promises, reactions and queued jobs all live on a traced heap owned by a
//! [`Runtime`]. Settling a promise rewrites each waiting reaction into a job in
//! place and appends it to the microtask queue; nothing runs until the host
//! calls [`Runtime::drain_microtasks`].
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use promise_jobs::{JsValue, Runtime};
//!
//! let mut rt = Runtime::new();
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! let on_fulfilled = rt.create_native_function("log", 1, move |_rt, _this, args| {
//!     sink.borrow_mut().push(args.first().cloned().unwrap_or_default());
//!     Ok(JsValue::Undefined)
//! });
//!
//! let promise = rt.create_promise();
//! rt.then(&promise, Some(on_fulfilled), None, None).unwrap();
//! rt.resolve(&promise, JsValue::from(42)).unwrap();
//! assert!(seen.borrow().is_empty());
//!
//! assert_eq!(rt.drain_microtasks(), 1);
//! assert_eq!(*seen.borrow(), vec![JsValue::Number(42.0)]);
//! ```

pub mod config;
pub mod error;
pub mod gc;
pub mod runtime;
pub mod value;

pub use config::RuntimeConfig;
pub use error::JsError;
pub use gc::{Gc, GcStats, WeakGc};
pub use runtime::{MicrotaskQueue, Runtime};
pub use value::CheapClone;
pub use value::ExoticObject;
pub use value::JobKind;
pub use value::JsObject;
pub use value::JsObjectRef;
pub use value::JsString;
pub use value::JsValue;
pub use value::PromiseStatus;
