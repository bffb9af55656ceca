//! hostjs-engine - engine capability interface for hostjs.
//!
//! The binding layer in `hostjs-core` never touches a script runtime
//! directly. It talks to an [`Engine`]: reference-counted values addressed
//! by [`RawValue`], contexts addressed by [`ContextId`], and a single
//! pending-exception slot.
//!
//! Two implementations ship with the crate:
//!
//! - [`QuickJs`] runs scripts on an embedded QuickJS runtime. This is the
//!   engine `hostjs-core` builds contexts on.
//! - [`Heap`] is a small in-process engine without a parser: objects,
//!   arrays, strings, native functions, promises with a FIFO job queue, a
//!   memory ceiling, JSON, and JSON-only compiled units. Its cell count is
//!   observable, which makes it the double of choice for ownership tests.
//!
//! # Example
//!
//! ```
//! use hostjs_engine::{Engine, PropertyKey, QuickJs, RawValue};
//!
//! let engine = QuickJs::new().unwrap();
//! let object = engine.new_object().unwrap();
//! engine.set_property(object, &PropertyKey::from("x"), RawValue::Int(1)).unwrap();
//! assert_eq!(engine.to_json(object).unwrap().as_deref(), Some(r#"{"x":1}"#));
//! engine.free(object);
//! ```

pub mod engine;
pub mod error;
pub mod heap;
pub mod quickjs;
pub mod value;

pub use engine::{CallFrame, Engine, InterruptHandler, NativeCallback, PromiseCapability};
pub use error::{AllocationError, EngineResult, ErrorKind, PendingException};
pub use heap::{Heap, INTRINSIC_REALM, PromiseStatus};
pub use quickjs::QuickJs;
pub use value::{ContextId, ObjectId, PropertyKey, RawValue, ValueType};
