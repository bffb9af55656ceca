//! hostjs - host-side bindings for an embedded script runtime.
//!
//! The crate sits between Rust code and an [`Engine`](hostjs_engine::Engine)
//! and provides:
//!
//! - [`Value`]: an RAII handle holding one reference unit. Handles looked
//!   up from a container write assignments back into it.
//! - Hidden metadata: values attached to script objects with
//!   [`Value::add_hidden`], invisible to scripts and reclaimed by
//!   [`Context::compact_heap_stash`] once their owner is unreachable.
//! - [`Context`]: the root owner of a runtime, a sibling evaluation
//!   context, or a view built for one native call. Tracks the `this` of
//!   native calls in progress.
//! - A call boundary turning Rust closures into script functions with
//!   arity checks and error translation ([`Context::new_function`]).
//! - [`promise::resolve`]: synchronous settlement of thenables.
//!
//! Contexts run on [`QuickJs`] unless [`ContextBuilder::engine`] supplies
//! another engine, such as the JSON-document [`Heap`] used in tests.
//!
//! # Example
//!
//! ```
//! use hostjs::{Context, Value};
//!
//! let ctx = Context::new().unwrap();
//! ctx.register_global("greet", |name: String| format!("hello, {name}"))
//!     .unwrap();
//!
//! let greeting = ctx
//!     .global()
//!     .unwrap()
//!     .call_prop("greet", &[Value::new(&ctx, "world").unwrap()])
//!     .unwrap();
//! assert_eq!(greeting.to::<String>().unwrap(), "hello, world");
//! ```
//!
//! # Error messages
//!
//! A thrown object is described by its `stack`, `message`, `lineNumber` and
//! `columnNumber` fields, one line each, the last two as `lineNumber: n`.
//! Anything else is described by its string conversion.
//!
//! # Limits
//!
//! Everything is single threaded. Reference cycles are not collected: a
//! native function whose closure captures a [`Value`] keeps that value, and
//! with it the runtime, alive until the function is released.

pub mod config;
pub mod context;
pub mod convert;
pub mod error;
pub mod function;
pub mod key;
mod message;
pub mod promise;
mod registry;
mod script;
pub mod stash;
pub mod value;
pub mod write_back;

pub use config::{DEFAULT_MEMORY_LIMIT, RuntimeConfig};
pub use context::{Context, ContextBuilder};
pub use convert::{FromJs, IntoJs, Json};
pub use error::{HostError, HostResult};
pub use function::{FromArg, IntoReturn, NativeFunction};
pub use key::{IntoKey, Key};
pub use stash::HeapStash;
pub use value::Value;
pub use write_back::WriteBack;

pub use hostjs_engine::{ContextId, Engine, Heap, ObjectId, QuickJs, RawValue, ValueType};
