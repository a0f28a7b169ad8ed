//! Hako - host embedding of a sandboxed JavaScript engine
//!
//! This crate provides the object model over an engine reached only through
//! its export table and linear memory:
//! - [`Runtime`]: instantiates the engine and owns its contexts
//! - [`Context`]: one global scope; evaluation and value construction
//! - [`Value`]: reference-counted engine values with single release
//! - [`CallbackRouter`]: dispatch of engine callbacks to host handlers
//! - [`HostHandlers`]: pluggable bodies for every callback surface
//!
//! # Example
//!
//! ```
//! use hako::{Runtime, RuntimeOptions};
//! use test_engine::TestBackend;
//!
//! let backend = TestBackend::new();
//! let runtime = Runtime::create(&backend, &TestBackend::binary(), RuntimeOptions::default())?;
//! let context = runtime.create_context()?;
//!
//! let result = context.eval_code("2 + 2")?;
//! assert_eq!(result.as_number()?, 4.0);
//!
//! runtime.close();
//! # Ok::<(), hako::HakoError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod context;
pub mod functions;
pub mod handlers;
pub mod options;
pub mod router;
pub mod runtime;
pub mod value;

// Re-export main types at crate root
pub use context::Context;
pub use functions::HostFunction;
pub use handlers::{DefaultHandlers, HostHandlers, ModuleSource};
pub use options::{EvalKind, EvalOptions, RuntimeOptions};
pub use router::CallbackRouter;
pub use runtime::{InterruptHandle, Runtime};
pub use value::Value;

pub use core_types::{
    ClassId, ContextHandle, DisposedKind, EngineBackend, HakoError, ModuleDefHandle, Result,
    RuntimeHandle, ValueHandle,
};
