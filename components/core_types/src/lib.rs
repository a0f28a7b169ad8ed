//! Handle types, errors and boundary traits for the engine embedding.
//!
//! This crate provides the vocabulary shared by every other component:
//! typed integer handles for engine-side objects, the error taxonomy, and the
//! two traits that describe the boundary with the sandboxed engine.
//!
//! # Overview
//!
//! - [`RuntimeHandle`], [`ContextHandle`], [`ValueHandle`],
//!   [`ModuleDefHandle`], [`ClassId`], [`MemoryOffset`] - typed handles
//! - [`HakoError`] - errors surfaced to host code
//! - [`EngineExports`] / [`LinearMemory`] - what the engine offers
//! - [`HostImports`] / [`HostImport`] - what the engine calls back into
//! - [`EngineBackend`] - instantiation of an engine binary
//!
//! # Examples
//!
//! ```
//! use core_types::{DisposedKind, HakoError, HostImport, ValueHandle};
//!
//! assert!(ValueHandle::NULL.is_null());
//! assert_eq!(HostImport::LoadModule.name(), "load_module");
//!
//! let err = HakoError::Disposed(DisposedKind::Context);
//! assert_eq!(err.to_string(), "context is disposed");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod exports;
mod handle;
mod imports;

pub use error::{DisposedKind, HakoError, Result};
pub use exports::{
    EngineBackend, EngineExports, LinearMemory, EVAL_FLAG_STRICT, EVAL_TYPE_GLOBAL,
    EVAL_TYPE_MODULE,
};
pub use handle::{ClassId, ContextHandle, MemoryOffset, ModuleDefHandle, RuntimeHandle, ValueHandle};
pub use imports::{
    HostImport, HostImports, ModuleSourceType, MODULE_NAME_CAPACITY, MODULE_SOURCE_RECORD_SIZE,
};
