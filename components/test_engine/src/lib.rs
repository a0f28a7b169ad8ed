//! In-process engine used by the test suites.
//!
//! [`TestBackend`] implements [`EngineBackend`] over [`TestEngine`], a small
//! interpreter that honours the same export table, handle and memory
//! conventions as the compiled engine: handles are offsets into its own
//! [`FlatMemory`](memory_manager::FlatMemory), strings are NUL-terminated,
//! ownership of every returned handle passes to the caller, and host imports
//! are only ever invoked with engine state unlocked.
//!
//! The engine also exposes accounting (`live_allocations`, `live_values`,
//! `invalid_frees`, ...) so tests can assert that the host released exactly
//! what it allocated.
//!
//! # Binary format
//!
//! A test binary is the WebAssembly magic and version followed by one
//! `hako.<name>` import per line. Instantiation fails when the header is
//! wrong or an import is not a known [`HostImport`].
//!
//! ```
//! use test_engine::TestBackend;
//!
//! let binary = TestBackend::binary();
//! assert!(binary.starts_with(b"\0asm"));
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

mod engine;
mod exec;
mod heap;
mod neutral;
pub mod script;
mod state;

use std::sync::Arc;

use core_types::{EngineBackend, EngineExports, HakoError, HostImport, HostImports, Result};
use parking_lot::Mutex;
use tracing::debug;

pub use engine::TestEngine;
pub use neutral::NeutralImports;

/// Header every test binary starts with.
pub const BINARY_MAGIC: &[u8] = b"\0asm\x01\0\0\0";

/// Prefix of precompiled module payloads understood by the test engine.
pub const PRECOMPILED_MAGIC: &[u8] = b"HBC\x01";

/// Backend that instantiates [`TestEngine`]s and keeps them for inspection.
#[derive(Debug, Default)]
pub struct TestBackend {
    engines: Mutex<Vec<Arc<TestEngine>>>,
}

impl TestBackend {
    /// Creates a backend with no engines.
    pub fn new() -> Self {
        Self::default()
    }

    /// A binary importing every host import.
    pub fn binary() -> Vec<u8> {
        let names: Vec<String> = HostImport::ALL
            .iter()
            .map(|import| import.to_string())
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        Self::binary_with_imports(&names)
    }

    /// A binary importing exactly `imports`, each written as `module.name`.
    pub fn binary_with_imports(imports: &[&str]) -> Vec<u8> {
        let mut binary = BINARY_MAGIC.to_vec();
        for import in imports {
            binary.extend_from_slice(import.as_bytes());
            binary.push(b'\n');
        }
        binary
    }

    /// The most recently instantiated engine.
    pub fn last_engine(&self) -> Option<Arc<TestEngine>> {
        self.engines.lock().last().cloned()
    }

    /// Instantiates an engine wired to [`NeutralImports`], outside any backend.
    pub fn neutral_engine() -> Arc<TestEngine> {
        Arc::new(TestEngine::new(Arc::new(NeutralImports)))
    }

    /// Number of engines instantiated so far.
    pub fn instance_count(&self) -> usize {
        self.engines.lock().len()
    }
}

/// Wraps `source` as a precompiled module payload.
pub fn compile(source: &str) -> Vec<u8> {
    let mut payload = PRECOMPILED_MAGIC.to_vec();
    payload.extend_from_slice(source.as_bytes());
    payload
}

fn parse_imports(binary: &[u8]) -> Result<Vec<HostImport>> {
    let body = binary
        .strip_prefix(BINARY_MAGIC)
        .ok_or_else(|| HakoError::Instantiation("not an engine binary".to_string()))?;
    let body = std::str::from_utf8(body)
        .map_err(|e| HakoError::Instantiation(format!("malformed import section: {}", e)))?;

    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let name = line
                .strip_prefix(HostImport::MODULE)
                .and_then(|rest| rest.strip_prefix('.'))
                .ok_or_else(|| {
                    HakoError::Instantiation(format!("import '{}' has unknown module", line))
                })?;
            HostImport::from_name(name)
                .ok_or_else(|| HakoError::Instantiation(format!("unknown import '{}'", line)))
        })
        .collect()
}

impl EngineBackend for TestBackend {
    fn instantiate(
        &self,
        binary: &[u8],
        imports: Arc<dyn HostImports>,
    ) -> Result<Arc<dyn EngineExports>> {
        let wired = parse_imports(binary)?;
        debug!(imports = wired.len(), "instantiating test engine");
        let engine = Arc::new(TestEngine::new(imports));
        self.engines.lock().push(engine.clone());
        Ok(engine)
    }
}
