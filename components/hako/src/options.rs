//! Runtime and evaluation options.

use core_types::{EVAL_FLAG_STRICT, EVAL_TYPE_GLOBAL, EVAL_TYPE_MODULE};
use serde::{Deserialize, Serialize};

/// Options applied when a runtime is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Engine heap ceiling in bytes; 0 means unlimited.
    pub memory_limit: u32,
}

impl RuntimeOptions {
    /// Creates options with no memory limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the heap ceiling in bytes.
    pub fn with_memory_limit(mut self, bytes: u32) -> Self {
        self.memory_limit = bytes;
        self
    }
}

/// How source text is evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalKind {
    /// Global (script) code.
    #[default]
    Global,
    /// ES module code.
    Module,
}

/// Options for a single evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalOptions {
    /// Name reported in stack traces and used as the base for module imports.
    pub filename: String,
    /// Let the engine switch to module mode when the source looks like one.
    pub detect_module: bool,
    /// Global or module evaluation.
    pub kind: EvalKind,
    /// Force strict mode.
    pub strict: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            filename: "eval".to_string(),
            detect_module: true,
            kind: EvalKind::Global,
            strict: false,
        }
    }
}

impl EvalOptions {
    /// Default options: global code named `eval` with module detection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Enables or disables module detection.
    pub fn with_detect_module(mut self, detect: bool) -> Self {
        self.detect_module = detect;
        self
    }

    /// Sets the evaluation kind.
    pub fn with_kind(mut self, kind: EvalKind) -> Self {
        self.kind = kind;
        self
    }

    /// Enables or disables strict mode.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Engine eval flags for these options.
    pub fn flags(&self) -> u32 {
        let mut flags = match self.kind {
            EvalKind::Global => EVAL_TYPE_GLOBAL,
            EvalKind::Module => EVAL_TYPE_MODULE,
        };
        if self.strict {
            flags |= EVAL_FLAG_STRICT;
        }
        flags
    }
}
