//! Host functions callable from scripts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use core_types::{ContextHandle, Result};
use parking_lot::RwLock;

use crate::{Context, Value};

/// A host function: receives the calling context, `this` and the arguments,
/// all borrowed for the duration of the call.
pub type HostFunction = Arc<dyn Fn(&Context, &Value, &[Value]) -> Result<Value> + Send + Sync>;

/// Per-runtime table mapping function ids to host functions and the
/// contexts that registered them.
#[derive(Default)]
pub(crate) struct FunctionTable {
    entries: RwLock<Entries>,
}

#[derive(Default)]
struct Entries {
    next_id: i32,
    functions: HashMap<i32, (ContextHandle, HostFunction)>,
}

impl FunctionTable {
    /// Stores `function` for `owner` and returns its id. Ids start at 1.
    pub(crate) fn insert(&self, owner: ContextHandle, function: HostFunction) -> i32 {
        let mut entries = self.entries.write();
        entries.next_id += 1;
        let id = entries.next_id;
        entries.functions.insert(id, (owner, function));
        id
    }

    pub(crate) fn get(&self, id: i32) -> Option<HostFunction> {
        self.entries
            .read()
            .functions
            .get(&id)
            .map(|(_, function)| function.clone())
    }

    /// Drops every function registered through `owner`; returns how many.
    pub(crate) fn remove_context(&self, owner: ContextHandle) -> usize {
        let mut entries = self.entries.write();
        let before = entries.functions.len();
        entries.functions.retain(|_, (ctx, _)| *ctx != owner);
        before - entries.functions.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.write().functions.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().functions.len()
    }
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTable")
            .field("len", &self.len())
            .finish()
    }
}
