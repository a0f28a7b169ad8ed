//! Engine-side bookkeeping: value slots, objects, runtimes and contexts.

use std::collections::{HashMap, HashSet, VecDeque};

use core_types::{ClassId, ContextHandle, MemoryOffset, RuntimeHandle, ValueHandle};
use memory_manager::FlatMemory;

use crate::heap::Heap;

/// Bytes reserved in linear memory for each value slot.
pub(crate) const SLOT_SIZE: u32 = 16;
/// Bytes reserved for runtime and context records.
pub(crate) const RECORD_SIZE: u32 = 64;

/// A script value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(u32),
    /// Marker returned in place of a result when an exception is pending.
    Exception,
}

#[derive(Debug, Clone)]
pub(crate) enum ObjectKind {
    Plain,
    Array(Vec<JsValue>),
    Function { id: i32, name: String },
    Class { class_id: ClassId, name: String },
    Promise,
    Error { name: String, message: String },
}

#[derive(Debug, Clone)]
pub(crate) struct Object {
    pub(crate) ctx: ContextHandle,
    pub(crate) kind: ObjectKind,
    pub(crate) props: Vec<(String, JsValue)>,
    pub(crate) class_id: ClassId,
    pub(crate) opaque: u32,
}

impl Object {
    pub(crate) fn new(ctx: ContextHandle, kind: ObjectKind) -> Self {
        Self {
            ctx,
            kind,
            props: Vec::new(),
            class_id: ClassId::INVALID,
            opaque: 0,
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&JsValue> {
        self.props.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub(crate) fn set(&mut self, key: &str, value: JsValue) {
        match self.props.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.props.push((key.to_string(), value)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) ctx: ContextHandle,
    pub(crate) value: JsValue,
    pub(crate) refs: u32,
}

#[derive(Debug, Clone)]
pub(crate) enum Job {
    Rejection {
        ctx: ContextHandle,
        promise: u32,
        reason: JsValue,
    },
    Call {
        ctx: ContextHandle,
        function: JsValue,
    },
}

impl Job {
    pub(crate) fn ctx(&self) -> ContextHandle {
        match self {
            Job::Rejection { ctx, .. } | Job::Call { ctx, .. } => *ctx,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct RuntimeState {
    pub(crate) jobs: VecDeque<Job>,
}

#[derive(Debug)]
pub(crate) struct ContextState {
    pub(crate) runtime: RuntimeHandle,
    pub(crate) global: u32,
    pub(crate) pending_exception: Option<JsValue>,
}

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) heap: Heap,
    pub(crate) slots: HashMap<ValueHandle, Slot>,
    pub(crate) objects: HashMap<u32, Object>,
    next_object: u32,
    pub(crate) runtimes: HashMap<RuntimeHandle, RuntimeState>,
    pub(crate) contexts: HashMap<ContextHandle, ContextState>,
    pub(crate) classes: Vec<String>,
    pub(crate) marked: Vec<ValueHandle>,
    pub(crate) invalid_releases: usize,
    pub(crate) permanent: HashSet<ValueHandle>,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            heap: Heap::new(),
            slots: HashMap::new(),
            objects: HashMap::new(),
            next_object: 1,
            runtimes: HashMap::new(),
            contexts: HashMap::new(),
            classes: Vec::new(),
            marked: Vec::new(),
            invalid_releases: 0,
            permanent: HashSet::new(),
        }
    }

    /// Allocates a slot holding one reference to `value`.
    pub(crate) fn alloc_slot(
        &mut self,
        memory: &FlatMemory,
        ctx: ContextHandle,
        value: JsValue,
    ) -> ValueHandle {
        let offset = self.heap.alloc(SLOT_SIZE, memory);
        if offset.is_null() {
            return ValueHandle::NULL;
        }
        let handle = ValueHandle::new(offset.raw());
        self.slots.insert(
            handle,
            Slot {
                ctx,
                value,
                refs: 1,
            },
        );
        handle
    }

    /// Drops one reference; frees the slot when none remain.
    pub(crate) fn release(&mut self, handle: ValueHandle) {
        if handle.is_null() || self.permanent.contains(&handle) {
            return;
        }
        let remove = match self.slots.get_mut(&handle) {
            Some(slot) => {
                slot.refs -= 1;
                slot.refs == 0
            }
            None => {
                self.invalid_releases += 1;
                false
            }
        };
        if remove {
            self.slots.remove(&handle);
            self.heap.free(MemoryOffset::new(handle.raw()));
        }
    }

    pub(crate) fn value(&self, handle: ValueHandle) -> Option<&JsValue> {
        self.slots.get(&handle).map(|slot| &slot.value)
    }

    pub(crate) fn new_object(&mut self, object: Object) -> u32 {
        let id = self.next_object;
        self.next_object += 1;
        self.objects.insert(id, object);
        id
    }

    pub(crate) fn new_error(&mut self, ctx: ContextHandle, name: &str, message: &str) -> JsValue {
        let mut object = Object::new(
            ctx,
            ObjectKind::Error {
                name: name.to_string(),
                message: message.to_string(),
            },
        );
        object.set("name", JsValue::String(name.to_string()));
        object.set("message", JsValue::String(message.to_string()));
        JsValue::Object(self.new_object(object))
    }

    pub(crate) fn global_object(&self, ctx: ContextHandle) -> Option<u32> {
        self.contexts.get(&ctx).map(|c| c.global)
    }

    pub(crate) fn global_prop(&self, ctx: ContextHandle, name: &str) -> Option<JsValue> {
        let global = self.global_object(ctx)?;
        self.objects.get(&global)?.get(name).cloned()
    }

    pub(crate) fn set_global_prop(&mut self, ctx: ContextHandle, name: &str, value: JsValue) {
        if let Some(global) = self.global_object(ctx) {
            if let Some(object) = self.objects.get_mut(&global) {
                object.set(name, value);
            }
        }
    }

    pub(crate) fn member(&self, value: &JsValue, name: &str) -> JsValue {
        match value {
            JsValue::String(s) if name == "length" => JsValue::Number(s.chars().count() as f64),
            JsValue::Object(id) => match self.objects.get(id) {
                Some(object) => match (&object.kind, name) {
                    (ObjectKind::Array(items), "length") => JsValue::Number(items.len() as f64),
                    _ => object.get(name).cloned().unwrap_or(JsValue::Undefined),
                },
                None => JsValue::Undefined,
            },
            _ => JsValue::Undefined,
        }
    }

    /// String conversion.
    pub(crate) fn display(&self, value: &JsValue) -> String {
        match value {
            JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Bool(b) => b.to_string(),
            JsValue::Number(n) => format_number(*n),
            JsValue::String(s) => s.clone(),
            JsValue::Exception => "[exception]".to_string(),
            JsValue::Object(id) => match self.objects.get(id).map(|o| &o.kind) {
                None => "[object Object]".to_string(),
                Some(ObjectKind::Plain) => "[object Object]".to_string(),
                Some(ObjectKind::Promise) => "[object Promise]".to_string(),
                Some(ObjectKind::Array(items)) => items
                    .iter()
                    .map(|item| match item {
                        JsValue::Undefined | JsValue::Null => String::new(),
                        other => self.display(other),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                Some(ObjectKind::Function { name, .. }) => {
                    format!("function {}() {{\n    [native code]\n}}", name)
                }
                Some(ObjectKind::Class { name, .. }) => format!("class {}", name),
                Some(ObjectKind::Error { name, message }) if message.is_empty() => name.clone(),
                Some(ObjectKind::Error { name, message }) => format!("{}: {}", name, message),
            },
        }
    }

    /// Ids of every object reachable from live slots, globals and queued jobs.
    pub(crate) fn reachable_objects(&self) -> HashSet<u32> {
        let mut stack: Vec<u32> = Vec::new();
        let push = |value: &JsValue, stack: &mut Vec<u32>| {
            if let JsValue::Object(id) = value {
                stack.push(*id);
            }
        };
        for slot in self.slots.values() {
            push(&slot.value, &mut stack);
        }
        for ctx in self.contexts.values() {
            stack.push(ctx.global);
            if let Some(exc) = &ctx.pending_exception {
                push(exc, &mut stack);
            }
        }
        for rt in self.runtimes.values() {
            for job in &rt.jobs {
                match job {
                    Job::Rejection { promise, reason, .. } => {
                        stack.push(*promise);
                        push(reason, &mut stack);
                    }
                    Job::Call { function, .. } => push(function, &mut stack),
                }
            }
        }

        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(object) = self.objects.get(&id) {
                for (_, value) in &object.props {
                    push(value, &mut stack);
                }
                if let ObjectKind::Array(items) = &object.kind {
                    for item in items {
                        push(item, &mut stack);
                    }
                }
            }
        }
        seen
    }
}

/// Number to string conversion in the JavaScript style for common cases.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub(crate) fn to_number(value: &JsValue) -> f64 {
    match value {
        JsValue::Number(n) => *n,
        JsValue::Bool(b) => f64::from(u8::from(*b)),
        JsValue::Null => 0.0,
        JsValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        _ => f64::NAN,
    }
}

pub(crate) fn truthy(value: &JsValue) -> bool {
    match value {
        JsValue::Undefined | JsValue::Null | JsValue::Exception => false,
        JsValue::Bool(b) => *b,
        JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
        JsValue::String(s) => !s.is_empty(),
        JsValue::Object(_) => true,
    }
}
