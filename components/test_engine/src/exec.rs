//! Tree-walking evaluation of parsed scripts.
//!
//! Every host import is invoked with the state lock released, and every
//! temporary handle or buffer handed to the host is released again before the
//! statement completes.

use core_types::{
    ClassId, ContextHandle, MemoryOffset, ModuleDefHandle, ModuleSourceType, RuntimeHandle,
    ValueHandle, MODULE_NAME_CAPACITY, MODULE_SOURCE_RECORD_SIZE,
};
use tracing::trace;

use crate::engine::TestEngine;
use crate::script::{self, BinOp, Expr, Stmt};
use crate::state::{to_number, truthy, JsValue, Job, Object, ObjectKind};
use crate::PRECOMPILED_MAGIC;

/// Completion of a statement or expression; `Err` carries the thrown value.
pub(crate) type Completion = Result<JsValue, JsValue>;

pub(crate) struct Frame<'a> {
    pub(crate) ctx: ContextHandle,
    pub(crate) rt: RuntimeHandle,
    pub(crate) filename: &'a str,
}

impl TestEngine {
    pub(crate) fn run_script(&self, frame: &Frame<'_>, source: &str) -> Completion {
        match script::parse(source) {
            Ok(program) => self.exec_block(frame, &program),
            Err(err) => Err(self.error(frame.ctx, "SyntaxError", &err.0)),
        }
    }

    fn exec_block(&self, frame: &Frame<'_>, stmts: &[Stmt]) -> Completion {
        let mut last = JsValue::Undefined;
        for stmt in stmts {
            last = self.exec(frame, stmt)?;
        }
        Ok(last)
    }

    fn exec(&self, frame: &Frame<'_>, stmt: &Stmt) -> Completion {
        match stmt {
            Stmt::Expr(expr) => self.eval_expr(frame, expr),
            Stmt::Block(body) => self.exec_block(frame, body),
            Stmt::Throw(expr) => Err(self.eval_expr(frame, expr)?),
            Stmt::Import(name) => self.import(frame, name),
            Stmt::While(cond, body) => {
                loop {
                    if self.imports.interrupt_handler(frame.rt, 0) {
                        trace!(rt = %frame.rt, "script interrupted");
                        return Err(self.error(frame.ctx, "InternalError", "interrupted"));
                    }
                    if !truthy(&self.eval_expr(frame, cond)?) {
                        break;
                    }
                    self.exec_block(frame, body)?;
                }
                Ok(JsValue::Undefined)
            }
        }
    }

    fn eval_expr(&self, frame: &Frame<'_>, expr: &Expr) -> Completion {
        match expr {
            Expr::Number(n) => Ok(JsValue::Number(*n)),
            Expr::Str(s) => Ok(JsValue::String(s.clone())),
            Expr::Ident(name) => self.lookup(frame.ctx, name),
            Expr::Neg(inner) => Ok(JsValue::Number(-to_number(&self.eval_expr(frame, inner)?))),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval_expr(frame, lhs)?;
                let rhs = self.eval_expr(frame, rhs)?;
                Ok(self.binary(*op, &lhs, &rhs))
            }
            Expr::Member(target, name) => {
                let target = self.eval_expr(frame, target)?;
                Ok(self.lock().member(&target, name))
            }
            Expr::Call(callee, args) => {
                if let Some(result) = self.builtin_call(frame, callee, args) {
                    return result;
                }
                let function = self.eval_expr(frame, callee)?;
                let args = self.eval_args(frame, args)?;
                self.call_value(frame.ctx, &function, &args)
            }
            Expr::New(class, args) => {
                let ctor = self.lookup(frame.ctx, class)?;
                let args = self.eval_args(frame, args)?;
                self.construct(frame.ctx, &ctor, &args)
            }
        }
    }

    fn eval_args(&self, frame: &Frame<'_>, args: &[Expr]) -> Result<Vec<JsValue>, JsValue> {
        args.iter().map(|arg| self.eval_expr(frame, arg)).collect()
    }

    /// `Promise.reject(x)` and `queueMicrotask(f)`.
    fn builtin_call(&self, frame: &Frame<'_>, callee: &Expr, args: &[Expr]) -> Option<Completion> {
        let is_reject = matches!(callee, Expr::Member(target, method)
            if method == "reject" && matches!(&**target, Expr::Ident(n) if n == "Promise"));
        let is_microtask = matches!(callee, Expr::Ident(n) if n == "queueMicrotask");
        if !is_reject && !is_microtask {
            return None;
        }

        let args = match self.eval_args(frame, args) {
            Ok(args) => args,
            Err(exception) => return Some(Err(exception)),
        };
        let first = args.into_iter().next().unwrap_or(JsValue::Undefined);

        let mut state = self.lock();
        let Some(runtime) = state.contexts.get(&frame.ctx).map(|c| c.runtime) else {
            return Some(Ok(JsValue::Undefined));
        };
        if is_reject {
            let promise = state.new_object(Object::new(frame.ctx, ObjectKind::Promise));
            if let Some(rt) = state.runtimes.get_mut(&runtime) {
                rt.jobs.push_back(Job::Rejection {
                    ctx: frame.ctx,
                    promise,
                    reason: first,
                });
            }
            Some(Ok(JsValue::Object(promise)))
        } else {
            if let Some(rt) = state.runtimes.get_mut(&runtime) {
                rt.jobs.push_back(Job::Call {
                    ctx: frame.ctx,
                    function: first,
                });
            }
            Some(Ok(JsValue::Undefined))
        }
    }

    fn lookup(&self, ctx: ContextHandle, name: &str) -> Completion {
        match name {
            "undefined" => return Ok(JsValue::Undefined),
            "null" => return Ok(JsValue::Null),
            "true" => return Ok(JsValue::Bool(true)),
            "false" => return Ok(JsValue::Bool(false)),
            "NaN" => return Ok(JsValue::Number(f64::NAN)),
            "Infinity" => return Ok(JsValue::Number(f64::INFINITY)),
            _ => {}
        }
        let found = {
            let state = self.lock();
            if name == "globalThis" {
                state.global_object(ctx).map(JsValue::Object)
            } else {
                state.global_prop(ctx, name)
            }
        };
        match found {
            Some(value) => Ok(value),
            None => Err(self.error(ctx, "ReferenceError", &format!("{} is not defined", name))),
        }
    }

    fn binary(&self, op: BinOp, lhs: &JsValue, rhs: &JsValue) -> JsValue {
        match op {
            BinOp::Add => {
                let is_text = |v: &JsValue| matches!(v, JsValue::String(_) | JsValue::Object(_));
                if is_text(lhs) || is_text(rhs) {
                    let state = self.lock();
                    JsValue::String(format!("{}{}", state.display(lhs), state.display(rhs)))
                } else {
                    JsValue::Number(to_number(lhs) + to_number(rhs))
                }
            }
            BinOp::Sub => JsValue::Number(to_number(lhs) - to_number(rhs)),
            BinOp::Mul => JsValue::Number(to_number(lhs) * to_number(rhs)),
            BinOp::Div => JsValue::Number(to_number(lhs) / to_number(rhs)),
        }
    }

    /// Hands `args` to the host as fresh handles in an argv block.
    fn marshal(
        &self,
        ctx: ContextHandle,
        args: &[JsValue],
    ) -> Result<(MemoryOffset, Vec<ValueHandle>), JsValue> {
        let handles = {
            let mut state = self.lock();
            let mut handles = Vec::with_capacity(args.len());
            for arg in args {
                let handle = state.alloc_slot(self.flat(), ctx, arg.clone());
                if handle.is_null() {
                    for h in handles {
                        state.release(h);
                    }
                    drop(state);
                    return Err(self.error(ctx, "RangeError", "out of memory"));
                }
                handles.push(handle);
            }
            handles
        };
        if handles.is_empty() {
            return Ok((MemoryOffset::NULL, handles));
        }

        let argv = self.lock().heap.alloc(4 * handles.len() as u32, self.flat());
        if argv.is_null() {
            self.unmarshal(MemoryOffset::NULL, handles);
            return Err(self.error(ctx, "RangeError", "out of memory"));
        }
        let memory = self.mem();
        for (i, handle) in handles.iter().enumerate() {
            let slot = MemoryOffset::new(argv.raw() + 4 * i as u32);
            if memory.write_u32(slot, handle.raw()).is_err() {
                self.unmarshal(argv, handles);
                return Err(self.error(ctx, "InternalError", "argv out of bounds"));
            }
        }
        Ok((argv, handles))
    }

    fn unmarshal(&self, argv: MemoryOffset, handles: Vec<ValueHandle>) {
        let mut state = self.lock();
        for handle in handles {
            state.release(handle);
        }
        if !argv.is_null() {
            state.heap.free(argv);
        }
    }

    /// Takes ownership of a handle returned by the host.
    fn take_result(&self, ctx: ContextHandle, result: ValueHandle, missing: &str) -> Completion {
        if result.is_null() {
            return Err(self.error(ctx, "TypeError", missing));
        }
        let value = {
            let mut state = self.lock();
            let value = state.value(result).cloned();
            state.release(result);
            match value {
                Some(JsValue::Exception) => Some(Err(state
                    .contexts
                    .get_mut(&ctx)
                    .and_then(|c| c.pending_exception.take())
                    .unwrap_or(JsValue::Undefined))),
                Some(value) => Some(Ok(value)),
                None => None,
            }
        };
        match value {
            Some(completion) => completion,
            None => Err(self.error(ctx, "InternalError", "invalid value handle")),
        }
    }

    pub(crate) fn call_value(
        &self,
        ctx: ContextHandle,
        function: &JsValue,
        args: &[JsValue],
    ) -> Completion {
        let function_id = match function {
            JsValue::Object(id) => match self.lock().objects.get(id).map(|o| &o.kind) {
                Some(ObjectKind::Function { id, .. }) => Some(*id),
                _ => None,
            },
            _ => None,
        };
        let Some(function_id) = function_id else {
            return Err(self.error(ctx, "TypeError", "not a function"));
        };

        let (argv, handles) = self.marshal(ctx, args)?;
        let result = self.imports.call_function(
            ctx,
            function_id,
            self.undefined_handle(),
            handles.len() as u32,
            argv,
        );
        self.unmarshal(argv, handles);
        self.take_result(
            ctx,
            result,
            &format!("host function {} returned no value", function_id),
        )
    }

    fn construct(&self, ctx: ContextHandle, ctor: &JsValue, args: &[JsValue]) -> Completion {
        let class_id = match ctor {
            JsValue::Object(id) => match self.lock().objects.get(id).map(|o| &o.kind) {
                Some(ObjectKind::Class { class_id, .. }) => Some(*class_id),
                _ => None,
            },
            _ => None,
        };
        let Some(class_id) = class_id else {
            return Err(self.error(ctx, "TypeError", "not a constructor"));
        };

        let new_target = self.lock().alloc_slot(self.flat(), ctx, ctor.clone());
        let (argv, handles) = match self.marshal(ctx, args) {
            Ok(marshalled) => marshalled,
            Err(exception) => {
                self.lock().release(new_target);
                return Err(exception);
            }
        };
        let result = self.imports.class_constructor(
            ctx,
            new_target,
            handles.len() as u32,
            argv,
            class_id,
        );
        self.unmarshal(argv, handles);
        self.lock().release(new_target);
        self.take_result(ctx, result, &constructor_message(class_id))
    }

    fn import(&self, frame: &Frame<'_>, name: &str) -> Completion {
        let ctx = frame.ctx;
        let memory = self.mem();

        let normalized = {
            let (base, specifier, out) = {
                let mut state = self.lock();
                let base = state.heap.alloc(frame.filename.len() as u32 + 1, self.flat());
                let specifier = state.heap.alloc(name.len() as u32 + 1, self.flat());
                let out = state.heap.alloc(MODULE_NAME_CAPACITY, self.flat());
                (base, specifier, out)
            };
            let written = !base.is_null()
                && !specifier.is_null()
                && !out.is_null()
                && memory.write_string(base, frame.filename).is_ok()
                && memory.write_string(specifier, name).is_ok();
            let normalized = if written {
                match self.imports.normalize_module(ctx, base, specifier, 0, out) {
                    0 => None,
                    _ => memory.read_string(out).ok(),
                }
            } else {
                None
            };
            let mut state = self.lock();
            for ptr in [base, specifier, out] {
                if !ptr.is_null() {
                    state.heap.free(ptr);
                }
            }
            normalized
        };
        let Some(normalized) = normalized else {
            return Err(self.error(
                ctx,
                "ReferenceError",
                &format!("could not resolve module '{}'", name),
            ));
        };

        let source = self.fetch_module(frame, &normalized)?;

        let module = self.lock().heap.alloc(16, self.flat());
        if module.is_null() {
            return Err(self.error(ctx, "RangeError", "out of memory"));
        }
        let status = self
            .imports
            .module_init(ctx, ModuleDefHandle::new(module.raw()));
        let result = if status != 0 {
            Err(self.error(
                ctx,
                "Error",
                &format!("module initialization failed for '{}'", normalized),
            ))
        } else {
            let inner = Frame {
                ctx,
                rt: frame.rt,
                filename: &normalized,
            };
            self.run_script(&inner, &source)
        };
        self.lock().heap.free(module);
        result
    }

    fn fetch_module(&self, frame: &Frame<'_>, normalized: &str) -> Result<String, JsValue> {
        let ctx = frame.ctx;
        let memory = self.mem();
        let (module_name, record) = {
            let mut state = self.lock();
            let module_name = state.heap.alloc(normalized.len() as u32 + 1, self.flat());
            let record = state.heap.alloc(MODULE_SOURCE_RECORD_SIZE, self.flat());
            (module_name, record)
        };
        let fields = if module_name.is_null()
            || record.is_null()
            || memory.write_string(module_name, normalized).is_err()
            || memory.write_bytes(record, &[0; 12]).is_err()
        {
            None
        } else {
            let source_type = self
                .imports
                .load_module(frame.rt, ctx, module_name, 0, record);
            let payload = memory.read_u32(record.checked_add(4).unwrap_or(MemoryOffset::NULL));
            let len = memory.read_u32(record.checked_add(8).unwrap_or(MemoryOffset::NULL));
            match (payload, len) {
                (Ok(payload), Ok(len)) => Some((source_type, MemoryOffset::new(payload), len)),
                _ => None,
            }
        };
        {
            let mut state = self.lock();
            for ptr in [module_name, record] {
                if !ptr.is_null() {
                    state.heap.free(ptr);
                }
            }
        }

        let load_error = || {
            self.error(
                ctx,
                "ReferenceError",
                &format!("could not load module '{}'", normalized),
            )
        };
        let (source_type, payload, len) = match fields {
            Some((ModuleSourceType::Error, payload, _)) => {
                if !payload.is_null() {
                    self.lock().heap.free(payload);
                }
                return Err(load_error());
            }
            Some(fields) => fields,
            None => return Err(load_error()),
        };

        let bytes = memory.read_bytes(payload, len);
        if !payload.is_null() {
            self.lock().heap.free(payload);
        }
        let bytes = bytes.map_err(|_| load_error())?;
        match source_type {
            ModuleSourceType::Precompiled => match bytes.strip_prefix(PRECOMPILED_MAGIC) {
                Some(code) => Ok(String::from_utf8_lossy(code).into_owned()),
                None => Err(self.error(ctx, "SyntaxError", "invalid bytecode")),
            },
            _ => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

fn constructor_message(class_id: ClassId) -> String {
    format!("constructor for class {} returned no instance", class_id.raw())
}
