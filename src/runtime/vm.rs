use std::sync::Arc;

use crossbeam::sync::WaitGroup;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::abort::AbortToken;
use super::runtime_error::{ErrorKind, RuntimeError};
use crate::ast::Token;
use crate::bytecode::op::{Opcode, make_instruction, read_u8, read_u16};
use crate::bytecode::Bytecode;
use crate::lang::ops::{binary_op, complement, negate};
use crate::lang::{Builtins, CompiledFunction, MapData, Object, ObjectIterator, ObjectPtr};

/// Global variable slots shared by a VM and its routine clones. `None`
/// marks a slot that was never assigned and reads as `undefined`.
pub type Globals = Arc<RwLock<Vec<Option<Object>>>>;

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Objects a run may allocate; negative means unlimited.
    pub max_allocs: i64,
    pub stack_size: usize,
    pub max_frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_allocs: -1,
            stack_size: 2048,
            max_frames: 1024,
        }
    }
}

/// What a builtin or host function sees of its caller.
pub struct CallContext<'a> {
    token: &'a AbortToken,
    vm: Option<&'a Vm>,
}

impl<'a> CallContext<'a> {
    pub fn new(token: &'a AbortToken, vm: Option<&'a Vm>) -> Self {
        CallContext { token, vm }
    }

    /// A context with no VM behind it, as seen by host code calling a
    /// script callable directly.
    pub fn detached(token: &'a AbortToken) -> Self {
        CallContext { token, vm: None }
    }

    pub fn abort_token(&self) -> &'a AbortToken {
        self.token
    }

    pub fn vm(&self) -> Option<&'a Vm> {
        self.vm
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_aborted()
    }
}

/// A suspended caller.
#[derive(Debug)]
struct Frame {
    func: Arc<CompiledFunction>,
    /// Offset of the instruction after the call.
    ip: usize,
    base: usize,
}

/// Executes one [`Bytecode`] unit.
///
/// The running function's state lives in `cur`/`ip`/`base`; `frames`
/// holds the callers. Locals sit on the value stack from `base`.
pub struct Vm {
    bytecode: Arc<Bytecode>,
    builtins: Arc<Builtins>,
    globals: Globals,
    config: VmConfig,

    stack: Vec<Object>,
    sp: usize,
    frames: Vec<Frame>,
    cur: Arc<CompiledFunction>,
    ins: Arc<[u8]>,
    ip: usize,
    base: usize,
    /// Offset of the instruction being executed, for error positions.
    op_start: usize,
    /// The bottom frame is a synthetic call stub.
    trampoline: bool,

    allocs: i64,
    token: AbortToken,
    routines: WaitGroup,
}

impl Vm {
    pub fn new(bytecode: Arc<Bytecode>, globals: Globals, builtins: Arc<Builtins>, config: VmConfig) -> Self {
        let main = bytecode.main_function.clone();
        Vm {
            stack: vec![Object::Undefined; config.stack_size],
            sp: 0,
            frames: Vec::new(),
            ins: main.instructions.clone(),
            cur: main,
            ip: 0,
            base: 0,
            op_start: 0,
            trampoline: false,
            allocs: initial_allocs(config.max_allocs),
            token: AbortToken::new(),
            routines: WaitGroup::new(),
            bytecode,
            builtins,
            globals,
            config,
        }
    }

    /// Run under `token` instead of a fresh root token.
    pub fn with_token(mut self, token: AbortToken) -> Self {
        self.token = token;
        self
    }

    pub fn abort_token(&self) -> &AbortToken {
        &self.token
    }

    /// Stop this VM and every routine it started.
    pub fn abort(&self) {
        self.token.abort();
    }

    pub fn globals(&self) -> &Globals {
        &self.globals
    }

    pub fn bytecode(&self) -> &Arc<Bytecode> {
        &self.bytecode
    }

    pub fn is_stack_empty(&self) -> bool {
        self.sp == 0
    }

    /// A VM over the same bytecode, globals and builtins with its own
    /// stack and allocation budget. Its token is a child of this one.
    pub fn shallow_clone(&self) -> Vm {
        Vm::new(
            self.bytecode.clone(),
            self.globals.clone(),
            self.builtins.clone(),
            self.config.clone(),
        )
        .with_token(self.token.child())
    }

    /// Handle that keeps this VM's `run` from returning until dropped.
    pub(crate) fn routine_guard(&self) -> WaitGroup {
        self.routines.clone()
    }

    /// Execute the entry function up to `SUSPEND`.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let main = self.bytecode.main_function.clone();
        self.run_from(main, Vec::new(), false)
    }

    /// Call `func` with `args` and return its result.
    pub fn run_compiled(&mut self, func: Arc<CompiledFunction>, args: Vec<Object>) -> Result<Object, RuntimeError> {
        if args.len() > u8::MAX as usize {
            return Err(ErrorKind::wrong_args(format!("<={}", u8::MAX), args.len()).into());
        }
        let stub = [
            make_instruction(Opcode::Call, &[args.len(), 0]),
            make_instruction(Opcode::Suspend, &[]),
        ]
        .concat();
        let mut preload = Vec::with_capacity(args.len() + 1);
        preload.push(Object::CompiledFunction(func));
        preload.extend(args);
        self.run_from(Arc::new(CompiledFunction::new(stub)), preload, true)?;
        Ok(self.sp.checked_sub(1).map(|top| self.stack[top].clone()).unwrap_or_default())
    }

    fn run_from(&mut self, main: Arc<CompiledFunction>, preload: Vec<Object>, trampoline: bool) -> Result<(), RuntimeError> {
        self.reset(main, trampoline);
        for value in preload {
            self.push(value)?;
        }
        debug!(trampoline, "vm run");

        let result = self.execute().map_err(|kind| self.runtime_error(kind));
        if let Err(err) = &result {
            if err.is_fatal() {
                warn!(error = %err.kind, "vm stopped");
            } else {
                debug!(error = %err.kind, "vm run failed");
            }
            self.token.abort_children();
        }
        std::mem::take(&mut self.routines).wait();
        result
    }

    fn reset(&mut self, main: Arc<CompiledFunction>, trampoline: bool) {
        for slot in &mut self.stack[..self.sp] {
            *slot = Object::Undefined;
        }
        self.sp = 0;
        self.frames.clear();
        self.ins = main.instructions.clone();
        self.cur = main;
        self.ip = 0;
        self.base = 0;
        self.op_start = 0;
        self.trampoline = trampoline;
        self.allocs = initial_allocs(self.config.max_allocs);
    }

    fn runtime_error(&self, kind: ErrorKind) -> RuntimeError {
        let files = &self.bytecode.file_set;
        let mut err = RuntimeError::new(kind).with_context(files.position(self.cur.source_pos(self.op_start)).to_string());
        for (depth, frame) in self.frames.iter().enumerate().rev() {
            if depth == 0 && self.trampoline {
                continue;
            }
            let pos = frame.func.source_pos(frame.ip.saturating_sub(1));
            err = err.with_context(files.position(pos).to_string());
        }
        err
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    fn execute(&mut self) -> Result<(), ErrorKind> {
        loop {
            if self.token.is_aborted() {
                return Err(ErrorKind::Aborted);
            }

            let at = self.ip;
            let Some(&byte) = self.ins.get(at) else {
                return Err(ErrorKind::custom("instruction pointer out of range"));
            };
            let op = Opcode::from_u8(byte).ok_or_else(|| ErrorKind::custom(format!("invalid opcode {:#04x}", byte)))?;
            if at + op.width() > self.ins.len() {
                return Err(ErrorKind::custom(format!("truncated {} instruction", op.name())));
            }
            self.op_start = at;
            self.ip = at + op.width();

            match op {
                Opcode::Const => {
                    let value = self.constant(read_u16(&self.ins, at + 1))?;
                    self.push(value)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::True => self.push(Object::Bool(true))?,
                Opcode::False => self.push(Object::Bool(false))?,
                Opcode::Null => self.push(Object::Undefined)?,

                Opcode::Equal | Opcode::NotEqual => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let eq = lhs.equals(&rhs);
                    self.push(Object::Bool(if op == Opcode::Equal { eq } else { !eq }))?;
                }
                Opcode::BinaryOp => {
                    let code = read_u8(&self.ins, at + 1);
                    let token = Token::from_u8(code as u8).ok_or(ErrorKind::InvalidOperator)?;
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    let result = binary_op(&lhs, token, &rhs)?;
                    self.charge()?;
                    self.push(result)?;
                }
                Opcode::Minus => {
                    let value = self.pop()?;
                    self.push(negate(&value)?)?;
                }
                Opcode::LNot => {
                    let value = self.pop()?;
                    self.push(Object::Bool(value.is_falsy()))?;
                }
                Opcode::BComplement => {
                    let value = self.pop()?;
                    self.push(complement(&value)?)?;
                }

                Opcode::Jump => self.ip = read_u16(&self.ins, at + 1),
                Opcode::JumpFalsy => {
                    if self.pop()?.is_falsy() {
                        self.ip = read_u16(&self.ins, at + 1);
                    }
                }
                Opcode::AndJump => {
                    if self.peek()?.is_falsy() {
                        self.ip = read_u16(&self.ins, at + 1);
                    } else {
                        self.pop()?;
                    }
                }
                Opcode::OrJump => {
                    if self.peek()?.is_falsy() {
                        self.pop()?;
                    } else {
                        self.ip = read_u16(&self.ins, at + 1);
                    }
                }

                Opcode::Array => {
                    let items = self.take_top(read_u16(&self.ins, at + 1))?;
                    self.charge()?;
                    self.push(Object::array(items))?;
                }
                Opcode::Map => {
                    let items = self.take_top(read_u16(&self.ins, at + 1))?;
                    let mut entries = MapData::new();
                    let mut items = items.into_iter();
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        let Object::String(key) = key else {
                            return Err(ErrorKind::InvalidIndexType(key.type_name()));
                        };
                        entries.insert(key.to_string(), value);
                    }
                    self.charge()?;
                    self.push(Object::map(entries))?;
                }
                Opcode::Error => {
                    let value = self.pop()?;
                    self.charge()?;
                    self.push(Object::error(value))?;
                }
                Opcode::Immutable => {
                    let value = match self.pop()? {
                        Object::Array(items) => Object::ImmutableArray(Arc::new(items.read().clone())),
                        Object::Map(entries) => Object::ImmutableMap(Arc::new(entries.read().clone())),
                        other => other,
                    };
                    self.charge()?;
                    self.push(value)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let target = self.pop()?;
                    self.push(target.index_get(&index)?)?;
                }
                Opcode::SetIndex => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let target = self.pop()?;
                    target.index_set(&index, value)?;
                }
                Opcode::SliceIndex => {
                    let high = slice_bound(self.pop()?)?;
                    let low = slice_bound(self.pop()?)?;
                    let target = self.pop()?;
                    let result = target.slice(low, high)?;
                    self.charge()?;
                    self.push(result)?;
                }

                Opcode::Call => {
                    let num_args = read_u8(&self.ins, at + 1);
                    let spread = read_u8(&self.ins, at + 2) != 0;
                    self.call(num_args, spread)?;
                }
                Opcode::Return => {
                    let value = if read_u8(&self.ins, at + 1) == 1 {
                        self.pop()?
                    } else {
                        Object::Undefined
                    };
                    self.return_from_call(value)?;
                }
                Opcode::Closure => {
                    let idx = read_u16(&self.ins, at + 1);
                    let num_free = read_u8(&self.ins, at + 3);
                    let mut free = Vec::with_capacity(num_free);
                    for captured in self.take_top(num_free)? {
                        match captured {
                            Object::ObjectPtr(cell) => free.push(cell),
                            other => {
                                return Err(ErrorKind::custom(format!(
                                    "closure capture is not a pointer: {}",
                                    other.type_name()
                                )));
                            }
                        }
                    }
                    let Object::CompiledFunction(func) = self.constant(idx)? else {
                        return Err(ErrorKind::custom(format!("constant {} is not a function", idx)));
                    };
                    self.charge()?;
                    self.push(Object::CompiledFunction(Arc::new(func.with_free(free))))?;
                }

                Opcode::GetGlobal => {
                    let idx = read_u16(&self.ins, at + 1);
                    let value = self.globals.read().get(idx).cloned().flatten().unwrap_or_default();
                    self.push(value)?;
                }
                Opcode::SetGlobal => {
                    let idx = read_u16(&self.ins, at + 1);
                    let value = self.pop()?;
                    let mut globals = self.globals.write();
                    if idx >= globals.len() {
                        globals.resize(idx + 1, None);
                    }
                    globals[idx] = Some(value);
                }
                Opcode::GetLocal => {
                    let slot = self.local_slot(read_u8(&self.ins, at + 1))?;
                    let value = match &self.stack[slot] {
                        Object::ObjectPtr(cell) => cell.get(),
                        value => value.clone(),
                    };
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let slot = self.local_slot(read_u8(&self.ins, at + 1))?;
                    let value = self.pop()?;
                    match &self.stack[slot] {
                        Object::ObjectPtr(cell) => cell.set(value),
                        _ => self.stack[slot] = value,
                    }
                }
                Opcode::DefineLocal => {
                    let slot = self.local_slot(read_u8(&self.ins, at + 1))?;
                    self.stack[slot] = self.pop()?;
                }
                Opcode::GetFree => {
                    let value = self.free_cell(read_u8(&self.ins, at + 1))?.get();
                    self.push(value)?;
                }
                Opcode::SetFree => {
                    let value = self.pop()?;
                    self.free_cell(read_u8(&self.ins, at + 1))?.set(value);
                }
                Opcode::GetLocalPtr => {
                    let slot = self.local_slot(read_u8(&self.ins, at + 1))?;
                    let cell = match &self.stack[slot] {
                        Object::ObjectPtr(cell) => cell.clone(),
                        value => {
                            let cell = ObjectPtr::new(value.clone());
                            self.stack[slot] = Object::ObjectPtr(cell.clone());
                            cell
                        }
                    };
                    self.push(Object::ObjectPtr(cell))?;
                }
                Opcode::GetFreePtr => {
                    let cell = self.free_cell(read_u8(&self.ins, at + 1))?;
                    self.push(Object::ObjectPtr(cell))?;
                }
                Opcode::GetBuiltin => {
                    let idx = read_u8(&self.ins, at + 1);
                    let builtin = *self
                        .builtins
                        .get(idx)
                        .ok_or_else(|| ErrorKind::custom(format!("unknown builtin {}", idx)))?;
                    self.push(Object::BuiltinFunction(builtin))?;
                }

                Opcode::IteratorInit => {
                    let value = self.pop()?;
                    let iter = ObjectIterator::new(&value).ok_or_else(|| ErrorKind::NotIterable(value.type_name()))?;
                    self.charge()?;
                    self.push(Object::Iterator(iter))?;
                }
                Opcode::IteratorNext | Opcode::IteratorKey | Opcode::IteratorValue => {
                    let Object::Iterator(iter) = self.pop()? else {
                        return Err(ErrorKind::custom("iterator expected"));
                    };
                    let result = match op {
                        Opcode::IteratorNext => Object::Bool(iter.next()),
                        Opcode::IteratorKey => iter.key(),
                        _ => iter.value(),
                    };
                    self.push(result)?;
                }

                Opcode::Suspend => return Ok(()),
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call(&mut self, mut num_args: usize, spread: bool) -> Result<(), ErrorKind> {
        if spread {
            let items = match self.pop()? {
                Object::Array(items) => items.read().clone(),
                Object::ImmutableArray(items) => items.as_ref().clone(),
                other => return Err(ErrorKind::invalid_arg("last", "array", &other.type_name())),
            };
            num_args = num_args.saturating_sub(1) + items.len();
            for item in items {
                self.push(item)?;
            }
        }

        let callee_slot = self
            .sp
            .checked_sub(num_args + 1)
            .ok_or_else(|| ErrorKind::custom("stack underflow"))?;
        match self.stack[callee_slot].clone() {
            Object::CompiledFunction(func) => self.call_compiled(func, num_args),
            Object::BuiltinFunction(builtin) => {
                let args = self.take_top(num_args)?;
                self.pop()?;
                let result = builtin.call(&CallContext::new(&self.token, Some(&*self)), &args)?;
                self.charge()?;
                self.push(result)
            }
            Object::UserFunction(func) => {
                let args = self.take_top(num_args)?;
                self.pop()?;
                let result = func.call(&CallContext::new(&self.token, Some(&*self)), &args)?;
                self.charge()?;
                self.push(result)
            }
            other => Err(ErrorKind::NotCallable(other.type_name())),
        }
    }

    fn call_compiled(&mut self, func: Arc<CompiledFunction>, mut num_args: usize) -> Result<(), ErrorKind> {
        if func.varargs {
            let fixed = func.num_parameters.saturating_sub(1);
            if num_args < fixed {
                return Err(ErrorKind::wrong_args(format!(">={}", fixed), num_args));
            }
            let rest = self.take_top(num_args - fixed)?;
            self.push(Object::array(rest))?;
            num_args = fixed + 1;
        } else if num_args != func.num_parameters {
            return Err(ErrorKind::wrong_args(func.num_parameters.to_string(), num_args));
        }

        if num_args > func.num_locals {
            return Err(ErrorKind::MalformedFunction(format!(
                "{} arguments for {} locals",
                num_args, func.num_locals
            )));
        }

        // self-recursion in tail position reuses the running frame
        if Arc::ptr_eq(&func, &self.cur) && self.at_tail_position() {
            let locals_end = self.base + func.num_locals;
            if locals_end >= self.stack.len() {
                return Err(ErrorKind::StackOverflow);
            }
            let args = self.take_top(num_args)?;
            self.pop()?;
            for slot in &mut self.stack[self.base..locals_end.max(self.sp)] {
                *slot = Object::Undefined;
            }
            for (i, arg) in args.into_iter().enumerate() {
                self.stack[self.base + i] = arg;
            }
            self.sp = locals_end;
            self.ip = 0;
            return Ok(());
        }

        if self.frames.len() + 1 >= self.config.max_frames {
            return Err(ErrorKind::StackOverflow);
        }
        let base = self.sp - num_args;
        let locals_end = base + func.num_locals;
        if locals_end >= self.stack.len() {
            return Err(ErrorKind::StackOverflow);
        }
        for slot in &mut self.stack[base + num_args..locals_end] {
            *slot = Object::Undefined;
        }

        let caller = std::mem::replace(&mut self.cur, func);
        self.frames.push(Frame {
            func: caller,
            ip: self.ip,
            base: self.base,
        });
        self.ins = self.cur.instructions.clone();
        self.ip = 0;
        self.base = base;
        self.sp = locals_end;
        Ok(())
    }

    fn at_tail_position(&self) -> bool {
        match self.ins.get(self.ip).copied().and_then(Opcode::from_u8) {
            Some(Opcode::Return) => true,
            Some(Opcode::Pop) => self.ins.get(self.ip + 1).copied() == Some(Opcode::Return as u8),
            _ => false,
        }
    }

    fn return_from_call(&mut self, value: Object) -> Result<(), ErrorKind> {
        let Some(caller) = self.frames.pop() else {
            return Err(ErrorKind::custom("return outside of a function"));
        };
        let callee_slot = self.base.saturating_sub(1);
        for slot in &mut self.stack[callee_slot..self.sp] {
            *slot = Object::Undefined;
        }
        self.sp = callee_slot;
        self.ins = caller.func.instructions.clone();
        self.cur = caller.func;
        self.ip = caller.ip;
        self.base = caller.base;
        self.push(value)
    }

    // =========================================================================
    // Stack helpers
    // =========================================================================

    #[inline]
    fn push(&mut self, value: Object) -> Result<(), ErrorKind> {
        if self.sp >= self.stack.len() {
            return Err(ErrorKind::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    #[inline]
    fn pop(&mut self) -> Result<Object, ErrorKind> {
        if self.sp <= self.base && !self.frames.is_empty() || self.sp == 0 {
            return Err(ErrorKind::custom("stack underflow"));
        }
        self.sp -= 1;
        Ok(std::mem::take(&mut self.stack[self.sp]))
    }

    fn peek(&self) -> Result<&Object, ErrorKind> {
        self.sp
            .checked_sub(1)
            .map(|top| &self.stack[top])
            .ok_or_else(|| ErrorKind::custom("stack underflow"))
    }

    /// Remove the top `n` values, bottom first.
    fn take_top(&mut self, n: usize) -> Result<Vec<Object>, ErrorKind> {
        let start = self.sp.checked_sub(n).ok_or_else(|| ErrorKind::custom("stack underflow"))?;
        let items = self.stack[start..self.sp].iter_mut().map(std::mem::take).collect();
        self.sp = start;
        Ok(items)
    }

    fn local_slot(&self, idx: usize) -> Result<usize, ErrorKind> {
        let slot = self.base + idx;
        if slot >= self.stack.len() {
            return Err(ErrorKind::StackOverflow);
        }
        Ok(slot)
    }

    fn free_cell(&self, idx: usize) -> Result<ObjectPtr, ErrorKind> {
        self.cur
            .free
            .get(idx)
            .cloned()
            .ok_or_else(|| ErrorKind::custom(format!("free variable {} out of range", idx)))
    }

    fn constant(&self, idx: usize) -> Result<Object, ErrorKind> {
        self.bytecode
            .constants
            .get(idx)
            .cloned()
            .ok_or_else(|| ErrorKind::custom(format!("constant {} out of range", idx)))
    }

    /// Count one allocation against the budget.
    #[inline]
    fn charge(&mut self) -> Result<(), ErrorKind> {
        if self.allocs < 0 {
            return Ok(());
        }
        self.allocs -= 1;
        if self.allocs == 0 {
            return Err(ErrorKind::ObjectAllocLimit);
        }
        Ok(())
    }
}

fn initial_allocs(max_allocs: i64) -> i64 {
    if max_allocs < 0 { -1 } else { max_allocs + 1 }
}

fn slice_bound(value: Object) -> Result<Option<i64>, ErrorKind> {
    match value {
        Object::Undefined => Ok(None),
        Object::Int(i) => Ok(Some(i)),
        other => Err(ErrorKind::InvalidIndexType(other.type_name())),
    }
}
