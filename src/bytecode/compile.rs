use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use super::compile_error::{CompileError, CompileErrors};
use super::disasm::format_instructions;
use super::op::{Opcode, make_instruction, operand_fits, read_operands};
use super::symbol::{SymbolId, SymbolScope, SymbolTable};
use super::Bytecode;
use crate::ast::{
    BlockStmt, Expr, File, FileSet, ForInStmt, ForStmt, FuncLit, IfStmt, Parse, Pos,
    SourceFilePos, Stmt, Token,
};
use crate::lang::limits::MAX_STRING_LEN;
use crate::lang::{CompiledFunction, Importable, ModuleMap, Object};

/// Knobs that shape a compilation.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    /// Upper bound on objects held by the constant pool, checked by the
    /// host after deduplication. `None` means unlimited.
    pub max_const_objects: Option<usize>,
    /// Emit the disassembly of every compiled function as `trace` events.
    pub trace: bool,
}

/// Compilation was abandoned; the reasons are in `Compiler::errors`.
struct Stop;

type Step = Result<(), Stop>;

#[derive(Debug, Default)]
struct Loop {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// Instructions of the function being compiled.
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Vec<u8>,
    source_map: BTreeMap<usize, Pos>,
    last_op: Option<Opcode>,
    loops: Vec<Loop>,
}

/// Turns a syntax tree into [`Bytecode`].
///
/// Soft errors (unresolved names, unknown modules, oversized operands) are
/// collected and compilation goes on, up to
/// [`MAX_COMPILE_ERRORS`](super::compile_error::MAX_COMPILE_ERRORS). Structural
/// errors such as `break` outside a loop stop it at once.
pub struct Compiler<'a> {
    file_set: FileSet,
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    modules: &'a ModuleMap,
    compiled_modules: FxHashMap<String, Arc<CompiledFunction>>,
    /// Source modules currently being compiled, outermost first.
    import_stack: Vec<String>,
    parser: Option<Arc<dyn Parse>>,
    errors: CompileErrors,
    options: CompilerOptions,
    in_module: bool,
}

impl<'a> Compiler<'a> {
    /// `symbol_table` must already hold the builtins and any host globals.
    pub fn new(
        file_set: FileSet,
        symbol_table: SymbolTable,
        modules: &'a ModuleMap,
        options: CompilerOptions,
    ) -> Self {
        Compiler {
            file_set,
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
            modules,
            compiled_modules: FxHashMap::default(),
            import_stack: Vec::new(),
            parser: None,
            errors: CompileErrors::new(),
            options,
            in_module: false,
        }
    }

    /// Parser used for source modules pulled in by `import`.
    pub fn with_parser(mut self, parser: Option<Arc<dyn Parse>>) -> Self {
        self.parser = parser;
        self
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    /// Compile the top-level statements of `file`.
    pub fn compile(&mut self, file: &File) -> Result<(), CompileErrors> {
        let _ = self.compile_stmts(&file.stmts);
        if !self.errors.is_empty() {
            debug!(errors = self.errors.len(), "compilation failed");
            return Err(std::mem::take(&mut self.errors));
        }
        Ok(())
    }

    /// The compiled unit: entry instructions terminated by `SUSPEND`.
    pub fn bytecode(self) -> Bytecode {
        self.into_parts().0
    }

    pub fn into_parts(mut self) -> (Bytecode, SymbolTable) {
        let scope = self.scopes.swap_remove(0);
        let mut instructions = scope.instructions;
        instructions.extend(make_instruction(Opcode::Suspend, &[]));
        let main = CompiledFunction {
            instructions: instructions.into(),
            source_map: Arc::new(scope.source_map),
            ..CompiledFunction::default()
        };
        if self.options.trace {
            trace_listing("main", &main.instructions);
        }
        debug!(
            constants = self.constants.len(),
            bytes = main.instructions.len(),
            "compiled program"
        );
        let bc = Bytecode {
            file_set: self.file_set,
            main_function: Arc::new(main),
            constants: self.constants,
        };
        (bc, self.symbol_table)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Compile a statement list, dropping whatever follows a `return`,
    /// `break` or `continue`.
    fn compile_stmts(&mut self, stmts: &[Stmt]) -> Step {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
            if stmt.is_terminal() {
                break;
            }
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Step {
        match stmt {
            Stmt::Expr(e) => {
                self.compile_expr(e)?;
                self.emit(e.pos(), Opcode::Pop, &[])?;
            }
            Stmt::Assign(s) => self.compile_assign(s.pos, &s.lhs, &s.rhs, s.token)?,
            Stmt::IncDec(s) => {
                let op = if s.token == Token::Dec {
                    Token::SubAssign
                } else {
                    Token::AddAssign
                };
                let one = Expr::Int(1, s.pos);
                self.compile_assign(
                    s.pos,
                    std::slice::from_ref(&s.expr),
                    std::slice::from_ref(&one),
                    op,
                )?;
            }
            Stmt::Block(b) => self.compile_block(b)?,
            Stmt::If(s) => self.compile_if(s)?,
            Stmt::For(s) => self.compile_for(s)?,
            Stmt::ForIn(s) => self.compile_for_in(s)?,
            Stmt::Return(s) => {
                if !self.in_function() {
                    return self.hard_error(CompileError::outside_function("return", self.position(s.pos)));
                }
                match &s.result {
                    Some(result) => {
                        self.compile_expr(result)?;
                        self.emit(s.pos, Opcode::Return, &[1])?;
                    }
                    None => {
                        self.emit(s.pos, Opcode::Return, &[0])?;
                    }
                }
            }
            Stmt::Branch(s) => {
                if self.scope().loops.is_empty() {
                    return self.hard_error(CompileError::outside_loop(s.token, self.position(s.pos)));
                }
                let at = self.emit(s.pos, Opcode::Jump, &[0])?;
                if let Some(current) = self.scope_mut().loops.last_mut() {
                    match s.token {
                        Token::Continue => current.continues.push(at),
                        _ => current.breaks.push(at),
                    }
                }
            }
            Stmt::Export(s) => {
                if self.scopes.len() > 1 {
                    return self.hard_error(CompileError::new(
                        "export not allowed inside function",
                        self.position(s.pos),
                    ));
                }
                // a no-op outside of modules
                if self.in_module {
                    self.compile_expr(&s.result)?;
                    self.emit(s.pos, Opcode::Immutable, &[])?;
                    self.emit(s.pos, Opcode::Return, &[1])?;
                }
            }
            Stmt::Empty(_) => {}
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStmt) -> Step {
        if block.stmts.is_empty() {
            return Ok(());
        }
        self.symbol_table.fork(true);
        let result = self.compile_stmts(&block.stmts);
        self.symbol_table.unfork();
        result
    }

    fn compile_if(&mut self, s: &IfStmt) -> Step {
        self.symbol_table.fork(true);
        let result = self.compile_if_body(s);
        self.symbol_table.unfork();
        result
    }

    fn compile_if_body(&mut self, s: &IfStmt) -> Step {
        if let Some(init) = &s.init {
            self.compile_stmt(init)?;
        }
        self.compile_expr(&s.cond)?;
        let jump_falsy = self.emit(s.pos, Opcode::JumpFalsy, &[0])?;
        self.compile_block(&s.body)?;
        match &s.else_branch {
            Some(else_branch) => {
                let jump_end = self.emit(s.pos, Opcode::Jump, &[0])?;
                self.patch_jump(jump_falsy, s.pos)?;
                self.compile_stmt(else_branch)?;
                self.patch_jump(jump_end, s.pos)?;
            }
            None => self.patch_jump(jump_falsy, s.pos)?,
        }
        Ok(())
    }

    fn compile_for(&mut self, s: &ForStmt) -> Step {
        self.symbol_table.fork(true);
        let result = self.compile_for_body(s);
        self.symbol_table.unfork();
        result
    }

    fn compile_for_body(&mut self, s: &ForStmt) -> Step {
        if let Some(init) = &s.init {
            self.compile_stmt(init)?;
        }
        let pre_cond = self.current_len();
        let post_cond = match &s.cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.emit(s.pos, Opcode::JumpFalsy, &[0])?)
            }
            None => None,
        };

        self.scope_mut().loops.push(Loop::default());
        let body = self.compile_block(&s.body);
        let current = self.scope_mut().loops.pop().unwrap_or_default();
        body?;

        let post_body = self.current_len();
        if let Some(post) = &s.post {
            self.compile_stmt(post)?;
        }
        self.emit(s.pos, Opcode::Jump, &[pre_cond])?;

        let post_stmt = self.current_len();
        if let Some(at) = post_cond {
            self.change_operand(at, post_stmt, s.pos)?;
        }
        self.close_loop(current, post_stmt, post_body, s.pos)
    }

    /// `for k, v in x { .. }` runs as
    ///
    /// ```text
    /// :it := iterator(x)
    /// for :it.next() { k := :it.key(); v := :it.value(); .. }
    /// ```
    ///
    /// `:it` cannot clash with user names, which never contain `:`.
    fn compile_for_in(&mut self, s: &ForInStmt) -> Step {
        self.symbol_table.fork(true);
        let result = self.compile_for_in_body(s);
        self.symbol_table.unfork();
        result
    }

    fn compile_for_in_body(&mut self, s: &ForInStmt) -> Step {
        let it = self.symbol_table.define(":it");
        self.compile_expr(&s.iterable)?;
        self.emit(s.pos, Opcode::IteratorInit, &[])?;
        self.emit_define(s.pos, it)?;

        let pre_cond = self.current_len();
        self.emit_load(s.pos, it)?;
        self.emit(s.pos, Opcode::IteratorNext, &[])?;
        let post_cond = self.emit(s.pos, Opcode::JumpFalsy, &[0])?;

        self.scope_mut().loops.push(Loop::default());
        let body = self.compile_for_in_loop(s, it);
        let current = self.scope_mut().loops.pop().unwrap_or_default();
        body?;

        let post_body = self.current_len();
        self.emit(s.pos, Opcode::Jump, &[pre_cond])?;
        let post_stmt = self.current_len();
        self.change_operand(post_cond, post_stmt, s.pos)?;
        self.close_loop(current, post_stmt, post_body, s.pos)
    }

    fn compile_for_in_loop(&mut self, s: &ForInStmt, it: SymbolId) -> Step {
        for (name, op) in [
            (&s.key.name, Opcode::IteratorKey),
            (&s.value.name, Opcode::IteratorValue),
        ] {
            if name == "_" {
                continue;
            }
            let id = self.symbol_table.define(name);
            self.emit_load(s.pos, it)?;
            self.emit(s.pos, op, &[])?;
            self.emit_define(s.pos, id)?;
        }
        self.compile_block(&s.body)
    }

    fn close_loop(&mut self, current: Loop, post_stmt: usize, post_body: usize, pos: Pos) -> Step {
        for at in current.breaks {
            self.change_operand(at, post_stmt, pos)?;
        }
        for at in current.continues {
            self.change_operand(at, post_body, pos)?;
        }
        Ok(())
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    fn compile_assign(&mut self, pos: Pos, lhs: &[Expr], rhs: &[Expr], op: Token) -> Step {
        let (target, value) = match (lhs, rhs) {
            ([target], [value]) => (target, value),
            _ => {
                return self.hard_error(CompileError::new(
                    "tuple assignment not allowed",
                    self.position(pos),
                ));
            }
        };

        match target {
            Expr::Ident(ident) => self.compile_assign_ident(pos, &ident.name, value, op),
            Expr::Index(ix) => {
                if op == Token::Define {
                    return self.hard_error(CompileError::new(
                        "operator ':=' not allowed with index expression",
                        self.position(pos),
                    ));
                }
                self.compile_expr(&ix.expr)?;
                self.compile_expr(&ix.index)?;
                if let Some(binop) = op.compound_operator() {
                    self.compile_expr(&ix.expr)?;
                    self.compile_expr(&ix.index)?;
                    self.emit(pos, Opcode::Index, &[])?;
                    self.compile_expr(value)?;
                    self.emit(pos, Opcode::BinaryOp, &[binop as usize])?;
                } else {
                    self.compile_expr(value)?;
                }
                self.emit(pos, Opcode::SetIndex, &[])?;
                Ok(())
            }
            Expr::Selector(_) => {
                self.hard_error(CompileError::new("selector assignment not allowed", self.position(pos)))
            }
            _ => self.hard_error(CompileError::new("invalid assignment target", self.position(pos))),
        }
    }

    fn compile_assign_ident(&mut self, pos: Pos, name: &str, value: &Expr, op: Token) -> Step {
        let resolved = self.symbol_table.resolve(name);
        let id = if op == Token::Define {
            if let Some((_, 0)) = resolved {
                return self.hard_error(CompileError::redeclared(name, self.position(pos)));
            }
            None
        } else {
            match resolved {
                Some((id, _)) => Some(id),
                None => {
                    return self.soft_error(CompileError::unresolved_reference(name, self.position(pos)));
                }
            }
        };

        // a function literal sees its own name, so it can recurse
        let is_func = matches!(value, Expr::Func(_));
        let id = match id {
            Some(id) => id,
            None if is_func => self.symbol_table.define(name),
            None => {
                self.compile_expr(value)?;
                let id = self.symbol_table.define(name);
                return self.emit_store(pos, id, true);
            }
        };

        if let Some(binop) = op.compound_operator() {
            self.emit_load(pos, id)?;
            self.compile_expr(value)?;
            self.emit(pos, Opcode::BinaryOp, &[binop as usize])?;
        } else {
            self.compile_expr(value)?;
        }
        self.emit_store(pos, id, op == Token::Define)
    }

    fn emit_store(&mut self, pos: Pos, id: SymbolId, define: bool) -> Step {
        let symbol = self.symbol_table.symbol(id).clone();
        match symbol.scope {
            SymbolScope::Global => {
                self.emit(pos, Opcode::SetGlobal, &[symbol.index])?;
            }
            SymbolScope::Local => {
                let op = if define && !symbol.local_assigned {
                    Opcode::DefineLocal
                } else {
                    Opcode::SetLocal
                };
                self.emit(pos, op, &[symbol.index])?;
                self.symbol_table.mark_local_assigned(id);
            }
            SymbolScope::Free => {
                self.emit(pos, Opcode::SetFree, &[symbol.index])?;
            }
            SymbolScope::Builtin => {
                return self.hard_error(CompileError::new(
                    format!("cannot assign to builtin '{}'", symbol.name),
                    self.position(pos),
                ));
            }
        }
        Ok(())
    }

    /// Initialize a fresh slot, bypassing any captured cell left in it.
    fn emit_define(&mut self, pos: Pos, id: SymbolId) -> Step {
        let symbol = self.symbol_table.symbol(id).clone();
        if symbol.scope == SymbolScope::Global {
            self.emit(pos, Opcode::SetGlobal, &[symbol.index])?;
        } else {
            self.emit(pos, Opcode::DefineLocal, &[symbol.index])?;
            self.symbol_table.mark_local_assigned(id);
        }
        Ok(())
    }

    fn emit_load(&mut self, pos: Pos, id: SymbolId) -> Step {
        let symbol = self.symbol_table.symbol(id);
        let (op, index) = match symbol.scope {
            SymbolScope::Global => (Opcode::GetGlobal, symbol.index),
            SymbolScope::Local => (Opcode::GetLocal, symbol.index),
            SymbolScope::Builtin => (Opcode::GetBuiltin, symbol.index),
            SymbolScope::Free => (Opcode::GetFree, symbol.index),
        };
        self.emit(pos, op, &[index])?;
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Step {
        match expr {
            Expr::Ident(ident) => match self.symbol_table.resolve(&ident.name) {
                Some((id, _)) => self.emit_load(ident.pos, id)?,
                None => {
                    self.soft_error(CompileError::unresolved_reference(
                        &ident.name,
                        self.position(ident.pos),
                    ))?;
                }
            },
            Expr::Int(v, pos) => self.emit_constant(*pos, Object::Int(*v))?,
            Expr::Float(v, pos) => self.emit_constant(*pos, Object::Float(*v))?,
            Expr::Char(v, pos) => self.emit_constant(*pos, Object::Char(*v))?,
            Expr::String(v, pos) => {
                if v.len() > MAX_STRING_LEN {
                    return self.soft_error(CompileError::new("string length limit exceeded", self.position(*pos)));
                }
                self.emit_constant(*pos, Object::string(v.as_str()))?;
            }
            Expr::Bool(v, pos) => {
                let op = if *v { Opcode::True } else { Opcode::False };
                self.emit(*pos, op, &[])?;
            }
            Expr::Undefined(pos) => {
                self.emit(*pos, Opcode::Null, &[])?;
            }
            Expr::Array(lit) => {
                for element in &lit.elements {
                    self.compile_expr(element)?;
                }
                self.emit(lit.pos, Opcode::Array, &[lit.elements.len()])?;
            }
            Expr::Map(lit) => {
                for element in &lit.elements {
                    self.emit_constant(element.pos, Object::string(element.key.as_str()))?;
                    self.compile_expr(&element.value)?;
                }
                self.emit(lit.pos, Opcode::Map, &[lit.elements.len() * 2])?;
            }
            Expr::Binary(b) => self.compile_binary(b.pos, &b.lhs, b.token, &b.rhs)?,
            Expr::Unary(u) => {
                self.compile_expr(&u.expr)?;
                match u.token {
                    Token::Not => {
                        self.emit(u.pos, Opcode::LNot, &[])?;
                    }
                    Token::Sub => {
                        self.emit(u.pos, Opcode::Minus, &[])?;
                    }
                    Token::Xor => {
                        self.emit(u.pos, Opcode::BComplement, &[])?;
                    }
                    Token::Add => {}
                    other => {
                        return self.soft_error(CompileError::invalid_operator(other, self.position(u.pos)));
                    }
                }
            }
            Expr::Cond(c) => {
                self.compile_expr(&c.cond)?;
                let jump_falsy = self.emit(c.pos, Opcode::JumpFalsy, &[0])?;
                self.compile_expr(&c.if_true)?;
                let jump_end = self.emit(c.pos, Opcode::Jump, &[0])?;
                self.patch_jump(jump_falsy, c.pos)?;
                self.compile_expr(&c.if_false)?;
                self.patch_jump(jump_end, c.pos)?;
            }
            Expr::Call(c) => {
                self.compile_expr(&c.func)?;
                for arg in &c.args {
                    self.compile_expr(arg)?;
                }
                self.emit(c.pos, Opcode::Call, &[c.args.len(), c.ellipsis as usize])?;
            }
            Expr::Index(ix) => {
                self.compile_expr(&ix.expr)?;
                self.compile_expr(&ix.index)?;
                self.emit(ix.pos, Opcode::Index, &[])?;
            }
            Expr::Selector(sel) => {
                self.compile_expr(&sel.expr)?;
                self.emit_constant(sel.pos, Object::string(sel.sel.as_str()))?;
                self.emit(sel.pos, Opcode::Index, &[])?;
            }
            Expr::Slice(s) => {
                self.compile_expr(&s.expr)?;
                for bound in [&s.low, &s.high] {
                    match bound {
                        Some(e) => self.compile_expr(e)?,
                        None => {
                            self.emit(s.pos, Opcode::Null, &[])?;
                        }
                    }
                }
                self.emit(s.pos, Opcode::SliceIndex, &[])?;
            }
            Expr::Func(lit) => self.compile_func(lit)?,
            Expr::Import(imp) => self.compile_import(imp.pos, &imp.module_name)?,
            Expr::Error(w) => {
                self.compile_expr(&w.expr)?;
                self.emit(w.pos, Opcode::Error, &[])?;
            }
            Expr::Immutable(w) => {
                self.compile_expr(&w.expr)?;
                self.emit(w.pos, Opcode::Immutable, &[])?;
            }
            Expr::Paren(w) => self.compile_expr(&w.expr)?,
        }
        Ok(())
    }

    fn compile_binary(&mut self, pos: Pos, lhs: &Expr, token: Token, rhs: &Expr) -> Step {
        match token {
            Token::LAnd | Token::LOr => {
                self.compile_expr(lhs)?;
                let op = if token == Token::LAnd {
                    Opcode::AndJump
                } else {
                    Opcode::OrJump
                };
                let at = self.emit(pos, op, &[0])?;
                self.compile_expr(rhs)?;
                self.patch_jump(at, pos)
            }
            // `a < b` is `b > a`
            Token::Less | Token::LessEq => {
                self.compile_expr(rhs)?;
                self.compile_expr(lhs)?;
                let flipped = if token == Token::Less {
                    Token::Greater
                } else {
                    Token::GreaterEq
                };
                self.emit(pos, Opcode::BinaryOp, &[flipped as usize])?;
                Ok(())
            }
            _ => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                match token {
                    Token::Equal => {
                        self.emit(pos, Opcode::Equal, &[])?;
                    }
                    Token::NotEqual => {
                        self.emit(pos, Opcode::NotEqual, &[])?;
                    }
                    Token::Add
                    | Token::Sub
                    | Token::Mul
                    | Token::Quo
                    | Token::Rem
                    | Token::And
                    | Token::Or
                    | Token::Xor
                    | Token::AndNot
                    | Token::Shl
                    | Token::Shr
                    | Token::Greater
                    | Token::GreaterEq => {
                        self.emit(pos, Opcode::BinaryOp, &[token as usize])?;
                    }
                    other => {
                        return self.soft_error(CompileError::invalid_operator(other, self.position(pos)));
                    }
                }
                Ok(())
            }
        }
    }

    fn compile_func(&mut self, lit: &FuncLit) -> Step {
        self.enter_scope();
        let body = self.compile_func_body(lit);
        let free = self.symbol_table.free_symbols();
        let num_locals = self.symbol_table.max_symbols();
        let scope = self.leave_scope();
        body?;

        for id in &free {
            let symbol = self.symbol_table.symbol(*id).clone();
            match symbol.scope {
                SymbolScope::Local => {
                    // a local closure capturing itself before its own store
                    if !symbol.local_assigned {
                        self.emit(lit.pos, Opcode::Null, &[])?;
                        self.emit(lit.pos, Opcode::DefineLocal, &[symbol.index])?;
                        self.symbol_table.mark_local_assigned(*id);
                    }
                    self.emit(lit.pos, Opcode::GetLocalPtr, &[symbol.index])?;
                }
                SymbolScope::Free => {
                    self.emit(lit.pos, Opcode::GetFreePtr, &[symbol.index])?;
                }
                SymbolScope::Global | SymbolScope::Builtin => {}
            }
        }

        let func = CompiledFunction {
            instructions: scope.instructions.into(),
            num_locals,
            num_parameters: lit.params.len(),
            varargs: lit.varargs,
            source_map: Arc::new(scope.source_map),
            free: Vec::new(),
        };
        if self.options.trace {
            trace_listing("function", &func.instructions);
        }
        let idx = self.add_constant(Object::CompiledFunction(Arc::new(func)));
        if free.is_empty() {
            self.emit(lit.pos, Opcode::Const, &[idx])?;
        } else {
            self.emit(lit.pos, Opcode::Closure, &[idx, free.len()])?;
        }
        Ok(())
    }

    fn compile_func_body(&mut self, lit: &FuncLit) -> Step {
        for (i, param) in lit.params.iter().enumerate() {
            if lit.params[..i].iter().any(|p| p.name == param.name) {
                return self.hard_error(CompileError::redeclared(&param.name, self.position(param.pos)));
            }
            let id = self.symbol_table.define(&param.name);
            self.symbol_table.mark_local_assigned(id);
        }
        self.compile_block(&lit.body)?;
        if !self.ends_with_return() {
            self.emit(lit.pos, Opcode::Return, &[0])?;
        }
        Ok(())
    }

    // =========================================================================
    // Modules
    // =========================================================================

    fn compile_import(&mut self, pos: Pos, name: &str) -> Step {
        if name.is_empty() {
            return self.soft_error(CompileError::new("empty module name", self.position(pos)));
        }
        let modules = self.modules;
        match modules.get(name) {
            None => self.soft_error(CompileError::module_not_found(name, self.position(pos))),
            Some(builtin @ Importable::Builtin(_)) => match builtin.as_module_object(name) {
                Some(module) => self.emit_constant(pos, module),
                None => self.soft_error(CompileError::module_not_found(name, self.position(pos))),
            },
            Some(Importable::Source(src)) => {
                let func = self.compile_module(pos, name, src)?;
                self.emit_constant(pos, Object::CompiledFunction(func))?;
                self.emit(pos, Opcode::Call, &[0, 0])?;
                Ok(())
            }
        }
    }

    /// Compile a source module into a zero-argument function that returns
    /// its exported value. Each module is compiled once per unit.
    fn compile_module(&mut self, pos: Pos, name: &str, src: &[u8]) -> Result<Arc<CompiledFunction>, Stop> {
        if self.import_stack.iter().any(|m| m == name) {
            self.hard_error(CompileError::cyclic_import(name, self.position(pos)))?;
        }
        if let Some(func) = self.compiled_modules.get(name) {
            return Ok(func.clone());
        }
        let Some(parser) = self.parser.clone() else {
            self.hard_error(CompileError::new(
                format!("module '{}' is source but no parser is configured", name),
                self.position(pos),
            ))?;
            return Err(Stop);
        };

        let source_file = self.file_set.add_file(name, None, src.len());
        let file = match parser.parse(source_file, src) {
            Ok(file) => file,
            Err(err) => {
                let at = if err.pos.is_valid() { err.pos } else { pos };
                self.hard_error(CompileError::new(
                    format!("module '{}': {}", name, err.message),
                    self.position(at),
                ))?;
                return Err(Stop);
            }
        };

        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in self.symbol_table.builtin_symbols() {
            symbol_table.define_builtin(index, &builtin);
        }
        symbol_table.fork(false);

        let mut import_stack = self.import_stack.clone();
        import_stack.push(name.to_string());
        let mut child = Compiler {
            file_set: std::mem::take(&mut self.file_set),
            constants: std::mem::take(&mut self.constants),
            symbol_table,
            scopes: vec![CompilationScope::default()],
            modules: self.modules,
            compiled_modules: std::mem::take(&mut self.compiled_modules),
            import_stack,
            parser: self.parser.clone(),
            errors: CompileErrors::new(),
            options: self.options.clone(),
            in_module: true,
        };
        let result = child.compile_stmts(&file.stmts);
        if result.is_ok() && !child.ends_with_return() {
            let _ = child.emit(pos, Opcode::Return, &[0]);
        }

        self.file_set = std::mem::take(&mut child.file_set);
        self.constants = std::mem::take(&mut child.constants);
        self.compiled_modules = std::mem::take(&mut child.compiled_modules);
        if !child.errors.is_empty() {
            for err in child.errors.errors() {
                self.errors.push(err.clone());
            }
            return Err(Stop);
        }

        let num_locals = child.symbol_table.max_symbols();
        let scope = child.scopes.swap_remove(0);
        let func = Arc::new(CompiledFunction {
            instructions: scope.instructions.into(),
            num_locals,
            source_map: Arc::new(scope.source_map),
            ..CompiledFunction::default()
        });
        debug!(module = name, bytes = func.instructions.len(), "compiled source module");
        self.compiled_modules.insert(name.to_string(), func.clone());
        Ok(func)
    }

    // =========================================================================
    // Emission
    // =========================================================================

    fn scope(&self) -> &CompilationScope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn current_len(&self) -> usize {
        self.scope().instructions.len()
    }

    fn in_function(&self) -> bool {
        self.scopes.len() > 1 || self.in_module
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.symbol_table.fork(false);
    }

    fn leave_scope(&mut self) -> CompilationScope {
        self.symbol_table.unfork();
        self.scopes.pop().unwrap_or_default()
    }

    fn add_constant(&mut self, value: Object) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit_constant(&mut self, pos: Pos, value: Object) -> Step {
        let idx = self.add_constant(value);
        self.emit(pos, Opcode::Const, &[idx])?;
        Ok(())
    }

    /// Append one instruction and return its offset.
    fn emit(&mut self, pos: Pos, op: Opcode, operands: &[usize]) -> Result<usize, Stop> {
        for (width, value) in op.operand_widths().iter().zip(operands) {
            if !operand_fits(*width, *value) {
                self.soft_error(CompileError::new(
                    format!("operand overflow: {} {}", op.name(), value),
                    self.position(pos),
                ))?;
                break;
            }
        }
        let ins = make_instruction(op, operands);
        let scope = self.scope_mut();
        let at = scope.instructions.len();
        if pos.is_valid() {
            scope.source_map.insert(at, pos);
        }
        scope.instructions.extend(ins);
        scope.last_op = Some(op);
        Ok(at)
    }

    /// Point the jump at `at` to the current end of the instructions.
    fn patch_jump(&mut self, at: usize, pos: Pos) -> Step {
        let target = self.current_len();
        self.change_operand(at, target, pos)
    }

    fn change_operand(&mut self, at: usize, operand: usize, pos: Pos) -> Step {
        if !operand_fits(2, operand) {
            return self.soft_error(CompileError::new(
                format!("jump target overflow: {}", operand),
                self.position(pos),
            ));
        }
        let ins = &mut self.scope_mut().instructions;
        ins[at + 1..at + 3].copy_from_slice(&(operand as u16).to_be_bytes());
        Ok(())
    }

    /// The last instruction is a `RETURN` and no jump lands past it.
    fn ends_with_return(&self) -> bool {
        let scope = self.scope();
        if scope.last_op != Some(Opcode::Return) {
            return false;
        }
        let end = scope.instructions.len();
        let ins = &scope.instructions;
        let mut ip = 0;
        while ip < ins.len() {
            let Some(op) = Opcode::from_u8(ins[ip]) else {
                return false;
            };
            if op.is_jump() && read_operands(op, &ins[ip..]).is_some_and(|o| o[0] == end) {
                return false;
            }
            ip += op.width();
        }
        true
    }

    // =========================================================================
    // Errors
    // =========================================================================

    fn position(&self, pos: Pos) -> SourceFilePos {
        self.file_set.position(pos)
    }

    fn soft_error(&mut self, err: CompileError) -> Step {
        if self.errors.push(err) { Ok(()) } else { Err(Stop) }
    }

    fn hard_error(&mut self, err: CompileError) -> Step {
        self.errors.push(err);
        Err(Stop)
    }
}

fn trace_listing(label: &str, ins: &[u8]) {
    for line in format_instructions(ins, 0) {
        trace!(target: "vvc::compile", unit = label, "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{ParseError, SourceFile};
    use crate::lang::{Builtins, MapData};
    use pretty_assertions::assert_eq;

    // =========================================================================
    // Helpers
    // =========================================================================

    fn table() -> SymbolTable {
        let mut t = SymbolTable::new();
        for (idx, f) in Builtins::standard().iter().enumerate() {
            t.define_builtin(idx, f.name);
        }
        t
    }

    fn compile_with(stmts: Vec<Stmt>, modules: &ModuleMap, parser: Option<Arc<dyn Parse>>) -> Result<Bytecode, CompileErrors> {
        let mut c = Compiler::new(FileSet::new(), table(), modules, CompilerOptions::default()).with_parser(parser);
        c.compile(&file(stmts))?;
        Ok(c.bytecode())
    }

    fn compile_ok(stmts: Vec<Stmt>) -> Bytecode {
        compile_with(stmts, &ModuleMap::new(), None).expect("compiles")
    }

    fn compile_err(stmts: Vec<Stmt>) -> CompileErrors {
        compile_with(stmts, &ModuleMap::new(), None).expect_err("fails to compile")
    }

    fn ins(parts: &[(Opcode, &[usize])]) -> Vec<u8> {
        parts.iter().flat_map(|(op, operands)| make_instruction(*op, operands)).collect()
    }

    fn function_const(bc: &Bytecode, idx: usize) -> Arc<CompiledFunction> {
        match &bc.constants[idx] {
            Object::CompiledFunction(f) => f.clone(),
            other => panic!("constant {} is {:?}", idx, other),
        }
    }

    /// Parses by looking the source text up in a fixed table.
    struct TableParser(Vec<(&'static str, Vec<Stmt>)>);

    impl Parse for TableParser {
        fn parse(&self, _file: &mut SourceFile, src: &[u8]) -> Result<File, ParseError> {
            self.0
                .iter()
                .find(|(text, _)| text.as_bytes() == src)
                .map(|(_, stmts)| file(stmts.clone()))
                .ok_or_else(|| ParseError::new("unexpected input", Pos::NONE))
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    #[test]
    fn test_add_constants() {
        let bc = compile_ok(vec![expr(binary(int(1), Token::Add, int(2)))]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::Const, &[0]),
                (Opcode::Const, &[1]),
                (Opcode::BinaryOp, &[Token::Add as usize]),
                (Opcode::Pop, &[]),
                (Opcode::Suspend, &[]),
            ])
        );
        assert_eq!(bc.constants, vec![Object::Int(1), Object::Int(2)]);
    }

    #[test]
    fn test_less_than_swaps_operands() {
        let bc = compile_ok(vec![expr(binary(int(1), Token::Less, int(2)))]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::Const, &[0]),
                (Opcode::Const, &[1]),
                (Opcode::BinaryOp, &[Token::Greater as usize]),
                (Opcode::Pop, &[]),
                (Opcode::Suspend, &[]),
            ])
        );
        assert_eq!(bc.constants, vec![Object::Int(2), Object::Int(1)]);
    }

    #[test]
    fn test_unary_plus_is_dropped() {
        let bc = compile_ok(vec![expr(unary(Token::Add, int(5)))]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[(Opcode::Const, &[0]), (Opcode::Pop, &[]), (Opcode::Suspend, &[])])
        );
    }

    #[test]
    fn test_logical_and_short_circuits() {
        let bc = compile_ok(vec![expr(binary(boolean(true), Token::LAnd, boolean(false)))]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::True, &[]),
                (Opcode::AndJump, &[5]),
                (Opcode::False, &[]),
                (Opcode::Pop, &[]),
                (Opcode::Suspend, &[]),
            ])
        );
    }

    #[test]
    fn test_conditional_jumps() {
        let bc = compile_ok(vec![expr(cond(boolean(true), int(1), int(2)))]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::True, &[]),
                (Opcode::JumpFalsy, &[10]),
                (Opcode::Const, &[0]),
                (Opcode::Jump, &[13]),
                (Opcode::Const, &[1]),
                (Opcode::Pop, &[]),
                (Opcode::Suspend, &[]),
            ])
        );
    }

    #[test]
    fn test_map_keys_are_string_constants() {
        let bc = compile_ok(vec![expr(map(vec![("a", int(1))]))]);
        assert_eq!(bc.constants, vec![Object::string("a"), Object::Int(1)]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::Const, &[0]),
                (Opcode::Const, &[1]),
                (Opcode::Map, &[2]),
                (Opcode::Pop, &[]),
                (Opcode::Suspend, &[]),
            ])
        );
    }

    #[test]
    fn test_builtin_reference() {
        let bc = compile_ok(vec![expr(call(ident("len"), vec![array(vec![])]))]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::GetBuiltin, &[0]),
                (Opcode::Array, &[0]),
                (Opcode::Call, &[1, 0]),
                (Opcode::Pop, &[]),
                (Opcode::Suspend, &[]),
            ])
        );
    }

    #[test]
    fn test_spread_call_sets_flag() {
        let bc = compile_ok(vec![expr(call_spread(ident("len"), vec![array(vec![])]))]);
        assert_eq!(&bc.main_function.instructions[5..8], &make_instruction(Opcode::Call, &[1, 1])[..]);
    }

    // =========================================================================
    // Statements
    // =========================================================================

    #[test]
    fn test_globals_define_and_assign() {
        let bc = compile_ok(vec![define("a", int(1)), assign("a", int(2)), compound("a", Token::AddAssign, int(3))]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::Const, &[0]),
                (Opcode::SetGlobal, &[0]),
                (Opcode::Const, &[1]),
                (Opcode::SetGlobal, &[0]),
                (Opcode::GetGlobal, &[0]),
                (Opcode::Const, &[2]),
                (Opcode::BinaryOp, &[Token::Add as usize]),
                (Opcode::SetGlobal, &[0]),
                (Opcode::Suspend, &[]),
            ])
        );
    }

    #[test]
    fn test_dead_code_after_return_is_dropped() {
        let bc = compile_ok(vec![expr(func(
            &[],
            vec![ret(int(1)), expr(string("unreachable"))],
        ))]);
        assert_eq!(bc.constants.len(), 2);
        assert!(!bc.constants.contains(&Object::string("unreachable")));
        let f = function_const(&bc, 1);
        assert_eq!(
            f.instructions.to_vec(),
            ins(&[(Opcode::Const, &[0]), (Opcode::Return, &[1])])
        );
    }

    #[test]
    fn test_dead_code_after_break_is_dropped() {
        let bc = compile_ok(vec![for_stmt(None, None, None, vec![brk(), expr(int(99))])]);
        assert!(bc.constants.is_empty());
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[(Opcode::Jump, &[6]), (Opcode::Jump, &[0]), (Opcode::Suspend, &[])])
        );
    }

    #[test]
    fn test_function_without_return_gets_one() {
        let bc = compile_ok(vec![expr(func(&["a"], vec![expr(ident("a"))]))]);
        let f = function_const(&bc, 0);
        assert_eq!(f.num_parameters, 1);
        assert_eq!(f.num_locals, 1);
        assert_eq!(
            f.instructions.to_vec(),
            ins(&[(Opcode::GetLocal, &[0]), (Opcode::Pop, &[]), (Opcode::Return, &[0])])
        );
    }

    #[test]
    fn test_if_else_returns_keep_trailing_return() {
        let bc = compile_ok(vec![expr(func(
            &["a"],
            vec![if_stmt(ident("a"), vec![ret(int(1))], Some(block(vec![ret(int(2))])))],
        ))]);
        let f = function_const(&bc, 2);
        let end = f.instructions.len();
        assert_eq!(&f.instructions[end - 2..], &make_instruction(Opcode::Return, &[0])[..]);
    }

    #[test]
    fn test_for_in_uses_hidden_iterator() {
        let bc = compile_ok(vec![for_in("k", "v", array(vec![]), vec![])]);
        assert_eq!(
            bc.main_function.instructions.to_vec(),
            ins(&[
                (Opcode::Array, &[0]),
                (Opcode::IteratorInit, &[]),
                (Opcode::SetGlobal, &[0]),
                (Opcode::GetGlobal, &[0]),
                (Opcode::IteratorNext, &[]),
                (Opcode::JumpFalsy, &[31]),
                (Opcode::GetGlobal, &[0]),
                (Opcode::IteratorKey, &[]),
                (Opcode::SetGlobal, &[1]),
                (Opcode::GetGlobal, &[0]),
                (Opcode::IteratorValue, &[]),
                (Opcode::SetGlobal, &[2]),
                (Opcode::Jump, &[7]),
                (Opcode::Suspend, &[]),
            ])
        );
    }

    #[test]
    fn test_index_compound_assignment_evaluates_target_twice() {
        let bc = compile_ok(vec![
            define("a", array(vec![int(1)])),
            assign_with(vec![index(ident("a"), int(0))], vec![int(5)], Token::AddAssign),
        ]);
        let body = &bc.main_function.instructions[9..];
        assert_eq!(
            body.to_vec(),
            ins(&[
                (Opcode::GetGlobal, &[0]),
                (Opcode::Const, &[1]),
                (Opcode::GetGlobal, &[0]),
                (Opcode::Const, &[2]),
                (Opcode::Index, &[]),
                (Opcode::Const, &[3]),
                (Opcode::BinaryOp, &[Token::Add as usize]),
                (Opcode::SetIndex, &[]),
                (Opcode::Suspend, &[]),
            ])
        );
    }

    // =========================================================================
    // Closures
    // =========================================================================

    #[test]
    fn test_closure_captures_enclosing_local() {
        // func(a) { return func() { return a } }
        let bc = compile_ok(vec![expr(func(
            &["a"],
            vec![ret(func(&[], vec![ret(ident("a"))]))],
        ))]);
        let inner = function_const(&bc, 0);
        assert_eq!(
            inner.instructions.to_vec(),
            ins(&[(Opcode::GetFree, &[0]), (Opcode::Return, &[1])])
        );
        let outer = function_const(&bc, 1);
        assert_eq!(
            outer.instructions.to_vec(),
            ins(&[(Opcode::GetLocalPtr, &[0]), (Opcode::Closure, &[0, 1]), (Opcode::Return, &[1])])
        );
    }

    #[test]
    fn test_recursive_local_closure_is_predeclared() {
        // func() { f := func() { return f() } }
        let bc = compile_ok(vec![expr(func(
            &[],
            vec![define("f", func(&[], vec![ret(call(ident("f"), vec![]))]))],
        ))]);
        let outer = function_const(&bc, 1);
        assert_eq!(
            outer.instructions.to_vec(),
            ins(&[
                (Opcode::Null, &[]),
                (Opcode::DefineLocal, &[0]),
                (Opcode::GetLocalPtr, &[0]),
                (Opcode::Closure, &[0, 1]),
                (Opcode::SetLocal, &[0]),
                (Opcode::Return, &[0]),
            ])
        );
    }

    #[test]
    fn test_nested_capture_goes_through_free_pointer() {
        // func(a) { func() { func() { a } } }
        let bc = compile_ok(vec![expr(func(
            &["a"],
            vec![expr(func(&[], vec![expr(func(&[], vec![expr(ident("a"))]))]))],
        ))]);
        let middle = function_const(&bc, 1);
        assert_eq!(
            middle.instructions.to_vec(),
            ins(&[
                (Opcode::GetFreePtr, &[0]),
                (Opcode::Closure, &[0, 1]),
                (Opcode::Pop, &[]),
                (Opcode::Return, &[0]),
            ])
        );
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[test]
    fn test_unresolved_reference() {
        let errs = compile_err(vec![expr(ident("nope"))]);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("unresolved reference 'nope'"));
    }

    #[test]
    fn test_soft_errors_accumulate() {
        let errs = compile_err(vec![expr(ident("a")), expr(ident("b")), expr(import("missing"))]);
        let messages: Vec<_> = errs.errors().iter().map(|e| e.message.clone()).collect();
        assert_eq!(
            messages,
            vec![
                "unresolved reference 'a'".to_string(),
                "unresolved reference 'b'".to_string(),
                "module 'missing' not found".to_string(),
            ]
        );
    }

    #[test]
    fn test_error_cap_stops_compilation() {
        let stmts = (0..20).map(|i| expr(ident(&format!("v{}", i)))).collect();
        let errs = compile_err(stmts);
        assert_eq!(errs.len(), crate::bytecode::compile_error::MAX_COMPILE_ERRORS);
    }

    #[test]
    fn test_structural_errors_stop_immediately() {
        let errs = compile_err(vec![brk(), expr(ident("later"))]);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("break not allowed outside loop"));

        let errs = compile_err(vec![ret(int(1))]);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("return not allowed outside function"));
    }

    #[test]
    fn test_redeclare_in_same_block() {
        let errs = compile_err(vec![define("a", int(1)), define("a", int(2))]);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("'a' redeclared in this block"));
    }

    #[test]
    fn test_shadowing_in_nested_block_is_allowed() {
        compile_ok(vec![define("a", int(1)), block(vec![define("a", int(2))])]);
    }

    #[test]
    fn test_selector_and_tuple_assignment_rejected() {
        let errs = compile_err(vec![
            define("m", map(vec![])),
            assign_with(vec![selector(ident("m"), "x")], vec![int(1)], Token::Assign),
        ]);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("selector assignment not allowed"));

        let errs = compile_err(vec![assign_with(vec![ident("a"), ident("b")], vec![int(1), int(2)], Token::Define)]);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("tuple assignment not allowed"));
    }

    #[test]
    fn test_export_inside_function_rejected() {
        let errs = compile_err(vec![expr(func(&[], vec![export(int(1))]))]);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("export not allowed inside function"));
    }

    #[test]
    fn test_error_carries_position() {
        let mut set = FileSet::new();
        set.add_file("main.vv", None, 50).add_line(10);
        let modules = ModuleMap::new();
        let mut c = Compiler::new(set, table(), &modules, CompilerOptions::default());
        let stmt = at(Pos(1 + 12), expr(ident("x")));
        let errs = c.compile(&file(vec![stmt])).expect_err("fails");
        assert_eq!(
            errs.to_string(),
            "Compile Error: unresolved reference 'x'\n\tat main.vv:2:3"
        );
    }

    // =========================================================================
    // Modules
    // =========================================================================

    #[test]
    fn test_empty_module_name() {
        let errs = compile_err(vec![expr(import(""))]);
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("empty module name"));
    }

    #[test]
    fn test_builtin_module_is_a_constant() {
        let mut modules = ModuleMap::new();
        let mut attrs = MapData::new();
        attrs.insert("pi".to_string(), Object::Float(3.14));
        modules.add_builtin_module("math", attrs);
        let bc = compile_with(vec![expr(import("math"))], &modules, None).expect("compiles");
        assert_eq!(ModuleMap::module_name_of(&bc.constants[0]), Some("math"));
    }

    #[test]
    fn test_source_module_compiles_to_call() {
        let mut modules = ModuleMap::new();
        modules.add_source_module("util", &b"export 5"[..]);
        let parser: Arc<dyn Parse> = Arc::new(TableParser(vec![("export 5", vec![export(int(5))])]));
        let bc = compile_with(
            vec![define("u", import("util")), define("w", import("util"))],
            &modules,
            Some(parser),
        )
        .expect("compiles");
        let module = function_const(&bc, 1);
        assert_eq!(
            module.instructions.to_vec(),
            ins(&[(Opcode::Const, &[0]), (Opcode::Immutable, &[]), (Opcode::Return, &[1])])
        );
        assert_eq!(
            &bc.main_function.instructions[..6],
            &ins(&[(Opcode::Const, &[1]), (Opcode::Call, &[0, 0])])[..]
        );
        // the second import reuses the compiled module
        assert_eq!(bc.constants.len(), 3);
        assert_eq!(bc.constants[1], bc.constants[2]);
    }

    #[test]
    fn test_cyclic_import_rejected() {
        let mut modules = ModuleMap::new();
        modules.add_source_module("a", &b"a"[..]);
        modules.add_source_module("b", &b"b"[..]);
        let parser: Arc<dyn Parse> = Arc::new(TableParser(vec![
            ("a", vec![define("x", import("b"))]),
            ("b", vec![define("y", import("a"))]),
        ]));
        let errs = compile_with(vec![expr(import("a"))], &modules, Some(parser)).expect_err("cycle");
        assert_eq!(errs.first().map(|e| e.message.as_str()), Some("cyclic module import: a"));
    }

    #[test]
    fn test_source_module_without_parser() {
        let mut modules = ModuleMap::new();
        modules.add_source_module("util", &b"export 1"[..]);
        let errs = compile_with(vec![expr(import("util"))], &modules, None).expect_err("no parser");
        assert!(errs.to_string().contains("no parser"));
    }

    #[test]
    fn test_duplicate_constants_collapse_after_dedup() {
        let mut bc = compile_ok(vec![
            expr(binary(int(1), Token::Add, int(1))),
            expr(string("x")),
            expr(string("x")),
        ]);
        assert_eq!(bc.constants.len(), 4);
        bc.remove_duplicates();
        assert_eq!(bc.constants, vec![Object::Int(1), Object::string("x")]);
    }
}
