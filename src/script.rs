//! Host-facing API: build a [`Script`], compile it into a [`Program`],
//! run the program as often as needed.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::{File, FileSet, Parse};
use crate::bytecode::{Bytecode, Compiler, CompilerOptions, SymbolTable};
use crate::encoding::ProgramImage;
use crate::lang::{Builtins, MapData, ModuleMap, Object};
use crate::runtime::{Context, Globals, Vm, VmConfig, run_with_context};
use crate::{Error, Result};

/// Name of the entry file in positions and traces.
const MAIN_FILE: &str = "(main)";

// =============================================================================
// Variable
// =============================================================================

/// A named value crossing the host boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    value: Object,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<Object>) -> Self {
        Variable {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Object {
        &self.value
    }

    pub fn into_value(self) -> Object {
        self.value
    }

    pub fn value_type(&self) -> String {
        self.value.type_name()
    }

    /// Lenient integer view; `0` when the value does not convert.
    pub fn as_int(&self) -> i64 {
        self.value.to_int().unwrap_or(0)
    }

    pub fn as_float(&self) -> f64 {
        self.value.to_float().unwrap_or(0.0)
    }

    pub fn as_bool(&self) -> bool {
        !self.value.is_falsy()
    }

    pub fn as_char(&self) -> char {
        self.value.to_char().unwrap_or('\0')
    }

    /// Text form; empty for `undefined`.
    pub fn as_string(&self) -> String {
        self.value.to_text().unwrap_or_default()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.value.to_byte_vec().unwrap_or_default()
    }

    pub fn as_array(&self) -> Vec<Object> {
        self.value.array_items()
    }

    pub fn as_map(&self) -> MapData {
        self.value.map_entries()
    }

    pub fn is_undefined(&self) -> bool {
        self.value.is_undefined()
    }
}

// =============================================================================
// Script
// =============================================================================

enum Source {
    Text(Vec<u8>),
    Tree(FileSet, File),
}

/// Everything a compilation needs: source, host variables, modules,
/// builtins and limits.
pub struct Script {
    source: Source,
    variables: Vec<Variable>,
    modules: ModuleMap,
    builtins: Builtins,
    parser: Option<Arc<dyn Parse>>,
    max_allocs: i64,
    max_const_objects: Option<usize>,
    trace: bool,
}

impl Script {
    /// A script from source text. Compiling it needs a parser, see
    /// [`Script::set_parser`].
    pub fn new(src: impl Into<Vec<u8>>) -> Self {
        Self::with_source(Source::Text(src.into()))
    }

    /// A script from an already built tree with no position information.
    pub fn from_ast(file: File) -> Self {
        Self::with_source(Source::Tree(FileSet::new(), file))
    }

    /// A script from a tree whose positions resolve through `file_set`.
    pub fn from_parsed(file_set: FileSet, file: File) -> Self {
        Self::with_source(Source::Tree(file_set, file))
    }

    fn with_source(source: Source) -> Self {
        Script {
            source,
            variables: Vec::new(),
            modules: ModuleMap::new(),
            builtins: Builtins::standard(),
            parser: None,
            max_allocs: -1,
            max_const_objects: None,
            trace: false,
        }
    }

    /// Declare a host variable, replacing one of the same name.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Object>) -> &mut Self {
        let var = Variable::new(name, value);
        match self.variables.iter_mut().find(|v| v.name == var.name) {
            Some(slot) => *slot = var,
            None => self.variables.push(var),
        }
        self
    }

    /// Returns whether `name` was declared.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.variables.len();
        self.variables.retain(|v| v.name != name);
        self.variables.len() != before
    }

    pub fn set_modules(&mut self, modules: ModuleMap) -> &mut Self {
        self.modules = modules;
        self
    }

    pub fn set_builtins(&mut self, builtins: Builtins) -> &mut Self {
        self.builtins = builtins;
        self
    }

    pub fn set_parser(&mut self, parser: Arc<dyn Parse>) -> &mut Self {
        self.parser = Some(parser);
        self
    }

    /// Objects a run may allocate; negative means unlimited.
    pub fn set_max_allocs(&mut self, n: i64) -> &mut Self {
        self.max_allocs = n;
        self
    }

    pub fn set_max_const_objects(&mut self, n: usize) -> &mut Self {
        self.max_const_objects = Some(n);
        self
    }

    /// Log the disassembly of compiled functions at `trace` level.
    pub fn enable_trace(&mut self, on: bool) -> &mut Self {
        self.trace = on;
        self
    }

    pub fn compile(&self) -> Result<Program> {
        let mut symbol_table = SymbolTable::new();
        for (idx, builtin) in self.builtins.iter().enumerate() {
            symbol_table.define_builtin(idx, builtin.name);
        }
        let mut host_values = Vec::with_capacity(self.variables.len());
        for var in &self.variables {
            let id = symbol_table.define(&var.name);
            host_values.push((symbol_table.symbol(id).index, var.value.clone()));
        }

        let (file_set, parsed);
        let file = match &self.source {
            Source::Tree(set, file) => {
                file_set = set.clone();
                file
            }
            Source::Text(src) => {
                let parser = self.parser.as_ref().ok_or(Error::NoParser)?;
                let mut set = FileSet::new();
                parsed = parser.parse(set.add_file(MAIN_FILE, None, src.len()), src)?;
                file_set = set;
                &parsed
            }
        };

        let options = CompilerOptions {
            max_const_objects: self.max_const_objects,
            trace: self.trace,
        };
        let mut compiler =
            Compiler::new(file_set, symbol_table, &self.modules, options).with_parser(self.parser.clone());
        compiler.compile(file)?;
        let (mut bytecode, symbol_table) = compiler.into_parts();
        bytecode.remove_duplicates();

        if let Some(limit) = self.max_const_objects {
            let count = bytecode.count_objects();
            if count > limit {
                return Err(Error::ConstObjectsLimit(count));
            }
        }

        let mut globals = vec![None; symbol_table.max_symbols()];
        for (idx, value) in host_values {
            globals[idx] = Some(value);
        }
        let names = symbol_table.global_names().into_iter().collect();
        debug!(
            globals = globals.len(),
            constants = bytecode.constants.len(),
            "script compiled"
        );

        Ok(Program::from_parts(
            Arc::new(bytecode),
            globals,
            names,
            self.max_allocs,
            Arc::new(self.builtins.clone()),
        ))
    }

    /// Compile and run once.
    pub fn run(&self) -> Result<Program> {
        let program = self.compile()?;
        program.run()?;
        Ok(program)
    }

    /// Compile and run once under `ctx`.
    pub fn run_context(&self, ctx: &Context) -> Result<Program> {
        let program = self.compile()?;
        program.run_context(ctx)?;
        Ok(program)
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("variables", &self.variables)
            .field("modules", &self.modules.len())
            .field("builtins", &self.builtins.len())
            .field("has_parser", &self.parser.is_some())
            .field("max_allocs", &self.max_allocs)
            .field("max_const_objects", &self.max_const_objects)
            .finish()
    }
}

// =============================================================================
// Program
// =============================================================================

struct ProgramState {
    bytecode: Arc<Bytecode>,
    globals: Globals,
    names: FxHashMap<String, usize>,
    max_allocs: i64,
}

/// A compiled script with its globals.
///
/// Each operation takes the program lock on its own. Concurrent runs
/// belong on clones, which share the bytecode and copy the globals.
pub struct Program {
    state: RwLock<ProgramState>,
    builtins: Arc<Builtins>,
}

impl Program {
    fn from_parts(
        bytecode: Arc<Bytecode>,
        globals: Vec<Option<Object>>,
        names: FxHashMap<String, usize>,
        max_allocs: i64,
        builtins: Arc<Builtins>,
    ) -> Self {
        Program {
            state: RwLock::new(ProgramState {
                bytecode,
                globals: Arc::new(RwLock::new(globals)),
                names,
                max_allocs,
            }),
            builtins,
        }
    }

    fn vm(&self, state: &ProgramState) -> Vm {
        let config = VmConfig {
            max_allocs: state.max_allocs,
            ..VmConfig::default()
        };
        Vm::new(state.bytecode.clone(), state.globals.clone(), self.builtins.clone(), config)
    }

    pub fn run(&self) -> Result<()> {
        let state = self.state.write();
        self.vm(&state).run()?;
        Ok(())
    }

    /// Run until done or until `ctx` is cancelled or its deadline passes.
    pub fn run_context(&self, ctx: &Context) -> Result<()> {
        let state = self.state.write();
        let mut vm = self.vm(&state);
        run_with_context(&mut vm, ctx)
    }

    /// Value of global `name`; `undefined` when it is not a global.
    pub fn get(&self, name: &str) -> Variable {
        let state = self.state.read();
        let value = state
            .names
            .get(name)
            .and_then(|&idx| state.globals.read().get(idx).cloned().flatten())
            .unwrap_or_default();
        Variable::new(name, value)
    }

    /// Every global, sorted by name.
    pub fn get_all(&self) -> Vec<Variable> {
        let state = self.state.read();
        let globals = state.globals.read();
        let mut vars: Vec<_> = state
            .names
            .iter()
            .map(|(name, &idx)| Variable::new(name.as_str(), globals.get(idx).cloned().flatten().unwrap_or_default()))
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        vars
    }

    /// Whether `name` is a global holding something other than `undefined`.
    pub fn is_defined(&self, name: &str) -> bool {
        !self.get(name).is_undefined()
    }

    /// Replace the value of a global declared at compile time.
    pub fn set(&self, name: &str, value: impl Into<Object>) -> Result<()> {
        let state = self.state.write();
        let idx = *state
            .names
            .get(name)
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
        let mut globals = state.globals.write();
        if idx >= globals.len() {
            globals.resize(idx + 1, None);
        }
        globals[idx] = Some(value.into());
        Ok(())
    }

    pub fn bytecode(&self) -> Arc<Bytecode> {
        self.state.read().bytecode.clone()
    }

    /// Same bytecode, same names and same global values.
    pub fn equals(&self, other: &Program) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (a, b) = (self.state.read(), other.state.read());
        a.max_allocs == b.max_allocs
            && a.names == b.names
            && *a.bytecode == *b.bytecode
            && globals_eq(&a.globals.read(), &b.globals.read())
    }

    pub fn marshal(&self) -> Result<Vec<u8>> {
        let state = self.state.read();
        let mut names: Vec<_> = state.names.iter().map(|(n, &i)| (n.clone(), i)).collect();
        names.sort_by_key(|(_, idx)| *idx);
        let image = ProgramImage {
            names,
            globals: state.globals.read().iter().map(|g| g.clone().unwrap_or_default()).collect(),
            max_allocs: state.max_allocs,
            bytecode: state.bytecode.as_ref().clone(),
        };
        Ok(image.marshal()?)
    }

    /// Decode a marshaled program that uses the standard builtins.
    pub fn unmarshal(bytes: &[u8], modules: &ModuleMap) -> Result<Program> {
        Self::unmarshal_with_builtins(bytes, modules, Builtins::standard())
    }

    /// `builtins` must be the table the program was compiled against.
    pub fn unmarshal_with_builtins(bytes: &[u8], modules: &ModuleMap, builtins: Builtins) -> Result<Program> {
        let image = ProgramImage::unmarshal(bytes, modules)?;
        Ok(Program::from_parts(
            Arc::new(image.bytecode),
            image.globals.into_iter().map(Some).collect(),
            image.names.into_iter().collect(),
            image.max_allocs,
            Arc::new(builtins),
        ))
    }
}

/// Unset slots compare equal to `undefined`.
fn globals_eq(a: &[Option<Object>], b: &[Option<Object>]) -> bool {
    let undefined = Object::Undefined;
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.as_ref().unwrap_or(&undefined) == y.as_ref().unwrap_or(&undefined))
}

impl Clone for Program {
    /// Shares the bytecode; globals are deep copies.
    fn clone(&self) -> Self {
        let state = self.state.read();
        let globals = state
            .globals
            .read()
            .iter()
            .map(|g| Some(g.as_ref().map(Object::copy).unwrap_or_default()))
            .collect();
        Program::from_parts(
            state.bytecode.clone(),
            globals,
            state.names.clone(),
            state.max_allocs,
            self.builtins.clone(),
        )
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Program")
            .field("globals", &state.names.len())
            .field("constants", &state.bytecode.constants.len())
            .field("max_allocs", &state.max_allocs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{ParseError, SourceFile, Token};
    use pretty_assertions::assert_eq;

    /// Parser stub that hands out a fixed tree.
    struct Canned(File);

    impl Parse for Canned {
        fn parse(&self, _: &mut SourceFile, _: &[u8]) -> std::result::Result<File, ParseError> {
            Ok(self.0.clone())
        }
    }

    fn doubling() -> Script {
        // out := in * 2
        let mut script = Script::from_ast(file(vec![define("out", binary(ident("in"), Token::Mul, int(2)))]));
        script.add("in", 0i64);
        script
    }

    #[test]
    fn test_host_variables_flow_in_and_out() {
        let program = doubling().compile().expect("compiles");
        program.set("in", 21i64).expect("declared");
        program.run().expect("runs");
        assert_eq!(program.get("out").as_int(), 42);
        assert_eq!(program.get("out").value_type(), "int");
        assert!(program.is_defined("out"));
        assert!(!program.is_defined("nope"));
    }

    #[test]
    fn test_set_rejects_undeclared_names() {
        let program = doubling().compile().expect("compiles");
        assert!(matches!(program.set("other", 1i64), Err(Error::UnknownVariable(name)) if name == "other"));
    }

    #[test]
    fn test_get_all_lists_globals_by_name() {
        let program = doubling().run().expect("runs");
        let names: Vec<_> = program.get_all().iter().map(|v| v.name().to_string()).collect();
        assert_eq!(names, vec!["in", "out"]);
    }

    #[test]
    fn test_clones_do_not_share_globals() {
        let program = doubling().compile().expect("compiles");
        let copy = program.clone();
        copy.set("in", 5i64).expect("declared");
        copy.run().expect("runs");
        program.run().expect("runs");
        assert_eq!(copy.get("out").as_int(), 10);
        assert_eq!(program.get("out").as_int(), 0);
        assert!(Arc::ptr_eq(&program.bytecode(), &copy.bytecode()));
    }

    #[test]
    fn test_source_text_needs_parser() {
        let script = Script::new("out := 1");
        assert!(matches!(script.compile(), Err(Error::NoParser)));

        let mut script = Script::new("out := 1");
        script.set_parser(Arc::new(Canned(file(vec![define("out", int(1))]))));
        let program = script.run().expect("runs");
        assert_eq!(program.get("out").as_int(), 1);
    }

    #[test]
    fn test_const_objects_limit() {
        let mut script = Script::from_ast(file(vec![define(
            "a",
            array(vec![string("x"), string("y"), string("z")]),
        )]));
        script.set_max_const_objects(2);
        let err = script.compile().expect_err("over limit");
        assert!(err.to_string().contains("exceeding constant objects limit"));
    }

    #[test]
    fn test_remove_undeclares_variable() {
        let mut script = doubling();
        assert!(script.remove("in"));
        assert!(!script.remove("in"));
        assert!(matches!(script.compile(), Err(Error::Compile(_))));
    }

    #[test]
    fn test_marshal_roundtrip_keeps_state() {
        let program = doubling().compile().expect("compiles");
        program.set("in", 4i64).expect("declared");
        let bytes = program.marshal().expect("marshals");
        let back = Program::unmarshal(&bytes, &ModuleMap::new()).expect("unmarshals");
        assert!(back.equals(&program));
        back.run().expect("runs");
        assert_eq!(back.get("out").as_int(), 8);
        assert!(!back.equals(&program));
    }

    #[test]
    fn test_variable_accessors() {
        let v = Variable::new("s", "12");
        assert_eq!(v.as_int(), 12);
        assert_eq!(v.as_string(), "12");
        assert!(v.as_bool());
        assert_eq!(Variable::new("u", Object::Undefined).as_string(), "");
        assert_eq!(Variable::new("f", 1.5).as_float(), 1.5);
    }
}
