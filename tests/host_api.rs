use std::sync::Arc;

use pretty_assertions::assert_eq;

use vvc::ast::build::*;
use vvc::ast::{File, Parse, ParseError, Pos, SourceFile, Stmt, Token};
use vvc::lang::{MapData, ModuleMap, UserFunction};
use vvc::runtime::ErrorKind;
use vvc::{Error, Object, Script};

// =============================================================================
// Helpers
// =============================================================================

/// Maps exact source texts to prepared trees.
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

fn math_module() -> ModuleMap {
    let mut attrs = MapData::new();
    attrs.insert("pi".to_string(), Object::Float(3.5));
    attrs.insert(
        "square".to_string(),
        UserFunction::object("square", |_, args| match args {
            [Object::Int(n)] => Ok(Object::Int(n * n)),
            [other] => Err(ErrorKind::invalid_arg("first", "int", &other.type_name())),
            _ => Err(ErrorKind::wrong_args("1", args.len())),
        }),
    );
    let mut modules = ModuleMap::new();
    modules.add_builtin_module("math", attrs);
    modules
}

// =============================================================================
// Modules
// =============================================================================

#[test]
fn builtin_module_functions_are_callable() {
    // math := import("math"); sq := math.square(7); pi := math.pi
    let mut script = Script::from_ast(file(vec![
        define("math", import("math")),
        define("sq", call(selector(ident("math"), "square"), vec![int(7)])),
        define("pi", selector(ident("math"), "pi")),
    ]));
    script.set_modules(math_module());
    let program = script.run().expect("runs");
    assert_eq!(program.get("sq").as_int(), 49);
    assert_eq!(program.get("pi").as_float(), 3.5);
}

#[test]
fn source_module_exports_function() {
    // triple := import("triple"); out := triple(5)
    let mut modules = ModuleMap::new();
    modules.add_source_module("triple", &b"export func(x) { return x * 3 }"[..]);
    let parser = TableParser(vec![(
        "export func(x) { return x * 3 }",
        vec![export(func(&["x"], vec![ret(binary(ident("x"), Token::Mul, int(3)))]))],
    )]);

    let mut script = Script::from_ast(file(vec![
        define("triple", import("triple")),
        define("out", call(ident("triple"), vec![int(5)])),
    ]));
    script.set_modules(modules).set_parser(Arc::new(parser));
    let program = script.run().expect("runs");
    assert_eq!(program.get("out").as_int(), 15);
}

#[test]
fn unknown_and_empty_module_names_fail_to_compile() {
    let err = Script::from_ast(file(vec![define("m", import("nope"))]))
        .compile()
        .expect_err("unknown module");
    assert!(matches!(err, Error::Compile(_)));
    assert!(err.to_string().contains("module 'nope' not found"), "{err}");

    let err = Script::from_ast(file(vec![define("m", import(""))]))
        .compile()
        .expect_err("empty name");
    assert!(err.to_string().contains("empty module name"), "{err}");
}

// =============================================================================
// Host variables and errors
// =============================================================================

#[test]
fn host_values_are_visible_to_scripts() {
    // total := 0; for _, v in items { total += v }; greeting := name + "!"
    let mut script = Script::from_ast(file(vec![
        define("total", int(0)),
        for_in("_", "v", ident("items"), vec![compound("total", Token::AddAssign, ident("v"))]),
        define("greeting", binary(ident("name"), Token::Add, string("!"))),
    ]));
    script
        .add("items", vec![Object::Int(1), Object::Int(2), Object::Int(3)])
        .add("name", "vvc");
    let program = script.run().expect("runs");
    assert_eq!(program.get("total").as_int(), 6);
    assert_eq!(program.get("greeting").as_string(), "vvc!");
}

#[test]
fn runtime_errors_carry_prefix_and_kind() {
    let err = Script::from_ast(file(vec![define("x", binary(int(1), Token::Add, array(vec![])))]))
        .run()
        .expect_err("bad operands");
    assert!(err.to_string().starts_with("Runtime Error:"), "{err}");
    assert!(matches!(err, Error::Runtime(_)));
}

#[test]
fn allocation_limit_stops_the_run() {
    // a := []; for i := 0; i < 100; i++ { a = a + [i] }
    let mut script = Script::from_ast(file(vec![
        define("a", array(vec![])),
        for_stmt(
            Some(define("i", int(0))),
            Some(binary(ident("i"), Token::Less, int(100))),
            Some(inc("i")),
            vec![assign("a", binary(ident("a"), Token::Add, array(vec![ident("i")])))],
        ),
    ]));
    script.set_max_allocs(10);
    let err = script.run().expect_err("over budget");
    let Error::Runtime(err) = err else {
        panic!("runtime error expected, got {err}");
    };
    assert_eq!(err.kind, ErrorKind::ObjectAllocLimit);

    script.set_max_allocs(-1);
    let program = script.run().expect("unlimited");
    assert_eq!(program.get("a").as_array().len(), 100);
}

#[test]
fn user_function_errors_surface_as_runtime_errors() {
    let mut script = Script::from_ast(file(vec![define("x", call(ident("fail"), vec![]))]));
    script.add(
        "fail",
        UserFunction::object("fail", |_, _| Err(ErrorKind::Custom("host refused".to_string()))),
    );
    let err = script.run().expect_err("host failure");
    assert!(err.to_string().contains("host refused"), "{err}");
}
