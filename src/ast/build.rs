//! Constructors for building syntax trees by hand.
//!
//! Hosts that drive the compiler without a parser (and the test suites)
//! use these instead of spelling out every node. All nodes get
//! `Pos::NONE`; use [`at`] to place a statement.

use super::node::*;
use super::pos::Pos;
use super::token::Token;
use super::File;

pub fn file(stmts: Vec<Stmt>) -> File {
    File::new(stmts)
}

// ───────────────────────────── Expressions ──────────────────────────────

pub fn ident(name: &str) -> Expr {
    Expr::Ident(name_of(name))
}

pub fn name_of(name: &str) -> Ident {
    Ident {
        name: name.to_string(),
        pos: Pos::NONE,
    }
}

pub fn int(value: i64) -> Expr {
    Expr::Int(value, Pos::NONE)
}

pub fn float(value: f64) -> Expr {
    Expr::Float(value, Pos::NONE)
}

pub fn char_lit(value: char) -> Expr {
    Expr::Char(value, Pos::NONE)
}

pub fn string(value: &str) -> Expr {
    Expr::String(value.to_string(), Pos::NONE)
}

pub fn boolean(value: bool) -> Expr {
    Expr::Bool(value, Pos::NONE)
}

pub fn undefined() -> Expr {
    Expr::Undefined(Pos::NONE)
}

pub fn array(elements: Vec<Expr>) -> Expr {
    Expr::Array(ArrayLit {
        elements,
        pos: Pos::NONE,
    })
}

pub fn map(elements: Vec<(&str, Expr)>) -> Expr {
    Expr::Map(MapLit {
        elements: elements
            .into_iter()
            .map(|(key, value)| MapElement {
                key: key.to_string(),
                value,
                pos: Pos::NONE,
            })
            .collect(),
        pos: Pos::NONE,
    })
}

pub fn binary(lhs: Expr, token: Token, rhs: Expr) -> Expr {
    Expr::Binary(BinaryExpr {
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        token,
        pos: Pos::NONE,
    })
}

pub fn unary(token: Token, expr: Expr) -> Expr {
    Expr::Unary(UnaryExpr {
        expr: Box::new(expr),
        token,
        pos: Pos::NONE,
    })
}

pub fn cond(cond: Expr, if_true: Expr, if_false: Expr) -> Expr {
    Expr::Cond(CondExpr {
        cond: Box::new(cond),
        if_true: Box::new(if_true),
        if_false: Box::new(if_false),
        pos: Pos::NONE,
    })
}

pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        func: Box::new(func),
        args,
        ellipsis: false,
        pos: Pos::NONE,
    })
}

/// `func(args...)`: the last argument is spread.
pub fn call_spread(func: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call(CallExpr {
        func: Box::new(func),
        args,
        ellipsis: true,
        pos: Pos::NONE,
    })
}

pub fn index(expr: Expr, idx: Expr) -> Expr {
    Expr::Index(IndexExpr {
        expr: Box::new(expr),
        index: Box::new(idx),
        pos: Pos::NONE,
    })
}

pub fn selector(expr: Expr, sel: &str) -> Expr {
    Expr::Selector(SelectorExpr {
        expr: Box::new(expr),
        sel: sel.to_string(),
        pos: Pos::NONE,
    })
}

pub fn slice(expr: Expr, low: Option<Expr>, high: Option<Expr>) -> Expr {
    Expr::Slice(SliceExpr {
        expr: Box::new(expr),
        low: low.map(Box::new),
        high: high.map(Box::new),
        pos: Pos::NONE,
    })
}

pub fn func(params: &[&str], body: Vec<Stmt>) -> Expr {
    func_lit(params, false, body)
}

/// A function whose last parameter collects the remaining arguments.
pub fn func_variadic(params: &[&str], body: Vec<Stmt>) -> Expr {
    func_lit(params, true, body)
}

fn func_lit(params: &[&str], varargs: bool, body: Vec<Stmt>) -> Expr {
    Expr::Func(FuncLit {
        params: params.iter().map(|p| name_of(p)).collect(),
        varargs,
        body: block_of(body),
        pos: Pos::NONE,
    })
}

pub fn import(module_name: &str) -> Expr {
    Expr::Import(ImportExpr {
        module_name: module_name.to_string(),
        pos: Pos::NONE,
    })
}

pub fn error(expr: Expr) -> Expr {
    Expr::Error(wrap(expr))
}

pub fn immutable(expr: Expr) -> Expr {
    Expr::Immutable(wrap(expr))
}

pub fn paren(expr: Expr) -> Expr {
    Expr::Paren(wrap(expr))
}

fn wrap(expr: Expr) -> WrapExpr {
    WrapExpr {
        expr: Box::new(expr),
        pos: Pos::NONE,
    }
}

// ───────────────────────────── Statements ───────────────────────────────

pub fn expr(expr: Expr) -> Stmt {
    Stmt::Expr(expr)
}

/// `name := value`
pub fn define(name: &str, value: Expr) -> Stmt {
    assign_with(vec![ident(name)], vec![value], Token::Define)
}

/// `name = value`
pub fn assign(name: &str, value: Expr) -> Stmt {
    assign_with(vec![ident(name)], vec![value], Token::Assign)
}

/// `name op= value`
pub fn compound(name: &str, token: Token, value: Expr) -> Stmt {
    assign_with(vec![ident(name)], vec![value], token)
}

pub fn assign_with(lhs: Vec<Expr>, rhs: Vec<Expr>, token: Token) -> Stmt {
    Stmt::Assign(AssignStmt {
        lhs,
        rhs,
        token,
        pos: Pos::NONE,
    })
}

pub fn inc(name: &str) -> Stmt {
    Stmt::IncDec(IncDecStmt {
        expr: ident(name),
        token: Token::Inc,
        pos: Pos::NONE,
    })
}

pub fn dec(name: &str) -> Stmt {
    Stmt::IncDec(IncDecStmt {
        expr: ident(name),
        token: Token::Dec,
        pos: Pos::NONE,
    })
}

pub fn block(stmts: Vec<Stmt>) -> Stmt {
    Stmt::Block(block_of(stmts))
}

fn block_of(stmts: Vec<Stmt>) -> BlockStmt {
    BlockStmt {
        stmts,
        pos: Pos::NONE,
    }
}

pub fn if_stmt(cond: Expr, body: Vec<Stmt>, else_branch: Option<Stmt>) -> Stmt {
    Stmt::If(IfStmt {
        init: None,
        cond,
        body: block_of(body),
        else_branch: else_branch.map(Box::new),
        pos: Pos::NONE,
    })
}

pub fn for_stmt(init: Option<Stmt>, cond: Option<Expr>, post: Option<Stmt>, body: Vec<Stmt>) -> Stmt {
    Stmt::For(ForStmt {
        init: init.map(Box::new),
        cond,
        post: post.map(Box::new),
        body: block_of(body),
        pos: Pos::NONE,
    })
}

/// `for key, value in iterable { body }`; pass `"_"` to skip a binding.
pub fn for_in(key: &str, value: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    Stmt::ForIn(ForInStmt {
        key: name_of(key),
        value: name_of(value),
        iterable,
        body: block_of(body),
        pos: Pos::NONE,
    })
}

pub fn ret(result: Expr) -> Stmt {
    Stmt::Return(ReturnStmt {
        result: Some(result),
        pos: Pos::NONE,
    })
}

pub fn ret_none() -> Stmt {
    Stmt::Return(ReturnStmt {
        result: None,
        pos: Pos::NONE,
    })
}

pub fn brk() -> Stmt {
    Stmt::Branch(BranchStmt {
        token: Token::Break,
        pos: Pos::NONE,
    })
}

pub fn cont() -> Stmt {
    Stmt::Branch(BranchStmt {
        token: Token::Continue,
        pos: Pos::NONE,
    })
}

pub fn export(result: Expr) -> Stmt {
    Stmt::Export(ExportStmt {
        result,
        pos: Pos::NONE,
    })
}

/// Place a statement (and, for expression statements, its expression) at
/// `pos`, so errors raised on it carry a source location.
pub fn at(pos: Pos, stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Expr(e) => Stmt::Expr(expr_at(pos, e)),
        Stmt::Assign(mut s) => {
            s.pos = pos;
            Stmt::Assign(s)
        }
        Stmt::IncDec(mut s) => {
            s.pos = pos;
            Stmt::IncDec(s)
        }
        Stmt::Block(mut s) => {
            s.pos = pos;
            Stmt::Block(s)
        }
        Stmt::If(mut s) => {
            s.pos = pos;
            Stmt::If(s)
        }
        Stmt::For(mut s) => {
            s.pos = pos;
            Stmt::For(s)
        }
        Stmt::ForIn(mut s) => {
            s.pos = pos;
            Stmt::ForIn(s)
        }
        Stmt::Return(mut s) => {
            s.pos = pos;
            Stmt::Return(s)
        }
        Stmt::Branch(mut s) => {
            s.pos = pos;
            Stmt::Branch(s)
        }
        Stmt::Export(mut s) => {
            s.pos = pos;
            Stmt::Export(s)
        }
        Stmt::Empty(_) => Stmt::Empty(pos),
    }
}

/// Place an expression node at `pos` (children keep their positions).
pub fn expr_at(pos: Pos, expr: Expr) -> Expr {
    match expr {
        Expr::Ident(mut i) => {
            i.pos = pos;
            Expr::Ident(i)
        }
        Expr::Int(v, _) => Expr::Int(v, pos),
        Expr::Float(v, _) => Expr::Float(v, pos),
        Expr::Char(v, _) => Expr::Char(v, pos),
        Expr::String(v, _) => Expr::String(v, pos),
        Expr::Bool(v, _) => Expr::Bool(v, pos),
        Expr::Undefined(_) => Expr::Undefined(pos),
        Expr::Array(mut e) => {
            e.pos = pos;
            Expr::Array(e)
        }
        Expr::Map(mut e) => {
            e.pos = pos;
            Expr::Map(e)
        }
        Expr::Binary(mut e) => {
            e.pos = pos;
            Expr::Binary(e)
        }
        Expr::Unary(mut e) => {
            e.pos = pos;
            Expr::Unary(e)
        }
        Expr::Cond(mut e) => {
            e.pos = pos;
            Expr::Cond(e)
        }
        Expr::Call(mut e) => {
            e.pos = pos;
            Expr::Call(e)
        }
        Expr::Index(mut e) => {
            e.pos = pos;
            Expr::Index(e)
        }
        Expr::Selector(mut e) => {
            e.pos = pos;
            Expr::Selector(e)
        }
        Expr::Slice(mut e) => {
            e.pos = pos;
            Expr::Slice(e)
        }
        Expr::Func(mut e) => {
            e.pos = pos;
            Expr::Func(e)
        }
        Expr::Import(mut e) => {
            e.pos = pos;
            Expr::Import(e)
        }
        Expr::Error(mut e) => {
            e.pos = pos;
            Expr::Error(e)
        }
        Expr::Immutable(mut e) => {
            e.pos = pos;
            Expr::Immutable(e)
        }
        Expr::Paren(mut e) => {
            e.pos = pos;
            Expr::Paren(e)
        }
    }
}
