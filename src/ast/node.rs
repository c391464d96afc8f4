use super::pos::Pos;
use super::token::Token;

/// Statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Expression evaluated for its side effects; the result is popped.
    Expr(Expr),

    /// `a := x`, `a = x`, `a += x`, `a[i] = x`.
    Assign(AssignStmt),

    /// `a++` / `a--`.
    IncDec(IncDecStmt),

    Block(BlockStmt),
    If(IfStmt),
    For(ForStmt),
    ForIn(ForInStmt),
    Return(ReturnStmt),

    /// `break` / `continue`.
    Branch(BranchStmt),

    /// `export x`: the value of a source module.
    Export(ExportStmt),

    Empty(Pos),
}

impl Stmt {
    pub fn pos(&self) -> Pos {
        match self {
            Stmt::Expr(e) => e.pos(),
            Stmt::Assign(s) => s.pos,
            Stmt::IncDec(s) => s.pos,
            Stmt::Block(s) => s.pos,
            Stmt::If(s) => s.pos,
            Stmt::For(s) => s.pos,
            Stmt::ForIn(s) => s.pos,
            Stmt::Return(s) => s.pos,
            Stmt::Branch(s) => s.pos,
            Stmt::Export(s) => s.pos,
            Stmt::Empty(pos) => *pos,
        }
    }

    /// Statements after which nothing in the same block can run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stmt::Return(_) | Stmt::Branch(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignStmt {
    pub lhs: Vec<Expr>,
    pub rhs: Vec<Expr>,
    pub token: Token,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncDecStmt {
    pub expr: Expr,
    /// `Token::Inc` or `Token::Dec`.
    pub token: Token,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStmt {
    pub stmts: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub init: Option<Box<Stmt>>,
    pub cond: Expr,
    pub body: BlockStmt,
    /// Either another `if` or a block.
    pub else_branch: Option<Box<Stmt>>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub cond: Option<Expr>,
    pub post: Option<Box<Stmt>>,
    pub body: BlockStmt,
    pub pos: Pos,
}

/// `for key, value in iterable { ... }`. A `_` name skips the binding.
#[derive(Debug, Clone, PartialEq)]
pub struct ForInStmt {
    pub key: Ident,
    pub value: Ident,
    pub iterable: Expr,
    pub body: BlockStmt,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub result: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchStmt {
    /// `Token::Break` or `Token::Continue`.
    pub token: Token,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportStmt {
    pub result: Expr,
    pub pos: Pos,
}

// ───────────────────────────── Expressions ──────────────────────────────

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(Ident),
    Int(i64, Pos),
    Float(f64, Pos),
    Char(char, Pos),
    String(String, Pos),
    Bool(bool, Pos),
    Undefined(Pos),
    Array(ArrayLit),
    Map(MapLit),
    Binary(BinaryExpr),
    Unary(UnaryExpr),

    /// `cond ? a : b`.
    Cond(CondExpr),
    Call(CallExpr),
    Index(IndexExpr),

    /// `x.name`, sugar for `x["name"]`.
    Selector(SelectorExpr),
    Slice(SliceExpr),
    Func(FuncLit),
    Import(ImportExpr),

    /// `error(x)`.
    Error(WrapExpr),

    /// `immutable(x)`.
    Immutable(WrapExpr),
    Paren(WrapExpr),
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Ident(i) => i.pos,
            Expr::Int(_, pos)
            | Expr::Float(_, pos)
            | Expr::Char(_, pos)
            | Expr::String(_, pos)
            | Expr::Bool(_, pos)
            | Expr::Undefined(pos) => *pos,
            Expr::Array(e) => e.pos,
            Expr::Map(e) => e.pos,
            Expr::Binary(e) => e.pos,
            Expr::Unary(e) => e.pos,
            Expr::Cond(e) => e.pos,
            Expr::Call(e) => e.pos,
            Expr::Index(e) => e.pos,
            Expr::Selector(e) => e.pos,
            Expr::Slice(e) => e.pos,
            Expr::Func(e) => e.pos,
            Expr::Import(e) => e.pos,
            Expr::Error(e) | Expr::Immutable(e) | Expr::Paren(e) => e.pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLit {
    pub elements: Vec<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapElement {
    pub key: String,
    pub value: Expr,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapLit {
    pub elements: Vec<MapElement>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub token: Token,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub expr: Box<Expr>,
    pub token: Token,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CondExpr {
    pub cond: Box<Expr>,
    pub if_true: Box<Expr>,
    pub if_false: Box<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    /// Last argument is spread with `...`.
    pub ellipsis: bool,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpr {
    pub expr: Box<Expr>,
    pub index: Box<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorExpr {
    pub expr: Box<Expr>,
    pub sel: String,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SliceExpr {
    pub expr: Box<Expr>,
    pub low: Option<Box<Expr>>,
    pub high: Option<Box<Expr>>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncLit {
    pub params: Vec<Ident>,
    /// The last parameter collects the remaining arguments into an array.
    pub varargs: bool,
    pub body: BlockStmt,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportExpr {
    pub module_name: String,
    pub pos: Pos,
}

/// Single-operand wrapper shared by `error(x)`, `immutable(x)` and `(x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct WrapExpr {
    pub expr: Box<Expr>,
    pub pos: Pos,
}
