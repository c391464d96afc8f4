use serde::{Deserialize, Serialize};

/// Operator and keyword tokens that survive parsing into the AST.
///
/// The discriminant doubles as the operand byte of `BINARYOP`, so the
/// numbering is part of the bytecode format and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Token {
    // ───────────────────────────── Arithmetic ───────────────────────────
    Add = 0,
    Sub = 1,
    Mul = 2,
    Quo = 3,
    Rem = 4,

    // ────────────────────────────── Bitwise ─────────────────────────────
    And = 5,
    Or = 6,
    Xor = 7,
    Shl = 8,
    Shr = 9,
    AndNot = 10,

    // ────────────────────────────── Logical ─────────────────────────────
    LAnd = 11,
    LOr = 12,
    Not = 13,

    // ───────────────────────────── Comparison ───────────────────────────
    Equal = 14,
    NotEqual = 15,
    Less = 16,
    Greater = 17,
    LessEq = 18,
    GreaterEq = 19,

    // ───────────────────────────── Assignment ───────────────────────────
    Assign = 20,
    Define = 21,
    AddAssign = 22,
    SubAssign = 23,
    MulAssign = 24,
    QuoAssign = 25,
    RemAssign = 26,
    AndAssign = 27,
    OrAssign = 28,
    XorAssign = 29,
    ShlAssign = 30,
    ShrAssign = 31,
    AndNotAssign = 32,
    Inc = 33,
    Dec = 34,

    // ───────────────────────────── Branching ────────────────────────────
    Break = 35,
    Continue = 36,
}

const ALL: [Token; 37] = [
    Token::Add,
    Token::Sub,
    Token::Mul,
    Token::Quo,
    Token::Rem,
    Token::And,
    Token::Or,
    Token::Xor,
    Token::Shl,
    Token::Shr,
    Token::AndNot,
    Token::LAnd,
    Token::LOr,
    Token::Not,
    Token::Equal,
    Token::NotEqual,
    Token::Less,
    Token::Greater,
    Token::LessEq,
    Token::GreaterEq,
    Token::Assign,
    Token::Define,
    Token::AddAssign,
    Token::SubAssign,
    Token::MulAssign,
    Token::QuoAssign,
    Token::RemAssign,
    Token::AndAssign,
    Token::OrAssign,
    Token::XorAssign,
    Token::ShlAssign,
    Token::ShrAssign,
    Token::AndNotAssign,
    Token::Inc,
    Token::Dec,
    Token::Break,
    Token::Continue,
];

impl Token {
    /// Decode an operator byte read back from an instruction stream.
    pub fn from_u8(byte: u8) -> Option<Token> {
        ALL.get(byte as usize).copied()
    }

    /// Surface spelling, used in error messages and disassembly.
    pub fn as_str(self) -> &'static str {
        match self {
            Token::Add => "+",
            Token::Sub => "-",
            Token::Mul => "*",
            Token::Quo => "/",
            Token::Rem => "%",
            Token::And => "&",
            Token::Or => "|",
            Token::Xor => "^",
            Token::Shl => "<<",
            Token::Shr => ">>",
            Token::AndNot => "&^",
            Token::LAnd => "&&",
            Token::LOr => "||",
            Token::Not => "!",
            Token::Equal => "==",
            Token::NotEqual => "!=",
            Token::Less => "<",
            Token::Greater => ">",
            Token::LessEq => "<=",
            Token::GreaterEq => ">=",
            Token::Assign => "=",
            Token::Define => ":=",
            Token::AddAssign => "+=",
            Token::SubAssign => "-=",
            Token::MulAssign => "*=",
            Token::QuoAssign => "/=",
            Token::RemAssign => "%=",
            Token::AndAssign => "&=",
            Token::OrAssign => "|=",
            Token::XorAssign => "^=",
            Token::ShlAssign => "<<=",
            Token::ShrAssign => ">>=",
            Token::AndNotAssign => "&^=",
            Token::Inc => "++",
            Token::Dec => "--",
            Token::Break => "break",
            Token::Continue => "continue",
        }
    }

    /// The binary operator a compound assignment applies (`+=` -> `+`).
    pub fn compound_operator(self) -> Option<Token> {
        Some(match self {
            Token::AddAssign => Token::Add,
            Token::SubAssign => Token::Sub,
            Token::MulAssign => Token::Mul,
            Token::QuoAssign => Token::Quo,
            Token::RemAssign => Token::Rem,
            Token::AndAssign => Token::And,
            Token::OrAssign => Token::Or,
            Token::XorAssign => Token::Xor,
            Token::ShlAssign => Token::Shl,
            Token::ShrAssign => Token::Shr,
            Token::AndNotAssign => Token::AndNot,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
