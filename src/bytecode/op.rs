// =============================================================================
// OPCODE - instruction set
// =============================================================================

/// One-byte opcodes. Operands follow the opcode big-endian, with the widths
/// given by [`Opcode::operand_widths`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ─── Constants and literals ───
    /// Push constant `[pool index: 2]`.
    Const = 0,
    Pop = 1,
    True = 2,
    False = 3,
    /// Push `undefined`.
    Null = 4,

    // ─── Operators ───
    Equal = 5,
    NotEqual = 6,
    Minus = 7,
    LNot = 8,
    BComplement = 9,
    /// `[operator token: 1]`
    BinaryOp = 10,

    // ─── Jumps (absolute target: 2) ───
    Jump = 11,
    /// Pop; jump if falsy.
    JumpFalsy = 12,
    /// Jump keeping the top if it is falsy, else pop and fall through.
    AndJump = 13,
    /// Jump keeping the top if it is truthy, else pop and fall through.
    OrJump = 14,

    // ─── Composite values ───
    /// `[element count: 2]`
    Array = 15,
    /// `[key + value count: 2]`
    Map = 16,
    Error = 17,
    Immutable = 18,
    Index = 19,
    SetIndex = 20,
    SliceIndex = 21,

    // ─── Calls ───
    /// `[arg count: 1][spread flag: 1]`
    Call = 22,
    /// `[has value: 1]`
    Return = 23,
    /// `[pool index: 2][free count: 1]`
    Closure = 24,

    // ─── Variables ───
    GetGlobal = 25,
    SetGlobal = 26,
    GetLocal = 27,
    SetLocal = 28,
    DefineLocal = 29,
    GetFree = 30,
    SetFree = 31,
    GetLocalPtr = 32,
    GetFreePtr = 33,
    GetBuiltin = 34,

    // ─── Iteration ───
    IteratorInit = 35,
    IteratorNext = 36,
    IteratorKey = 37,
    IteratorValue = 38,

    /// End of the top-level program.
    Suspend = 39,
}

const ALL: [Opcode; 40] = [
    Opcode::Const,
    Opcode::Pop,
    Opcode::True,
    Opcode::False,
    Opcode::Null,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::Minus,
    Opcode::LNot,
    Opcode::BComplement,
    Opcode::BinaryOp,
    Opcode::Jump,
    Opcode::JumpFalsy,
    Opcode::AndJump,
    Opcode::OrJump,
    Opcode::Array,
    Opcode::Map,
    Opcode::Error,
    Opcode::Immutable,
    Opcode::Index,
    Opcode::SetIndex,
    Opcode::SliceIndex,
    Opcode::Call,
    Opcode::Return,
    Opcode::Closure,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::DefineLocal,
    Opcode::GetFree,
    Opcode::SetFree,
    Opcode::GetLocalPtr,
    Opcode::GetFreePtr,
    Opcode::GetBuiltin,
    Opcode::IteratorInit,
    Opcode::IteratorNext,
    Opcode::IteratorKey,
    Opcode::IteratorValue,
    Opcode::Suspend,
];

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Opcode> {
        ALL.get(b as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Const => "CONST",
            Opcode::Pop => "POP",
            Opcode::True => "TRUE",
            Opcode::False => "FALSE",
            Opcode::Null => "NULL",
            Opcode::Equal => "EQUAL",
            Opcode::NotEqual => "NOTEQUAL",
            Opcode::Minus => "MINUS",
            Opcode::LNot => "LNOT",
            Opcode::BComplement => "BCOMPLEMENT",
            Opcode::BinaryOp => "BINARYOP",
            Opcode::Jump => "JUMP",
            Opcode::JumpFalsy => "JUMPFALSY",
            Opcode::AndJump => "ANDJUMP",
            Opcode::OrJump => "ORJUMP",
            Opcode::Array => "ARRAY",
            Opcode::Map => "MAP",
            Opcode::Error => "ERROR",
            Opcode::Immutable => "IMMUTABLE",
            Opcode::Index => "INDEX",
            Opcode::SetIndex => "SETINDEX",
            Opcode::SliceIndex => "SLICEINDEX",
            Opcode::Call => "CALL",
            Opcode::Return => "RETURN",
            Opcode::Closure => "CLOSURE",
            Opcode::GetGlobal => "GETGLOBAL",
            Opcode::SetGlobal => "SETGLOBAL",
            Opcode::GetLocal => "GETLOCAL",
            Opcode::SetLocal => "SETLOCAL",
            Opcode::DefineLocal => "DEFINELOCAL",
            Opcode::GetFree => "GETFREE",
            Opcode::SetFree => "SETFREE",
            Opcode::GetLocalPtr => "GETLOCALPTR",
            Opcode::GetFreePtr => "GETFREEPTR",
            Opcode::GetBuiltin => "GETBUILTIN",
            Opcode::IteratorInit => "ITERATORINIT",
            Opcode::IteratorNext => "ITERATORNEXT",
            Opcode::IteratorKey => "ITERATORKEY",
            Opcode::IteratorValue => "ITERATORVALUE",
            Opcode::Suspend => "SUSPEND",
        }
    }

    /// Byte width of each operand.
    pub fn operand_widths(self) -> &'static [usize] {
        match self {
            Opcode::Const
            | Opcode::Jump
            | Opcode::JumpFalsy
            | Opcode::AndJump
            | Opcode::OrJump
            | Opcode::Array
            | Opcode::Map
            | Opcode::GetGlobal
            | Opcode::SetGlobal => &[2],
            Opcode::BinaryOp
            | Opcode::Return
            | Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::DefineLocal
            | Opcode::GetFree
            | Opcode::SetFree
            | Opcode::GetLocalPtr
            | Opcode::GetFreePtr
            | Opcode::GetBuiltin => &[1],
            Opcode::Call => &[1, 1],
            Opcode::Closure => &[2, 1],
            _ => &[],
        }
    }

    /// Total encoded size: opcode byte plus operands.
    pub fn width(self) -> usize {
        1 + self.operand_widths().iter().sum::<usize>()
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::JumpFalsy | Opcode::AndJump | Opcode::OrJump
        )
    }
}

/// Locals a function can address through one-byte operands.
pub const MAX_LOCALS: usize = u8::MAX as usize + 1;

/// Whether `value` fits an operand of `width` bytes.
pub fn operand_fits(width: usize, value: usize) -> bool {
    match width {
        1 => value <= u8::MAX as usize,
        2 => value <= u16::MAX as usize,
        _ => false,
    }
}

/// Encode one instruction. Operands wider than their slot are truncated;
/// callers check with [`operand_fits`] first.
pub fn make_instruction(op: Opcode, operands: &[usize]) -> Vec<u8> {
    let mut out = Vec::with_capacity(op.width());
    out.push(op as u8);
    for (width, value) in op.operand_widths().iter().zip(operands) {
        match width {
            1 => out.push(*value as u8),
            2 => out.extend_from_slice(&(*value as u16).to_be_bytes()),
            _ => {}
        }
    }
    out
}

/// Decode the operands of the instruction whose opcode byte is at
/// `ins[0]`. Returns `None` if the stream is truncated.
pub fn read_operands(op: Opcode, ins: &[u8]) -> Option<Vec<usize>> {
    let mut offset = 1;
    let mut operands = Vec::with_capacity(op.operand_widths().len());
    for width in op.operand_widths() {
        let value = match width {
            1 => *ins.get(offset)? as usize,
            2 => u16::from_be_bytes([*ins.get(offset)?, *ins.get(offset + 1)?]) as usize,
            _ => 0,
        };
        operands.push(value);
        offset += width;
    }
    Some(operands)
}

#[inline]
pub fn read_u16(ins: &[u8], at: usize) -> usize {
    ((ins[at] as usize) << 8) | ins[at + 1] as usize
}

#[inline]
pub fn read_u8(ins: &[u8], at: usize) -> usize {
    ins[at] as usize
}
