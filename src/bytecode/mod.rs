pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod symbol;

pub use compile::{Compiler, CompilerOptions};
pub use compile_error::{CompileError, CompileErrors, MAX_COMPILE_ERRORS};
pub use disasm::disassemble;
pub use ir::Bytecode;
pub use op::Opcode;
pub use symbol::{Symbol, SymbolScope, SymbolTable};
