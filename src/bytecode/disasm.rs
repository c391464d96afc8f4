use std::fmt::Write as _;

use super::Bytecode;
use super::op::{Opcode, read_operands};
use crate::ast::Token;
use crate::lang::Object;

/// One line per instruction: `offset NAME operands...`, offsets shifted by
/// `pos_offset`. Decoding stops at the first invalid or truncated
/// instruction.
pub fn format_instructions(ins: &[u8], pos_offset: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < ins.len() {
        let Some((op, operands)) = decode_at(ins, ip) else {
            out.push(format!("{:04} <invalid {:#04x}>", pos_offset + ip, ins[ip]));
            break;
        };
        let mut line = format!("{:04} {:<13}", pos_offset + ip, op.name());
        for operand in &operands {
            let _ = write!(line, " {:<5}", operand);
        }
        out.push(line.trim_end().to_string());
        ip += op.width();
    }
    out
}

fn decode_at(ins: &[u8], ip: usize) -> Option<(Opcode, Vec<usize>)> {
    let op = Opcode::from_u8(ins[ip])?;
    let operands = read_operands(op, &ins[ip..])?;
    Some((op, operands))
}

impl Bytecode {
    /// Disassembly of the entry function.
    pub fn format_instructions(&self) -> Vec<String> {
        format_instructions(&self.main_function.instructions, 0)
    }

    /// One line per constant; compiled functions are followed by their
    /// indented disassembly.
    pub fn format_constants(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (idx, constant) in self.constants.iter().enumerate() {
            match constant {
                Object::CompiledFunction(f) => {
                    out.push(format!("[{:3}] (compiled-function)", idx));
                    for line in format_instructions(&f.instructions, 0) {
                        out.push(format!("     {}", line));
                    }
                }
                other => out.push(format!("[{:3}] {} ({})", idx, other, other.type_name())),
            }
        }
        out
    }
}

// =============================================================================
// Annotated listing
// =============================================================================

/// Full listing of a compiled unit: the entry function, then every
/// function constant, with jump targets marked and constant operands
/// resolved.
pub fn disassemble(bc: &Bytecode) -> String {
    let mut out = String::new();
    code_block(&mut out, "main", &bc.main_function.instructions, bc);
    for (idx, constant) in bc.constants.iter().enumerate() {
        if let Object::CompiledFunction(f) = constant {
            let label = format!(
                "const[{}] fn/{}{} locals={}",
                idx,
                f.num_parameters,
                if f.varargs { "..." } else { "" },
                f.num_locals
            );
            code_block(&mut out, &label, &f.instructions, bc);
        }
    }
    out
}

fn code_block(out: &mut String, label: &str, ins: &[u8], bc: &Bytecode) {
    let targets = jump_targets(ins);
    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(out, " {}", label);
    let _ = writeln!(out, " {} bytes", ins.len());
    let _ = writeln!(out, "════════════════════════════════════════");

    let mut ip = 0;
    while ip < ins.len() {
        let Some((op, operands)) = decode_at(ins, ip) else {
            let _ = writeln!(out, "{:04}   <invalid>", ip);
            break;
        };
        let marker = if targets.contains(&ip) { "► " } else { "  " };
        let _ = writeln!(out, "{:04} {}{:<13}{}", ip, marker, op.name(), annotate(op, &operands, bc));
        ip += op.width();
    }
    let _ = writeln!(out);
}

fn annotate(op: Opcode, operands: &[usize], bc: &Bytecode) -> String {
    match (op, operands) {
        (Opcode::Const, [idx]) => match bc.constants.get(*idx) {
            Some(Object::CompiledFunction(_)) => format!(" {:<5} ; <fn const[{}]>", idx, idx),
            Some(c) => format!(" {:<5} ; {}", idx, c),
            None => format!(" {:<5} ; <missing>", idx),
        },
        (Opcode::BinaryOp, [tok]) => {
            let name = Token::from_u8(*tok as u8).map_or("?", Token::as_str);
            format!(" {:<5} ; {}", tok, name)
        }
        (op, [target]) if op.is_jump() => format!(" → {:04}", target),
        _ => operands.iter().map(|o| format!(" {:<5}", o)).collect::<String>().trim_end().to_string(),
    }
}

fn jump_targets(ins: &[u8]) -> Vec<usize> {
    let mut targets = Vec::new();
    let mut ip = 0;
    while ip < ins.len() {
        let Some((op, operands)) = decode_at(ins, ip) else {
            break;
        };
        if op.is_jump() && !targets.contains(&operands[0]) {
            targets.push(operands[0]);
        }
        ip += op.width();
    }
    targets
}
