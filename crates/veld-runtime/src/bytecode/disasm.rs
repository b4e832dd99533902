//! Bytecode disassembler
//!
//! One instruction per line: `offset  mnemonic operands`. Register operands
//! print as `r<n>` (with the reserved four named), immediates as decimal.
//! Used by `Display` impls and golden tests.

use super::{Op, Reg};

fn reg_name(r: u8) -> String {
    match Reg(r) {
        super::RET => "ret".to_string(),
        super::FP => "fp".to_string(),
        super::SP => "sp".to_string(),
        super::IP => "ip".to_string(),
        _ => format!("r{r}"),
    }
}

/// Disassemble a whole chunk.
pub fn disassemble(code: &super::Bytecode) -> String {
    let mut out = String::new();
    let mut offset = 0;
    let bytes = code.as_slice();
    while offset < bytes.len() {
        let Some(op) = Op::from_byte(bytes[offset]) else {
            out.push_str(&format!("{offset:6}  <bad byte {:#04x}>\n", bytes[offset]));
            break;
        };
        if offset + op.size() > bytes.len() {
            out.push_str(&format!("{offset:6}  <truncated {}>\n", op.mnemonic()));
            break;
        }
        out.push_str(&format!("{offset:6}  {}\n", instruction(code, offset, op)));
        offset += op.size();
    }
    out
}

/// Render one instruction (without its offset).
pub fn instruction(code: &super::Bytecode, offset: usize, op: Op) -> String {
    let m = op.mnemonic();
    match op {
        Op::Nop | Op::Exit | Op::Err => m.to_string(),
        Op::Lbl => format!("{m} L{}", code.read_u32(offset + 1)),

        Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Mod
        | Op::Gt
        | Op::Gte
        | Op::Lt
        | Op::Lte
        | Op::Eq
        | Op::Neq
        | Op::And
        | Op::Or => format!(
            "{m} {}, {}, {}",
            reg_name(code.read_u8(offset + 1)),
            reg_name(code.read_u8(offset + 2)),
            reg_name(code.read_u8(offset + 3))
        ),

        Op::AddImm | Op::SubImm | Op::AndImm | Op::XorImm => format!(
            "{m} {}, {}, {}",
            reg_name(code.read_u8(offset + 1)),
            reg_name(code.read_u8(offset + 2)),
            code.read_u8(offset + 3)
        ),
        Op::LteImm => format!(
            "{m} {}, {}, {}",
            reg_name(code.read_u8(offset + 1)),
            reg_name(code.read_u8(offset + 2)),
            code.read_u8(offset + 3) as i8
        ),

        Op::MvRegSp | Op::MvRegIp => format!("{m} {}", reg_name(code.read_u8(offset + 1))),

        Op::MvRegU8 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_u8(offset + 2)
        ),
        Op::MvRegU16 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_u16(offset + 2)
        ),
        Op::MvRegU32 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_u32(offset + 2)
        ),
        Op::MvRegU64 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_u64(offset + 2)
        ),
        Op::MvRegI8 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_u8(offset + 2) as i8
        ),
        Op::MvRegI16 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_u16(offset + 2) as i16
        ),
        Op::MvRegI32 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_i32(offset + 2)
        ),
        Op::MvRegI64 => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_i64(offset + 2)
        ),

        Op::Mv8RegReg
        | Op::Mv16RegReg
        | Op::Mv32RegReg
        | Op::Mv64RegReg
        | Op::Mv8LocReg
        | Op::Mv16LocReg
        | Op::Mv32LocReg
        | Op::Mv64LocReg
        | Op::Mv8RegLoc
        | Op::Mv16RegLoc
        | Op::Mv32RegLoc
        | Op::Mv64RegLoc => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            reg_name(code.read_u8(offset + 2))
        ),

        Op::Push8 | Op::Push16 | Op::Push32 | Op::Push64 | Op::Pop8 | Op::Pop16 | Op::Pop32
        | Op::Pop64 | Op::CallReg => {
            format!("{m} {}", reg_name(code.read_u8(offset + 1)))
        }

        Op::Jmp => format!("{m} {:+}", code.read_i32(offset + 1)),
        Op::Jrnz | Op::Jrz => format!(
            "{m} {}, {:+}",
            reg_name(code.read_u8(offset + 1)),
            code.read_i32(offset + 2)
        ),

        Op::Call => format!("{m} {}", code.read_u64(offset + 1)),
        Op::CallNative => format!("{m} #{}", code.read_u64(offset + 1)),

        Op::Ret => format!("{m} {}", code.read_u8(offset + 1)),
        Op::Salloc => format!(
            "{m} {}, {}",
            reg_name(code.read_u8(offset + 1)),
            code.read_u8(offset + 2)
        ),
        Op::Sdealloc => format!("{m} {}", code.read_u8(offset + 1)),
    }
}
