//! Pair rewrites over dependency edges
//!
//! Each rewrite collapses a producer/consumer pair into one instruction. The
//! old sites are overwritten with NOPs (widths never change in place) and
//! the replacement is inserted immediately after the consumer, so everything
//! before the insertion point keeps its offset.
//!
//! A rewrite fires only when the bytes between the two sites prove it safe:
//! the involved registers are neither read nor written in between, and no
//! instruction in between transfers control (a jump target between the pair
//! would let another path supply the value). Push/pop fusion additionally
//! rejects anything that reads or moves sp, because removing the pair
//! changes every sp-relative address in between.

use crate::bytecode::{reads_from, writes_to, Bytecode, Op, Reg};

/// True for instructions that transfer control or are targets of transfers.
fn transfers_control(op: Op) -> bool {
    matches!(
        op,
        Op::Jmp
            | Op::Jrz
            | Op::Jrnz
            | Op::Lbl
            | Op::Call
            | Op::CallNative
            | Op::CallReg
            | Op::Ret
            | Op::Exit
            | Op::Err
    )
}

/// True for instructions whose meaning depends on sp, or that move it.
fn touches_sp(op: Op) -> bool {
    matches!(
        op,
        Op::MvRegSp
            | Op::Salloc
            | Op::Sdealloc
            | Op::Push8
            | Op::Push16
            | Op::Push32
            | Op::Push64
            | Op::Pop8
            | Op::Pop16
            | Op::Pop32
            | Op::Pop64
    )
}

/// Scan the instructions in `[from, to)` and report whether any violates the
/// given condition.
fn any_between(code: &Bytecode, from: usize, to: usize, mut bad: impl FnMut(&[u8], Op) -> bool) -> bool {
    let bytes = code.as_slice();
    let mut offset = from;
    while offset < to {
        let Some(op) = Op::from_byte(bytes[offset]) else {
            return true; // undecodable bytes: never rewrite across them
        };
        if bad(&bytes[offset..offset + op.size()], op) {
            return true;
        }
        offset += op.size();
    }
    false
}

/// Attempt the rewrite for one `(producer, consumer)` edge. On success the
/// bytecode is already patched; returns the offset of the inserted
/// replacement and its width so the caller can fix the graph up.
pub(super) fn try_rewrite_pair(
    code: &mut Bytecode,
    producer: u64,
    consumer: u64,
) -> Option<(u64, u32)> {
    if producer >= consumer {
        return None;
    }
    let p = producer as usize;
    let c = consumer as usize;
    let p_op = code.op_at(p)?;
    let c_op = code.op_at(c)?;

    match (p_op, c_op) {
        (Op::Push8, Op::Pop8)
        | (Op::Push16, Op::Pop16)
        | (Op::Push32, Op::Pop32)
        | (Op::Push64, Op::Pop64) => fuse_push_pop(code, p, c, p_op.family_width().unwrap()),

        (Op::MvRegI64 | Op::MvRegU64, Op::Mv64RegReg) => fold_literal_move(code, p, c),

        (Op::Mv64RegReg, Op::Mv64LocReg) => fuse_store(code, p, c),

        (Op::MvRegI64 | Op::MvRegU64, Op::Sub) => fold_sub_literal(code, p, c),

        (Op::Mv64RegReg, Op::Add) => forward_add_operand(code, p, c),

        (Op::MvRegI64 | Op::MvRegU64, Op::Lte) => fold_lte_literal(code, p, c),

        _ => None,
    }
}

/// `PUSHn a; …; POPn b` → `MVn b, a` when the value provably survives in
/// `a` and nothing in between cares about sp.
fn fuse_push_pop(code: &mut Bytecode, push: usize, pop: usize, width: u32) -> Option<(u64, u32)> {
    let src = Reg(code.read_u8(push + 1));
    let dst = Reg(code.read_u8(pop + 1));

    let between_start = push + 2;
    if any_between(code, between_start, pop, |bytes, op| {
        transfers_control(op) || touches_sp(op) || writes_to(bytes, dst) || writes_to(bytes, src)
    }) {
        return None;
    }

    let insert_at = pop + 2;
    let mut replacement = Bytecode::new();
    replacement.emit_mv_reg_reg(width, dst, src);
    code.insert_bytes(insert_at, replacement.as_slice());
    code.nop_out(push, 2);
    code.nop_out(pop, 2);
    Some((insert_at as u64, 3))
}

/// `MV_REG_I64 t, k; …; MV64 d, t` → `MV_REG_I64 d, k`.
fn fold_literal_move(code: &mut Bytecode, mv_lit: usize, mv: usize) -> Option<(u64, u32)> {
    let tmp = Reg(code.read_u8(mv_lit + 1));
    if code.read_u8(mv + 2) != tmp.0 {
        return None;
    }
    let dst = Reg(code.read_u8(mv + 1));
    let value = code.read_i64(mv_lit + 2);

    if any_between(code, mv_lit + 10, mv, |bytes, op| {
        transfers_control(op) || reads_from(bytes, tmp) || writes_to(bytes, tmp)
    }) {
        return None;
    }

    let insert_at = mv + 3;
    let mut replacement = Bytecode::new();
    replacement.emit_mv_reg_i64(dst, value);
    code.insert_bytes(insert_at, replacement.as_slice());
    code.nop_out(mv_lit, 10);
    code.nop_out(mv, 3);
    Some((insert_at as u64, 10))
}

/// `MV64 t, s; …; MV64_LOC a, t` → `MV64_LOC a, s`.
fn fuse_store(code: &mut Bytecode, mv: usize, store: usize) -> Option<(u64, u32)> {
    let tmp = Reg(code.read_u8(mv + 1));
    if code.read_u8(store + 2) != tmp.0 {
        return None;
    }
    let src = Reg(code.read_u8(mv + 2));
    let addr = Reg(code.read_u8(store + 1));

    if any_between(code, mv + 3, store, |bytes, op| {
        transfers_control(op)
            || reads_from(bytes, tmp)
            || writes_to(bytes, tmp)
            || writes_to(bytes, src)
    }) {
        return None;
    }

    let insert_at = store + 3;
    let mut replacement = Bytecode::new();
    replacement.emit_mv_loc_reg(8, addr, src);
    code.insert_bytes(insert_at, replacement.as_slice());
    code.nop_out(mv, 3);
    code.nop_out(store, 3);
    Some((insert_at as u64, 3))
}

/// `MV_REG_I64 t, k; …; SUB d, a, t` with `0 ≤ k ≤ 255` → `SUB.I d, a, k`.
fn fold_sub_literal(code: &mut Bytecode, mv_lit: usize, sub: usize) -> Option<(u64, u32)> {
    let tmp = Reg(code.read_u8(mv_lit + 1));
    if code.read_u8(sub + 3) != tmp.0 {
        return None;
    }
    let value = code.read_i64(mv_lit + 2);
    if !(0..=255).contains(&value) {
        return None;
    }
    let dst = Reg(code.read_u8(sub + 1));
    let minuend = Reg(code.read_u8(sub + 2));

    if any_between(code, mv_lit + 10, sub, |bytes, op| {
        transfers_control(op) || reads_from(bytes, tmp) || writes_to(bytes, tmp)
    }) {
        return None;
    }

    let insert_at = sub + 4;
    let mut replacement = Bytecode::new();
    replacement.emit_sub_imm(dst, minuend, value as u8);
    code.insert_bytes(insert_at, replacement.as_slice());
    code.nop_out(mv_lit, 10);
    code.nop_out(sub, 4);
    Some((insert_at as u64, 4))
}

/// `MV64 t, s; …; ADD d, x, y` with `t ∈ {x, y}` → the add reads `s`
/// directly.
fn forward_add_operand(code: &mut Bytecode, mv: usize, add: usize) -> Option<(u64, u32)> {
    let tmp = Reg(code.read_u8(mv + 1));
    let x = code.read_u8(add + 2);
    let y = code.read_u8(add + 3);
    if x != tmp.0 && y != tmp.0 {
        return None;
    }
    let src = Reg(code.read_u8(mv + 2));
    let dst = Reg(code.read_u8(add + 1));

    if any_between(code, mv + 3, add, |bytes, op| {
        transfers_control(op)
            || reads_from(bytes, tmp)
            || writes_to(bytes, tmp)
            || writes_to(bytes, src)
    }) {
        return None;
    }

    let a = if x == tmp.0 { src } else { Reg(x) };
    let b = if y == tmp.0 { src } else { Reg(y) };

    let insert_at = add + 4;
    let mut replacement = Bytecode::new();
    replacement.emit_add(dst, a, b);
    code.insert_bytes(insert_at, replacement.as_slice());
    code.nop_out(mv, 3);
    code.nop_out(add, 4);
    Some((insert_at as u64, 4))
}

/// `MV_REG_I64 t, k; …; LTE d, a, t` with `k` in `i8` → `LTE.I d, a, k`.
fn fold_lte_literal(code: &mut Bytecode, mv_lit: usize, lte: usize) -> Option<(u64, u32)> {
    let tmp = Reg(code.read_u8(mv_lit + 1));
    if code.read_u8(lte + 3) != tmp.0 {
        return None;
    }
    let value = code.read_i64(mv_lit + 2);
    if i8::try_from(value).is_err() {
        return None;
    }
    let dst = Reg(code.read_u8(lte + 1));
    let lhs = Reg(code.read_u8(lte + 2));

    if any_between(code, mv_lit + 10, lte, |bytes, op| {
        transfers_control(op) || reads_from(bytes, tmp) || writes_to(bytes, tmp)
    }) {
        return None;
    }

    let insert_at = lte + 4;
    let mut replacement = Bytecode::new();
    replacement.emit_lte_imm(dst, lhs, value as i8);
    code.insert_bytes(insert_at, replacement.as_slice());
    code.nop_out(mv_lit, 10);
    code.nop_out(lte, 4);
    Some((insert_at as u64, 4))
}
