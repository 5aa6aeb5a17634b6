//! Bytecode encoding: label-indexed instruction lists back to raw code arrays.
//!
//! Layout runs to a fixpoint: every pass computes instruction offsets (switch padding
//! depends on the switch's own offset), then checks every branch displacement. A
//! `goto`/`jsr` whose displacement no longer fits 16 bits is widened to its `_w` form
//! and the layout repeats; widening is monotone, so the loop terminates. A conditional
//! branch that overflows is an error: the rewriter reports the class as failed and
//! leaves it unmodified.

use rustc_hash::FxHashSet;

use crate::{
    classfile::insn::{opcodes::*, Insn, Label},
    Result,
};

/// The encoded form of a method body.
pub struct EncodedCode {
    /// The raw code array.
    pub bytes: Vec<u8>,
    /// Byte offset of every instruction, plus the end offset as the last element.
    /// Index with a [`Label`] to translate labels back to offsets.
    pub offsets: Vec<u32>,
}

impl EncodedCode {
    /// Byte offset of a label.
    #[must_use]
    pub fn offset_of(&self, label: Label) -> u32 {
        self.offsets[label]
    }
}

/// Encode a label-indexed instruction list.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] when a conditional branch displacement
/// overflows 16 bits or the code array exceeds the format limit.
pub fn encode_code(code: &[Insn]) -> Result<EncodedCode> {
    let mut wide: FxHashSet<usize> = FxHashSet::default();

    let offsets = loop {
        let offsets = layout(code, &wide)?;
        let mut widened = false;

        for (index, insn) in code.iter().enumerate() {
            if let Insn::Branch { opcode, target } = insn {
                if wide.contains(&index) {
                    continue;
                }
                let displacement =
                    i64::from(offsets[*target]) - i64::from(offsets[index]);
                if i16::try_from(displacement).is_err() {
                    match *opcode {
                        GOTO | JSR => {
                            wide.insert(index);
                            widened = true;
                        }
                        _ => {
                            return Err(malformed_error!(
                                "conditional branch displacement {} out of range",
                                displacement
                            ))
                        }
                    }
                }
            }
        }

        if !widened {
            break offsets;
        }
    };

    let mut bytes = Vec::with_capacity(*offsets.last().unwrap_or(&0) as usize);
    for (index, insn) in code.iter().enumerate() {
        emit(insn, index, &offsets, wide.contains(&index), &mut bytes);
        debug_assert_eq!(
            bytes.len() as u32,
            offsets[index + 1],
            "layout disagrees with emission at instruction {index}"
        );
    }

    Ok(EncodedCode { bytes, offsets })
}

fn layout(code: &[Insn], wide: &FxHashSet<usize>) -> Result<Vec<u32>> {
    let mut offsets = Vec::with_capacity(code.len() + 1);
    let mut offset: u64 = 0;
    for (index, insn) in code.iter().enumerate() {
        offsets.push(offset as u32);
        offset += u64::from(insn_size(insn, offset, wide.contains(&index)));
        if offset > u64::from(u16::MAX) {
            // The Code attribute limit; rewriting cannot grow a method past it.
            return Err(malformed_error!("method body exceeds 65535 bytes"));
        }
    }
    offsets.push(offset as u32);
    Ok(offsets)
}

fn switch_pad(offset: u64) -> u32 {
    ((4 - ((offset + 1) % 4)) % 4) as u32
}

fn insn_size(insn: &Insn, offset: u64, wide_branch: bool) -> u32 {
    match insn {
        Insn::Simple(_) => 1,
        Insn::Push { opcode, .. } => {
            if *opcode == BIPUSH {
                2
            } else {
                3
            }
        }
        Insn::Ldc(index) => {
            if *index <= u16::from(u8::MAX) {
                2
            } else {
                3
            }
        }
        Insn::Ldc2(_) => 3,
        Insn::Local { index, .. } => {
            if *index <= u16::from(u8::MAX) {
                2
            } else {
                4
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= u16::from(u8::MAX) && i8::try_from(*delta).is_ok() {
                3
            } else {
                6
            }
        }
        Insn::Branch { .. } => {
            if wide_branch {
                5
            } else {
                3
            }
        }
        Insn::TableSwitch { targets, .. } => {
            1 + switch_pad(offset) + 12 + 4 * targets.len() as u32
        }
        Insn::LookupSwitch { pairs, .. } => {
            1 + switch_pad(offset) + 8 + 8 * pairs.len() as u32
        }
        Insn::Field { .. } | Insn::Invoke { .. } | Insn::Type { .. } => 3,
        Insn::InvokeInterface { .. } | Insn::InvokeDynamic { .. } => 5,
        Insn::NewArray(_) => 2,
        Insn::MultiANewArray { .. } => 4,
    }
}

fn emit(insn: &Insn, index: usize, offsets: &[u32], wide_branch: bool, out: &mut Vec<u8>) {
    let offset = offsets[index];
    match insn {
        Insn::Simple(opcode) => out.push(*opcode),
        Insn::Push { opcode, value } => {
            out.push(*opcode);
            if *opcode == BIPUSH {
                out.push(*value as i8 as u8);
            } else {
                out.extend_from_slice(&value.to_be_bytes());
            }
        }
        Insn::Ldc(cp_index) => {
            if *cp_index <= u16::from(u8::MAX) {
                out.push(LDC);
                out.push(*cp_index as u8);
            } else {
                out.push(LDC_W);
                out.extend_from_slice(&cp_index.to_be_bytes());
            }
        }
        Insn::Ldc2(cp_index) => {
            out.push(LDC2_W);
            out.extend_from_slice(&cp_index.to_be_bytes());
        }
        Insn::Local { opcode, index } => {
            if *index <= u16::from(u8::MAX) {
                out.push(*opcode);
                out.push(*index as u8);
            } else {
                out.push(WIDE);
                out.push(*opcode);
                out.extend_from_slice(&index.to_be_bytes());
            }
        }
        Insn::Iinc { index, delta } => {
            if *index <= u16::from(u8::MAX) && i8::try_from(*delta).is_ok() {
                out.push(IINC);
                out.push(*index as u8);
                out.push(*delta as i8 as u8);
            } else {
                out.push(WIDE);
                out.push(IINC);
                out.extend_from_slice(&index.to_be_bytes());
                out.extend_from_slice(&delta.to_be_bytes());
            }
        }
        Insn::Branch { opcode, target } => {
            let displacement = i64::from(offsets[*target]) - i64::from(offset);
            if wide_branch {
                out.push(if *opcode == JSR { JSR_W } else { GOTO_W });
                out.extend_from_slice(&(displacement as i32).to_be_bytes());
            } else {
                out.push(*opcode);
                out.extend_from_slice(&(displacement as i16).to_be_bytes());
            }
        }
        Insn::TableSwitch {
            default,
            low,
            high,
            targets,
        } => {
            out.push(TABLESWITCH);
            for _ in 0..switch_pad(u64::from(offset)) {
                out.push(0);
            }
            emit_switch_target(out, offsets, offset, *default);
            out.extend_from_slice(&low.to_be_bytes());
            out.extend_from_slice(&high.to_be_bytes());
            for target in targets {
                emit_switch_target(out, offsets, offset, *target);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            out.push(LOOKUPSWITCH);
            for _ in 0..switch_pad(u64::from(offset)) {
                out.push(0);
            }
            emit_switch_target(out, offsets, offset, *default);
            out.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
            for (value, target) in pairs {
                out.extend_from_slice(&value.to_be_bytes());
                emit_switch_target(out, offsets, offset, *target);
            }
        }
        Insn::Field { opcode, index } | Insn::Invoke { opcode, index } => {
            out.push(*opcode);
            out.extend_from_slice(&index.to_be_bytes());
        }
        Insn::InvokeInterface { index, count } => {
            out.push(INVOKEINTERFACE);
            out.extend_from_slice(&index.to_be_bytes());
            out.push(*count);
            out.push(0);
        }
        Insn::InvokeDynamic { index } => {
            out.push(INVOKEDYNAMIC);
            out.extend_from_slice(&index.to_be_bytes());
            out.extend_from_slice(&[0, 0]);
        }
        Insn::Type { opcode, index } => {
            out.push(*opcode);
            out.extend_from_slice(&index.to_be_bytes());
        }
        Insn::NewArray(atype) => {
            out.push(NEWARRAY);
            out.push(*atype);
        }
        Insn::MultiANewArray { index, dims } => {
            out.push(MULTIANEWARRAY);
            out.extend_from_slice(&index.to_be_bytes());
            out.push(*dims);
        }
    }
}

fn emit_switch_target(out: &mut Vec<u8>, offsets: &[u32], base: u32, target: Label) {
    let displacement = i64::from(offsets[target]) - i64::from(base);
    out.extend_from_slice(&(displacement as i32).to_be_bytes());
}
