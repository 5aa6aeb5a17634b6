//! Bytecode decoding: raw code arrays to label-indexed instruction lists.
//!
//! Decoding runs in two passes: a linear scan that records every instruction and its
//! byte offset (branch targets still as absolute byte offsets), then a remap of all
//! targets to instruction indexes. A branch into the middle of an instruction is
//! reported as malformed.

use rustc_hash::FxHashMap;

use crate::{
    classfile::insn::{opcodes::*, Insn, Label},
    file::Parser,
    Result,
};

/// A decoded method body with the byte-offset map needed to translate exception
/// tables and line number tables into labels.
pub struct DecodedCode {
    /// The instructions, branch targets as instruction indexes.
    pub insns: Vec<Insn>,
    offset_to_index: FxHashMap<usize, usize>,
    length: usize,
}

impl DecodedCode {
    /// Translate a byte offset into a label.
    ///
    /// An offset equal to the code length maps to the end label (`insns.len()`),
    /// which exception ranges use for "to the end of the body".
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the offset is not an instruction
    /// boundary.
    pub fn label_at(&self, offset: usize) -> Result<Label> {
        if offset == self.length {
            return Ok(self.insns.len());
        }
        self.offset_to_index
            .get(&offset)
            .copied()
            .ok_or_else(|| malformed_error!("offset {} is not an instruction boundary", offset))
    }

    /// Like [`DecodedCode::label_at`], but `None` on a non-boundary offset.
    /// Used for best-effort debug tables.
    #[must_use]
    pub fn label_at_opt(&self, offset: usize) -> Option<Label> {
        if offset == self.length {
            return Some(self.insns.len());
        }
        self.offset_to_index.get(&offset).copied()
    }
}

/// Decode a raw code array into a label-indexed instruction list.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on unknown opcodes, truncated operands or
/// branches into the middle of an instruction.
pub fn decode_code(bytes: &[u8]) -> Result<DecodedCode> {
    let mut parser = Parser::new(bytes);
    let mut insns = Vec::new();
    let mut offsets = Vec::new();

    while parser.has_more_data() {
        let offset = parser.pos();
        offsets.push(offset);
        insns.push(decode_insn(&mut parser, offset)?);
    }

    let mut offset_to_index = FxHashMap::default();
    for (index, offset) in offsets.iter().enumerate() {
        offset_to_index.insert(*offset, index);
    }

    let decoded = DecodedCode {
        insns,
        offset_to_index,
        length: bytes.len(),
    };

    // Second pass: byte-offset targets to instruction indexes.
    let mut remapped = Vec::with_capacity(decoded.insns.len());
    for insn in &decoded.insns {
        let mut insn = insn.clone();
        let mut bad_target = None;
        insn.remap_labels(|offset| match decoded.label_at_opt(offset) {
            Some(label) => label,
            None => {
                bad_target = Some(offset);
                0
            }
        });
        if let Some(offset) = bad_target {
            return Err(malformed_error!(
                "branch target {} is not an instruction boundary",
                offset
            ));
        }
        remapped.push(insn);
    }

    Ok(DecodedCode {
        insns: remapped,
        offset_to_index: decoded.offset_to_index,
        length: decoded.length,
    })
}

fn branch_target(base: usize, displacement: i32) -> Result<usize> {
    let target = base as i64 + i64::from(displacement);
    usize::try_from(target).map_err(|_| malformed_error!("negative branch target"))
}

fn decode_insn(parser: &mut Parser<'_>, offset: usize) -> Result<Insn> {
    let opcode = parser.read_be::<u8>()?;
    let insn = match opcode {
        BIPUSH => Insn::Push {
            opcode,
            value: i16::from(parser.read_be::<i8>()?),
        },
        SIPUSH => Insn::Push {
            opcode,
            value: parser.read_be::<i16>()?,
        },
        LDC => Insn::Ldc(u16::from(parser.read_be::<u8>()?)),
        LDC_W => Insn::Ldc(parser.read_be::<u16>()?),
        LDC2_W => Insn::Ldc2(parser.read_be::<u16>()?),
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Local {
            opcode,
            index: u16::from(parser.read_be::<u8>()?),
        },
        IINC => Insn::Iinc {
            index: u16::from(parser.read_be::<u8>()?),
            delta: i16::from(parser.read_be::<i8>()?),
        },
        IFEQ..=JSR | IFNULL | IFNONNULL => Insn::Branch {
            opcode,
            target: branch_target(offset, i32::from(parser.read_be::<i16>()?))?,
        },
        GOTO_W | JSR_W => Insn::Branch {
            opcode: if opcode == GOTO_W { GOTO } else { JSR },
            target: branch_target(offset, parser.read_be::<i32>()?)?,
        },
        TABLESWITCH => {
            skip_switch_padding(parser)?;
            let default = branch_target(offset, parser.read_be::<i32>()?)?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            if high < low {
                return Err(malformed_error!("tableswitch high {} < low {}", high, low));
            }
            let count = (i64::from(high) - i64::from(low) + 1) as usize;
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(branch_target(offset, parser.read_be::<i32>()?)?);
            }
            Insn::TableSwitch {
                default,
                low,
                high,
                targets,
            }
        }
        LOOKUPSWITCH => {
            skip_switch_padding(parser)?;
            let default = branch_target(offset, parser.read_be::<i32>()?)?;
            let count = parser.read_be::<i32>()?;
            if count < 0 {
                return Err(malformed_error!("negative lookupswitch pair count"));
            }
            let mut pairs = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let value = parser.read_be::<i32>()?;
                pairs.push((value, branch_target(offset, parser.read_be::<i32>()?)?));
            }
            Insn::LookupSwitch { default, pairs }
        }
        GETSTATIC..=PUTFIELD => Insn::Field {
            opcode,
            index: parser.read_be::<u16>()?,
        },
        INVOKEVIRTUAL..=INVOKESTATIC => Insn::Invoke {
            opcode,
            index: parser.read_be::<u16>()?,
        },
        INVOKEINTERFACE => {
            let index = parser.read_be::<u16>()?;
            let count = parser.read_be::<u8>()?;
            parser.read_be::<u8>()?; // reserved zero byte
            Insn::InvokeInterface { index, count }
        }
        INVOKEDYNAMIC => {
            let index = parser.read_be::<u16>()?;
            parser.read_be::<u16>()?; // reserved zero bytes
            Insn::InvokeDynamic { index }
        }
        NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => Insn::Type {
            opcode,
            index: parser.read_be::<u16>()?,
        },
        NEWARRAY => Insn::NewArray(parser.read_be::<u8>()?),
        MULTIANEWARRAY => Insn::MultiANewArray {
            index: parser.read_be::<u16>()?,
            dims: parser.read_be::<u8>()?,
        },
        WIDE => {
            let wide_opcode = parser.read_be::<u8>()?;
            match wide_opcode {
                ILOAD..=ALOAD | ISTORE..=ASTORE | RET => Insn::Local {
                    opcode: wide_opcode,
                    index: parser.read_be::<u16>()?,
                },
                IINC => Insn::Iinc {
                    index: parser.read_be::<u16>()?,
                    delta: parser.read_be::<i16>()?,
                },
                other => {
                    return Err(malformed_error!("invalid wide opcode {:#04x}", other));
                }
            }
        }
        // Everything else is a single-byte instruction: constants, array element
        // access, stack shuffles, arithmetic, conversions, returns, athrow,
        // monitorenter/exit.
        _ => Insn::Simple(opcode),
    };
    Ok(insn)
}

fn skip_switch_padding(parser: &mut Parser<'_>) -> Result<()> {
    while parser.pos() % 4 != 0 {
        parser.advance_by(1)?;
    }
    Ok(())
}
