//! The field-owner rewrite: capture every write to a tracked field.
//!
//! Immediately before each `putfield`/`putstatic` whose `(name, descriptor)` is
//! tracked, the value about to be stored and the owning object (null for statics) are
//! duplicated onto the stack and handed to the bridge's `captureFieldModification`.
//! Tracked fields hold container references, so the stored value is always a single
//! stack slot.

use crate::{
    classfile::{
        code::{CodeAttribute, CodePatch},
        insn::{opcodes::*, Insn},
        pool::ConstantPool,
    },
    rewrite::{bridge, RewriteRoles},
    Result,
};

/// Worst-case extra operand stack depth of one inserted capture sequence.
const STACK_MARGIN: u16 = 5;

/// Instrument tracked field writes. Returns true if anything changed.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on dangling constant pool references.
pub fn instrument_field_writes(
    code: &mut CodeAttribute,
    pool: &mut ConstantPool,
    roles: &RewriteRoles,
) -> Result<bool> {
    struct Site {
        at: usize,
        is_static: bool,
        owner: String,
        field_name: String,
    }

    let mut sites = Vec::new();
    for (at, insn) in code.code.iter().enumerate() {
        if let Insn::Field { opcode, index } = insn {
            if *opcode != PUTFIELD && *opcode != PUTSTATIC {
                continue;
            }
            let (owner, name, descriptor) = pool.member_ref(*index)?;
            if roles.should_rewrite_write(name, descriptor) {
                sites.push(Site {
                    at,
                    is_static: *opcode == PUTSTATIC,
                    owner: owner.to_string(),
                    field_name: name.to_string(),
                });
            }
        }
    }

    if sites.is_empty() {
        return Ok(false);
    }

    let capture = pool.ensure_method_ref(
        bridge::BRIDGE_CLASS,
        bridge::CAPTURE_FIELD_MODIFICATION.0,
        bridge::CAPTURE_FIELD_MODIFICATION.1,
    )?;

    let mut patches = Vec::with_capacity(sites.len());
    for site in sites {
        let owner_string = pool.ensure_string(&site.owner)?;
        let field_string = pool.ensure_string(&site.field_name)?;

        let mut insns = Vec::with_capacity(6);
        if site.is_static {
            // stack: value -> value, value, null
            insns.push(Insn::Simple(DUP));
            insns.push(Insn::Simple(ACONST_NULL));
        } else {
            // stack: owner, value -> owner, value, value, owner
            insns.push(Insn::Simple(DUP2));
            insns.push(Insn::Simple(SWAP));
        }
        insns.push(Insn::Ldc(owner_string));
        insns.push(Insn::Ldc(field_string));
        insns.push(Insn::Simple(ICONST_1));
        insns.push(Insn::Invoke {
            opcode: INVOKESTATIC,
            index: capture,
        });
        patches.push(CodePatch {
            at: site.at,
            insns,
        });
    }

    code.insert_patches(patches);
    code.raise_stack(STACK_MARGIN);
    Ok(true)
}
