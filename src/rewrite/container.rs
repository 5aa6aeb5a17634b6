//! The container rewrite: bracket every mutator with enter/leave and capture its delta.
//!
//! The rewrite selected per method follows the known-methods table:
//!
//! - **Immutable** methods are skipped entirely (the caller never reaches this module).
//! - **Documented** methods get an inline delta at every return, keyed off the value
//!   already on the stack; no bag copy, no container mutex (`synchronize = false`: the
//!   capture is a single straight-line bytecode sequence).
//! - **Replaceable** methods have their body spliced out for a per-element delegation
//!   to the bridge helper, which routes through the documented `add`/`remove`.
//! - Everything else gets the **default** wrap: bag copy on entry when this thread is
//!   outermost, bag diff at every return, container mutex held across the body.
//!
//! Every wrapped body is covered by a catch-all handler that releases the lock and
//! rethrows, so exceptional exits cannot leave the per-container state unbalanced.

use crate::{
    classfile::{
        code::{CodeAttribute, CodePatch, ExceptionHandler},
        insn::{opcodes::*, Insn},
        pool::ConstantPool,
    },
    rewrite::{
        bridge,
        known::{KnownMethod, MethodKind},
    },
    Result,
};

/// Worst-case extra operand stack depth across the inserted sequences.
const STACK_MARGIN: u16 = 6;

fn iconst(value: bool) -> Insn {
    Insn::Simple(if value { ICONST_1 } else { ICONST_0 })
}

fn invokestatic(pool: &mut ConstantPool, method: (&str, &str)) -> Result<Insn> {
    let index = pool.ensure_method_ref(bridge::BRIDGE_CLASS, method.0, method.1)?;
    Ok(Insn::Invoke {
        opcode: INVOKESTATIC,
        index,
    })
}

/// Replace a `addAll`/`removeAll` body with delegation to the bridge helper.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on constant pool overflow.
pub fn replace_with_helper(
    code: &mut CodeAttribute,
    pool: &mut ConstantPool,
    kind: MethodKind,
) -> Result<()> {
    let helper = match kind {
        MethodKind::ReplaceableAddAll => bridge::HELPER_ADD_ALL,
        MethodKind::ReplaceableRemoveAll => bridge::HELPER_REMOVE_ALL,
        _ => return Err(malformed_error!("not a replaceable method kind")),
    };
    let index = pool.ensure_method_ref(bridge::HELPERS_CLASS, helper.0, helper.1)?;

    code.code = vec![
        Insn::Simple(ALOAD_0),
        Insn::Simple(ALOAD_1),
        Insn::Invoke {
            opcode: INVOKESTATIC,
            index,
        },
        Insn::Simple(IRETURN),
    ];
    code.handlers.clear();
    code.line_numbers.clear();
    code.max_stack = 2;
    code.max_locals = code.max_locals.max(2);
    Ok(())
}

/// Apply the documented/default wrap to a mutator body.
///
/// `documented` carries the inline-delta recipe when the method is in the
/// known-methods table; `None` selects the default bag-diff wrap.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on constant pool overflow.
pub fn wrap_mutator(
    code: &mut CodeAttribute,
    pool: &mut ConstantPool,
    documented: Option<&KnownMethod>,
) -> Result<()> {
    // Documented methods capture inline and skip the container mutex; anything
    // unknown takes the mutex and the before/after copy.
    let synchronize = documented.is_none();

    let should_capture_var = code.new_local(1);
    let copy_var = if synchronize { Some(code.new_local(1)) } else { None };

    let mut prologue = vec![
        Insn::Simple(ALOAD_0),
        iconst(synchronize),
        invokestatic(pool, bridge::ON_CAPTURE_START)?,
        Insn::Local {
            opcode: ISTORE,
            index: should_capture_var,
        },
    ];
    if let Some(copy_var) = copy_var {
        prologue.extend([
            Insn::Local {
                opcode: ILOAD,
                index: should_capture_var,
            },
            Insn::Simple(ALOAD_0),
            invokestatic(pool, bridge::CAPTURE_COPY)?,
            Insn::Local {
                opcode: ASTORE,
                index: copy_var,
            },
        ]);
    }

    let mut patches = vec![CodePatch {
        at: 0,
        insns: prologue,
    }];

    for site in code.return_sites() {
        let mut insns = match documented.map(|m| m.kind) {
            Some(MethodKind::DocumentedBool { is_addition }) => {
                capture_documented_bool(pool, should_capture_var, is_addition)?
            }
            Some(MethodKind::DocumentedPut) => capture_documented_put(pool, should_capture_var)?,
            Some(MethodKind::DocumentedRemoveKey) => {
                capture_documented_remove_key(pool, should_capture_var)?
            }
            _ => {
                let copy_var = copy_var.expect("default wrap allocates a copy local");
                vec![
                    Insn::Local {
                        opcode: ALOAD,
                        index: copy_var,
                    },
                    Insn::Simple(ALOAD_0),
                    invokestatic(pool, bridge::CAPTURE_MODIFICATION_DEFAULT)?,
                ]
            }
        };
        insns.extend([
            Insn::Simple(ALOAD_0),
            iconst(synchronize),
            invokestatic(pool, bridge::ON_CAPTURE_END)?,
        ]);
        patches.push(CodePatch { at: site, insns });
    }

    code.insert_patches(patches);

    // Catch-all: release the lock and rethrow.
    let end = code.code.len();
    let handler = code.append_block(vec![
        Insn::Simple(ALOAD_0),
        iconst(synchronize),
        invokestatic(pool, bridge::ON_CAPTURE_END)?,
        Insn::Simple(ATHROW),
    ]);
    code.handlers.push(ExceptionHandler {
        start: 0,
        end,
        handler,
        catch_type: 0,
    });

    code.raise_stack(STACK_MARGIN);
    Ok(())
}

/// Inline delta for `Collection.add`/`Collection.remove`: the boolean return value
/// on the stack is the "modified?" flag.
fn capture_documented_bool(
    pool: &mut ConstantPool,
    should_capture_var: u16,
    is_addition: bool,
) -> Result<Vec<Insn>> {
    Ok(vec![
        Insn::Simple(DUP),
        Insn::Local {
            opcode: ILOAD,
            index: should_capture_var,
        },
        Insn::Simple(SWAP),
        Insn::Simple(ALOAD_0),
        Insn::Simple(ALOAD_1),
        iconst(is_addition),
        invokestatic(pool, bridge::CAPTURE_MODIFICATION_INLINE)?,
    ])
}

/// Inline delta for `Map.put`: modified iff the returned previous value is not
/// identical to the stored value; the recorded element is `createEntry(key, value)`.
fn capture_documented_put(pool: &mut ConstantPool, should_capture_var: u16) -> Result<Vec<Insn>> {
    Ok(vec![
        // 0: previous value on stack
        Insn::Simple(DUP),
        // 1
        Insn::Simple(ALOAD_2),
        // 2: previous != value -> modified
        Insn::Branch {
            opcode: IF_ACMPNE,
            target: 5,
        },
        // 3
        iconst(false),
        // 4
        Insn::Branch {
            opcode: GOTO,
            target: 6,
        },
        // 5
        iconst(true),
        // 6
        Insn::Local {
            opcode: ILOAD,
            index: should_capture_var,
        },
        // 7
        Insn::Simple(SWAP),
        // 8
        Insn::Simple(ALOAD_1),
        // 9
        Insn::Simple(ALOAD_2),
        // 10
        invokestatic(pool, bridge::CREATE_ENTRY)?,
        // 11
        Insn::Simple(ALOAD_0),
        // 12
        Insn::Simple(SWAP),
        // 13
        iconst(true),
        // 14
        invokestatic(pool, bridge::CAPTURE_MODIFICATION_INLINE)?,
    ])
}

/// Inline delta for `Map.remove`: modified iff the returned previous value is
/// non-null; the recorded element is `createEntry(key, previous)`.
fn capture_documented_remove_key(
    pool: &mut ConstantPool,
    should_capture_var: u16,
) -> Result<Vec<Insn>> {
    Ok(vec![
        // 0: previous value on stack
        Insn::Simple(DUP),
        // 1
        Insn::Simple(DUP),
        // 2
        Insn::Branch {
            opcode: IFNONNULL,
            target: 5,
        },
        // 3
        iconst(false),
        // 4
        Insn::Branch {
            opcode: GOTO,
            target: 6,
        },
        // 5
        iconst(true),
        // 6
        Insn::Local {
            opcode: ILOAD,
            index: should_capture_var,
        },
        // 7: previous, previous, modified, shouldCapture
        //    -> shouldCapture, modified under the duplicated previous
        Insn::Simple(DUP_X2),
        // 8
        Insn::Simple(POP),
        // 9
        Insn::Simple(DUP_X1),
        // 10
        Insn::Simple(POP),
        // 11
        Insn::Simple(ALOAD_1),
        // 12
        Insn::Simple(SWAP),
        // 13
        invokestatic(pool, bridge::CREATE_ENTRY)?,
        // 14
        Insn::Simple(ALOAD_0),
        // 15
        Insn::Simple(SWAP),
        // 16
        iconst(false),
        // 17
        invokestatic(pool, bridge::CAPTURE_MODIFICATION_INLINE)?,
    ])
}
