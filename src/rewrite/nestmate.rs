//! The field-op tracker: wrap nestmate and static container methods.
//!
//! A nestmate of a prepared container (or a static method of the container itself) can
//! reach the container's internals without going through a mutator. The wrap allocates
//! an identity map of container-to-copy in a fresh local, snapshots each touched
//! container on its first field access (when this thread is outermost on it), and diffs
//! all stored copies at every return. For constructors the wrap starts after the
//! superclass constructor call.

use rustc_hash::FxHashSet;

use crate::{
    classfile::{
        code::{CodeAttribute, CodePatch, ExceptionHandler},
        insn::{opcodes::*, Insn},
        pool::ConstantPool,
    },
    rewrite::bridge,
    Result,
};

/// Worst-case extra operand stack depth of the inserted sequences.
const STACK_MARGIN: u16 = 3;

fn invokestatic(pool: &mut ConstantPool, method: (&str, &str)) -> Result<Insn> {
    let index = pool.ensure_method_ref(bridge::BRIDGE_CLASS, method.0, method.1)?;
    Ok(Insn::Invoke {
        opcode: INVOKESTATIC,
        index,
    })
}

/// Find the superclass constructor call that a constructor wrap must not precede.
fn super_constructor_site(code: &CodeAttribute, pool: &ConstantPool) -> Option<usize> {
    for (at, insn) in code.code.iter().enumerate() {
        if let Insn::Invoke {
            opcode: INVOKESPECIAL,
            index,
        } = insn
        {
            if let Ok((_, name, _)) = pool.member_ref(*index) {
                if name == bridge::CONSTRUCTOR_NAME {
                    return Some(at);
                }
            }
        }
    }
    None
}

/// Wrap a method whose field operations touch prepared container classes.
///
/// Returns true if the method contained such operations and was wrapped.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on dangling constant pool references.
pub fn instrument_field_ops(
    code: &mut CodeAttribute,
    pool: &mut ConstantPool,
    container_names: &FxHashSet<String>,
    is_constructor: bool,
) -> Result<bool> {
    enum Site {
        Field { at: usize, is_put: bool },
        Return { at: usize },
    }

    let start = if is_constructor {
        match super_constructor_site(code, pool) {
            Some(at) => at + 1,
            None => 0,
        }
    } else {
        0
    };

    let mut sites = Vec::new();
    let mut touches_container = false;
    for (at, insn) in code.code.iter().enumerate() {
        if at < start {
            continue;
        }
        match insn {
            Insn::Field { opcode, index }
                if *opcode == GETFIELD || *opcode == PUTFIELD =>
            {
                let (owner, _, _) = pool.member_ref(*index)?;
                if container_names.contains(owner) {
                    touches_container = true;
                    sites.push(Site::Field {
                        at,
                        is_put: *opcode == PUTFIELD,
                    });
                }
            }
            insn if insn.is_return() => sites.push(Site::Return { at }),
            _ => {}
        }
    }

    if !touches_container {
        return Ok(false);
    }

    let copies_var = code.new_local(1);
    let on_start = invokestatic(pool, bridge::ON_CAPTURE_START_COPIES)?;
    let on_end = invokestatic(pool, bridge::ON_CAPTURE_END_COPIES)?;

    let mut patches = vec![CodePatch {
        at: start,
        insns: vec![
            invokestatic(pool, bridge::GET_COPIES_STORAGE)?,
            Insn::Local {
                opcode: ASTORE,
                index: copies_var,
            },
        ],
    }];

    for site in sites {
        match site {
            Site::Field { at, is_put } => {
                let mut insns = Vec::with_capacity(4);
                if is_put {
                    // stack: container, value -> container, value, container
                    insns.push(Insn::Simple(DUP2));
                    insns.push(Insn::Simple(POP));
                } else {
                    // stack: container -> container, container
                    insns.push(Insn::Simple(DUP));
                }
                insns.push(Insn::Local {
                    opcode: ALOAD,
                    index: copies_var,
                });
                insns.push(on_start.clone());
                patches.push(CodePatch { at, insns });
            }
            Site::Return { at } => {
                patches.push(CodePatch {
                    at,
                    insns: vec![
                        Insn::Local {
                            opcode: ALOAD,
                            index: copies_var,
                        },
                        on_end.clone(),
                    ],
                });
            }
        }
    }

    let map = code.insert_patches(patches);

    // Catch-all from the wrap start: flush the copies map and rethrow.
    let end = code.code.len();
    let handler = code.append_block(vec![
        Insn::Local {
            opcode: ALOAD,
            index: copies_var,
        },
        on_end,
        Insn::Simple(ATHROW),
    ]);
    code.handlers.push(ExceptionHandler {
        start: map[start],
        end,
        handler,
        catch_type: 0,
    });

    code.raise_stack(STACK_MARGIN);
    Ok(true)
}
