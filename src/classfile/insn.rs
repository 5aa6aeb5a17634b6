//! Instruction representation for rewriting.
//!
//! Decoded method bodies are label-indexed: every branch target is the index of an
//! instruction in the code list (or one past the end, for exception ranges that extend to
//! the end of the body). Inserting instructions therefore never corrupts control flow:
//! the encoder resolves labels back to byte offsets, re-pads switches and widens
//! `goto`/`jsr` when a displacement outgrows 16 bits.

/// Branch target: index of an instruction in the decoded code list.
pub type Label = usize;

/// Opcode constants referenced by the decoder and the rewriter.
#[allow(missing_docs)]
pub mod opcodes {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_1: u8 = 0x04;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const LDC_W: u8 = 0x13;
    pub const LDC2_W: u8 = 0x14;
    pub const ILOAD: u8 = 0x15;
    pub const LLOAD: u8 = 0x16;
    pub const FLOAD: u8 = 0x17;
    pub const DLOAD: u8 = 0x18;
    pub const ALOAD: u8 = 0x19;
    pub const ALOAD_0: u8 = 0x2A;
    pub const ALOAD_1: u8 = 0x2B;
    pub const ALOAD_2: u8 = 0x2C;
    pub const ALOAD_3: u8 = 0x2D;
    pub const ISTORE: u8 = 0x36;
    pub const LSTORE: u8 = 0x37;
    pub const FSTORE: u8 = 0x38;
    pub const DSTORE: u8 = 0x39;
    pub const ASTORE: u8 = 0x3A;
    pub const POP: u8 = 0x57;
    pub const POP2: u8 = 0x58;
    pub const DUP: u8 = 0x59;
    pub const DUP_X1: u8 = 0x5A;
    pub const DUP_X2: u8 = 0x5B;
    pub const DUP2: u8 = 0x5C;
    pub const SWAP: u8 = 0x5F;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9A;
    pub const IF_ICMPEQ: u8 = 0x9F;
    pub const IF_ACMPEQ: u8 = 0xA5;
    pub const IF_ACMPNE: u8 = 0xA6;
    pub const GOTO: u8 = 0xA7;
    pub const JSR: u8 = 0xA8;
    pub const RET: u8 = 0xA9;
    pub const TABLESWITCH: u8 = 0xAA;
    pub const LOOKUPSWITCH: u8 = 0xAB;
    pub const IRETURN: u8 = 0xAC;
    pub const LRETURN: u8 = 0xAD;
    pub const FRETURN: u8 = 0xAE;
    pub const DRETURN: u8 = 0xAF;
    pub const ARETURN: u8 = 0xB0;
    pub const RETURN: u8 = 0xB1;
    pub const GETSTATIC: u8 = 0xB2;
    pub const PUTSTATIC: u8 = 0xB3;
    pub const GETFIELD: u8 = 0xB4;
    pub const PUTFIELD: u8 = 0xB5;
    pub const INVOKEVIRTUAL: u8 = 0xB6;
    pub const INVOKESPECIAL: u8 = 0xB7;
    pub const INVOKESTATIC: u8 = 0xB8;
    pub const INVOKEINTERFACE: u8 = 0xB9;
    pub const INVOKEDYNAMIC: u8 = 0xBA;
    pub const NEW: u8 = 0xBB;
    pub const NEWARRAY: u8 = 0xBC;
    pub const ANEWARRAY: u8 = 0xBD;
    pub const ATHROW: u8 = 0xBF;
    pub const CHECKCAST: u8 = 0xC0;
    pub const INSTANCEOF: u8 = 0xC1;
    pub const WIDE: u8 = 0xC4;
    pub const MULTIANEWARRAY: u8 = 0xC5;
    pub const IFNULL: u8 = 0xC6;
    pub const IFNONNULL: u8 = 0xC7;
    pub const GOTO_W: u8 = 0xC8;
    pub const JSR_W: u8 = 0xC9;
}

use opcodes::*;

/// One decoded bytecode instruction.
///
/// Single-byte forms without operands (including the `*_0`..`*_3` load/store shortcuts
/// and all arithmetic) are kept as [`Insn::Simple`] so untouched instruction sequences
/// re-encode at their original size. `goto_w`/`jsr_w` and `ldc_w` are normalized; the
/// encoder re-widens them when required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Any opcode without operands.
    Simple(u8),
    /// `bipush`/`sipush`.
    Push {
        /// `BIPUSH` or `SIPUSH`
        opcode: u8,
        /// The pushed value
        value: i16,
    },
    /// `ldc`/`ldc_w`, normalized to the pool index.
    Ldc(u16),
    /// `ldc2_w`.
    Ldc2(u16),
    /// Local variable access with an explicit index (`iload`..`astore`, `ret`).
    Local {
        /// The base (non-wide) opcode
        opcode: u8,
        /// Local variable index
        index: u16,
    },
    /// `iinc`.
    Iinc {
        /// Local variable index
        index: u16,
        /// Increment
        delta: i16,
    },
    /// Any branch (`ifeq`..`jsr`, `ifnull`, `ifnonnull`); `goto_w`/`jsr_w` normalize
    /// to `goto`/`jsr`.
    Branch {
        /// The narrow-form opcode
        opcode: u8,
        /// Target instruction
        target: Label,
    },
    /// `tableswitch`.
    TableSwitch {
        /// Default target
        default: Label,
        /// Lowest case value
        low: i32,
        /// Highest case value
        high: i32,
        /// One target per case value
        targets: Vec<Label>,
    },
    /// `lookupswitch`.
    LookupSwitch {
        /// Default target
        default: Label,
        /// Sorted `(match, target)` pairs
        pairs: Vec<(i32, Label)>,
    },
    /// `getstatic`/`putstatic`/`getfield`/`putfield`.
    Field {
        /// The field access opcode
        opcode: u8,
        /// Fieldref pool index
        index: u16,
    },
    /// `invokevirtual`/`invokespecial`/`invokestatic`.
    Invoke {
        /// The invocation opcode
        opcode: u8,
        /// Methodref pool index
        index: u16,
    },
    /// `invokeinterface`.
    InvokeInterface {
        /// InterfaceMethodref pool index
        index: u16,
        /// Argument slot count
        count: u8,
    },
    /// `invokedynamic`.
    InvokeDynamic {
        /// InvokeDynamic pool index
        index: u16,
    },
    /// `new`/`anewarray`/`checkcast`/`instanceof`.
    Type {
        /// The type opcode
        opcode: u8,
        /// Class pool index
        index: u16,
    },
    /// `newarray`.
    NewArray(u8),
    /// `multianewarray`.
    MultiANewArray {
        /// Class pool index
        index: u16,
        /// Dimension count
        dims: u8,
    },
}

impl Insn {
    /// Returns true for the six `*return` opcodes.
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self, Insn::Simple(op) if (IRETURN..=RETURN).contains(op))
    }

    /// Remap every label through `f`.
    pub(crate) fn remap_labels(&mut self, mut f: impl FnMut(Label) -> Label) {
        match self {
            Insn::Branch { target, .. } => *target = f(*target),
            Insn::TableSwitch {
                default, targets, ..
            } => {
                *default = f(*default);
                for target in targets {
                    *target = f(*target);
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                *default = f(*default);
                for (_, target) in pairs {
                    *target = f(*target);
                }
            }
            _ => {}
        }
    }
}
