//! The `Code` attribute: decoded form, patching, and re-emission.
//!
//! A method selected for rewriting has its `Code` attribute decoded into a
//! [`CodeAttribute`]: label-indexed instructions, exception ranges and line numbers
//! expressed as labels. The rewriter edits it through [`CodeAttribute::insert_patches`]
//! and [`CodeAttribute::append_block`], then serializes it back. Verifier metadata
//! (`StackMapTable`) and local variable debug tables are not carried through a rewrite;
//! the line number table is relocated and kept.

use crate::{
    classfile::{
        attributes,
        decode::decode_code,
        encode::encode_code,
        insn::{Insn, Label},
        pool::ConstantPool,
    },
    file::Parser,
    Result,
};

/// One entry of the exception table, label-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First protected instruction.
    pub start: Label,
    /// One past the last protected instruction.
    pub end: Label,
    /// First instruction of the handler.
    pub handler: Label,
    /// Class entry of the caught type; zero catches everything.
    pub catch_type: u16,
}

/// A block of instructions to insert before the instruction at `at`.
///
/// Branches *inside* `insns` are relative to the block: a target of `2` means the
/// third instruction of this patch. Branches in the surrounding method that point at
/// `at` are redirected to the start of the inserted block.
#[derive(Debug, Clone)]
pub struct CodePatch {
    /// Insertion point: instruction index in the unpatched code.
    pub at: Label,
    /// The instructions to insert.
    pub insns: Vec<Insn>,
}

/// A decoded `Code` attribute.
#[derive(Debug, Clone)]
pub struct CodeAttribute {
    /// Operand stack budget.
    pub max_stack: u16,
    /// Local variable slots.
    pub max_locals: u16,
    /// Label-indexed instructions.
    pub code: Vec<Insn>,
    /// Exception table.
    pub handlers: Vec<ExceptionHandler>,
    /// Relocatable line number table, `(label, line)`.
    pub line_numbers: Vec<(Label, u16)>,
}

impl CodeAttribute {
    /// Decode a raw `Code` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on structural damage.
    pub fn parse(data: &[u8], pool: &ConstantPool) -> Result<Self> {
        let mut parser = Parser::new(data);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code_length = parser.read_be::<u32>()? as usize;
        let code_bytes = parser.take(code_length)?;
        let decoded = decode_code(code_bytes)?;

        let handler_count = parser.read_be::<u16>()?;
        let mut handlers = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            let start = decoded.label_at(parser.read_be::<u16>()? as usize)?;
            let end = decoded.label_at(parser.read_be::<u16>()? as usize)?;
            let handler = decoded.label_at(parser.read_be::<u16>()? as usize)?;
            let catch_type = parser.read_be::<u16>()?;
            handlers.push(ExceptionHandler {
                start,
                end,
                handler,
                catch_type,
            });
        }

        let mut line_numbers = Vec::new();
        let attribute_count = parser.read_be::<u16>()?;
        for _ in 0..attribute_count {
            let name_index = parser.read_be::<u16>()?;
            let length = parser.read_be::<u32>()? as usize;
            let data = parser.take(length)?;
            if pool.utf8(name_index)? == attributes::LINE_NUMBER_TABLE {
                let mut sub = Parser::new(data);
                let entries = sub.read_be::<u16>()?;
                for _ in 0..entries {
                    let start_pc = sub.read_be::<u16>()? as usize;
                    let line = sub.read_be::<u16>()?;
                    // Debug info is best effort; entries off an instruction
                    // boundary are dropped.
                    if let Some(label) = decoded.label_at_opt(start_pc) {
                        line_numbers.push((label, line));
                    }
                }
            }
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code: decoded.insns,
            handlers,
            line_numbers,
        })
    }

    /// Serialize back into raw `Code` attribute data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body outgrows the format limits
    /// or a conditional branch displacement overflows.
    pub fn to_bytes(&self, pool: &mut ConstantPool) -> Result<Vec<u8>> {
        let encoded = encode_code(&self.code)?;

        let mut out = Vec::new();
        out.extend_from_slice(&self.max_stack.to_be_bytes());
        out.extend_from_slice(&self.max_locals.to_be_bytes());
        out.extend_from_slice(&(encoded.bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&encoded.bytes);

        out.extend_from_slice(&(self.handlers.len() as u16).to_be_bytes());
        for handler in &self.handlers {
            for label in [handler.start, handler.end, handler.handler] {
                let offset = encoded.offset_of(label);
                let offset = u16::try_from(offset)
                    .map_err(|_| malformed_error!("exception table offset overflow"))?;
                out.extend_from_slice(&offset.to_be_bytes());
            }
            out.extend_from_slice(&handler.catch_type.to_be_bytes());
        }

        if self.line_numbers.is_empty() {
            out.extend_from_slice(&0u16.to_be_bytes());
        } else {
            out.extend_from_slice(&1u16.to_be_bytes());
            let name_index = pool.ensure_utf8(attributes::LINE_NUMBER_TABLE)?;
            out.extend_from_slice(&name_index.to_be_bytes());
            out.extend_from_slice(&((self.line_numbers.len() * 4 + 2) as u32).to_be_bytes());
            out.extend_from_slice(&(self.line_numbers.len() as u16).to_be_bytes());
            for (label, line) in &self.line_numbers {
                let offset = encoded.offset_of(*label);
                let offset = u16::try_from(offset)
                    .map_err(|_| malformed_error!("line number offset overflow"))?;
                out.extend_from_slice(&offset.to_be_bytes());
                out.extend_from_slice(&line.to_be_bytes());
            }
        }

        Ok(out)
    }

    /// Insert instruction blocks, redirecting every label that crosses an
    /// insertion point.
    ///
    /// Branches (and exception ranges, and line entries) that pointed at an
    /// insertion position now point at the start of the inserted block, so any
    /// path that reached the original instruction also executes the insertion.
    ///
    /// Returns the label mapping: element `t` is the new label for old label
    /// `t` (old labels run `0..=code.len()`).
    pub fn insert_patches(&mut self, mut patches: Vec<CodePatch>) -> Vec<Label> {
        if patches.is_empty() {
            return (0..=self.code.len()).collect();
        }
        patches.sort_by_key(|p| p.at);

        // shift[t] = how far a label pointing at old position t moves.
        let mut shift = vec![0usize; self.code.len() + 1];
        {
            let mut acc = 0;
            let mut patch_index = 0;
            for (t, slot) in shift.iter_mut().enumerate() {
                *slot = acc;
                while patch_index < patches.len() && patches[patch_index].at == t {
                    acc += patches[patch_index].insns.len();
                    patch_index += 1;
                }
            }
        }
        let map = |t: Label| t + shift[t];

        let mut new_code =
            Vec::with_capacity(self.code.len() + patches.iter().map(|p| p.insns.len()).sum::<usize>());
        let mut patch_iter = patches.into_iter().peekable();
        for (old_index, insn) in self.code.drain(..).enumerate() {
            while patch_iter
                .peek()
                .is_some_and(|p| p.at == old_index)
            {
                let patch = patch_iter.next().unwrap();
                let base = new_code.len();
                for mut inserted in patch.insns {
                    inserted.remap_labels(|relative| base + relative);
                    new_code.push(inserted);
                }
            }
            let mut insn = insn;
            insn.remap_labels(map);
            new_code.push(insn);
        }
        // Patches at the end label.
        for patch in patch_iter {
            let base = new_code.len();
            for mut inserted in patch.insns {
                inserted.remap_labels(|relative| base + relative);
                new_code.push(inserted);
            }
        }
        self.code = new_code;

        for handler in &mut self.handlers {
            handler.start = map(handler.start);
            handler.end = map(handler.end);
            handler.handler = map(handler.handler);
        }
        for (label, _) in &mut self.line_numbers {
            *label = map(*label);
        }

        (0..shift.len()).map(|t| t + shift[t]).collect()
    }

    /// Append a block at the end of the body; branches inside the block are
    /// relative to it. Returns the label of its first instruction.
    pub fn append_block(&mut self, insns: Vec<Insn>) -> Label {
        let base = self.code.len();
        for mut insn in insns {
            insn.remap_labels(|relative| base + relative);
            self.code.push(insn);
        }
        base
    }

    /// Allocate local variable slots past the current frame. Returns the first
    /// new slot index.
    pub fn new_local(&mut self, slots: u16) -> u16 {
        let index = self.max_locals;
        self.max_locals = self.max_locals.saturating_add(slots);
        index
    }

    /// Raise the operand stack budget by the worst-case depth of inserted code.
    pub fn raise_stack(&mut self, extra: u16) {
        self.max_stack = self.max_stack.saturating_add(extra);
    }

    /// Labels of every `*return` instruction.
    #[must_use]
    pub fn return_sites(&self) -> Vec<Label> {
        self.code
            .iter()
            .enumerate()
            .filter(|(_, insn)| insn.is_return())
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::insn::opcodes::*;

    fn attribute_of(code: &[u8]) -> CodeAttribute {
        let mut data = Vec::new();
        data.extend_from_slice(&10u16.to_be_bytes()); // max_stack
        data.extend_from_slice(&2u16.to_be_bytes()); // max_locals
        data.extend_from_slice(&(code.len() as u32).to_be_bytes());
        data.extend_from_slice(code);
        data.extend_from_slice(&0u16.to_be_bytes()); // handlers
        data.extend_from_slice(&0u16.to_be_bytes()); // attributes
        CodeAttribute::parse(&data, &ConstantPool::new()).unwrap()
    }

    #[test]
    fn test_parse_and_reemit() {
        let code = [0x2A, 0x04, 0x57, 0xB1];
        let attribute = attribute_of(&code);
        assert_eq!(attribute.max_stack, 10);
        assert_eq!(attribute.code.len(), 4);

        let mut pool = ConstantPool::new();
        let bytes = attribute.to_bytes(&mut pool).unwrap();
        let reparsed = CodeAttribute::parse(&bytes, &pool).unwrap();
        assert_eq!(reparsed.code, attribute.code);
    }

    #[test]
    fn test_patch_redirects_branches() {
        // iconst_0; ifeq -> return; nop; return
        let code = [0x03, 0x99, 0x00, 0x04, 0x00, 0xB1];
        let mut attribute = attribute_of(&code);

        // Insert a nop before the final return (the branch target).
        attribute.insert_patches(vec![CodePatch {
            at: 3,
            insns: vec![Insn::Simple(NOP)],
        }]);

        assert_eq!(attribute.code.len(), 5);
        match &attribute.code[1] {
            Insn::Branch { target, .. } => assert_eq!(*target, 3),
            other => panic!("expected branch, got {:?}", other),
        }
        assert!(attribute.code[4].is_return());
    }

    #[test]
    fn test_patch_block_relative_labels() {
        let code = [0xB1];
        let mut attribute = attribute_of(&code);

        // Block with an internal forward jump: goto -> iconst_1 (relative 2).
        attribute.insert_patches(vec![CodePatch {
            at: 0,
            insns: vec![
                Insn::Branch {
                    opcode: GOTO,
                    target: 2,
                },
                Insn::Simple(ICONST_0),
                Insn::Simple(ICONST_1),
            ],
        }]);

        match &attribute.code[0] {
            Insn::Branch { target, .. } => assert_eq!(*target, 2),
            other => panic!("expected branch, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_patches_accumulate_shift() {
        // nop; nop; return
        let code = [0x00, 0x00, 0xB1];
        let mut attribute = attribute_of(&code);
        attribute.insert_patches(vec![
            CodePatch {
                at: 1,
                insns: vec![Insn::Simple(DUP)],
            },
            CodePatch {
                at: 2,
                insns: vec![Insn::Simple(POP), Insn::Simple(POP)],
            },
        ]);

        assert_eq!(
            attribute.code,
            vec![
                Insn::Simple(NOP),
                Insn::Simple(DUP),
                Insn::Simple(NOP),
                Insn::Simple(POP),
                Insn::Simple(POP),
                Insn::Simple(RETURN),
            ]
        );
    }

    #[test]
    fn test_append_block_and_handler() {
        let code = [0x00, 0xB1];
        let mut attribute = attribute_of(&code);
        let end = attribute.code.len();
        let handler = attribute.append_block(vec![Insn::Simple(ATHROW)]);
        attribute.handlers.push(ExceptionHandler {
            start: 0,
            end,
            handler,
            catch_type: 0,
        });

        let mut pool = ConstantPool::new();
        let bytes = attribute.to_bytes(&mut pool).unwrap();
        let reparsed = CodeAttribute::parse(&bytes, &pool).unwrap();
        assert_eq!(reparsed.handlers.len(), 1);
        assert_eq!(reparsed.handlers[0].handler, 2);
        assert_eq!(reparsed.handlers[0].end, 2);
    }
}
