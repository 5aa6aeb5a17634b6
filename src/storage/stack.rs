//! Stack capture and serialization.
//!
//! Recorded stacks are VM-level `(class, method, line)` frames, innermost first. The
//! engine cannot unwind the target VM itself, so capture goes through the
//! [`StackProvider`] seam implemented by the host bridge. Frames from the agent's own
//! package are filtered out before a stack is stored.
//!
//! The serialized blob is the external contract consumed by the debugger: per frame, a
//! length-prefixed modified-UTF-8 class name, a length-prefixed modified-UTF-8 method
//! name, and a big-endian 32-bit line number.

use crate::{rewrite::bridge::AGENT_PACKAGE, utils::mutf8, Result};

/// One stack frame of the target program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Binary class name (dot-separated).
    pub class_name: String,
    /// Method name.
    pub method_name: String,
    /// Line number; negative when unknown.
    pub line: i32,
}

impl StackFrame {
    /// Construct a frame.
    #[must_use]
    pub fn new(class_name: &str, method_name: &str, line: i32) -> Self {
        StackFrame {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            line,
        }
    }
}

/// Source of VM-level stack frames for the current thread, innermost first.
///
/// Implemented by the host bridge. A capture failure does not lose the history
/// record: it is stored with an empty stack.
pub trait StackProvider: Send + Sync {
    /// Capture the current thread's frames, innermost first.
    ///
    /// # Errors
    /// Returns [`crate::Error::StackCapture`] when the walk fails.
    fn capture(&self) -> Result<Vec<StackFrame>>;
}

/// A provider that captures nothing. Used when the host has no frame source.
pub struct NullStackProvider;

impl StackProvider for NullStackProvider {
    fn capture(&self) -> Result<Vec<StackFrame>> {
        Ok(Vec::new())
    }
}

/// A captured, already-filtered stack.
#[derive(Debug, Clone, Default)]
pub struct CapturedStack {
    frames: Vec<StackFrame>,
}

impl CapturedStack {
    /// An empty stack (capture failed or was not requested).
    #[must_use]
    pub fn empty() -> Self {
        CapturedStack::default()
    }

    /// Build from raw frames, dropping every frame whose class is inside the
    /// agent's own package.
    #[must_use]
    pub fn from_frames(frames: Vec<StackFrame>) -> Self {
        CapturedStack {
            frames: frames
                .into_iter()
                .filter(|f| !f.class_name.starts_with(AGENT_PACKAGE))
                .collect(),
        }
    }

    /// The filtered frames, innermost first.
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Serialize to the debugger wire format.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for frame in &self.frames {
            write_utf(&mut out, &frame.class_name);
            write_utf(&mut out, &frame.method_name);
            out.extend_from_slice(&frame.line.to_be_bytes());
        }
        out
    }
}

fn write_utf(out: &mut Vec<u8>, text: &str) {
    let encoded = mutf8::encode(text);
    let length = u16::try_from(encoded.len()).unwrap_or(u16::MAX);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&encoded[..length as usize]);
}
