//! Attribute names and the few attribute bodies the engine reads.
//!
//! Most attributes are carried as opaque bytes. The rewriter only interprets `Code`
//! (decoded in [`crate::classfile::code`]), the nest attributes and `InnerClasses`
//! for nestmate discovery, and `LineNumberTable` for relocation.

use crate::{classfile::pool::ConstantPool, file::Parser, Result};

/// `Code` attribute name.
pub const CODE: &str = "Code";
/// `LineNumberTable` attribute name.
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
/// `StackMapTable` attribute name (dropped from rewritten methods).
pub const STACK_MAP_TABLE: &str = "StackMapTable";
/// `LocalVariableTable` attribute name (dropped from rewritten methods).
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
/// `LocalVariableTypeTable` attribute name (dropped from rewritten methods).
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
/// `NestHost` attribute name.
pub const NEST_HOST: &str = "NestHost";
/// `NestMembers` attribute name.
pub const NEST_MEMBERS: &str = "NestMembers";
/// `InnerClasses` attribute name.
pub const INNER_CLASSES: &str = "InnerClasses";

/// Read a `NestHost` attribute body: the host's internal name.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on structural damage.
pub fn nest_host(data: &[u8], pool: &ConstantPool) -> Result<String> {
    let mut parser = Parser::new(data);
    let class_index = parser.read_be::<u16>()?;
    Ok(pool.class_name(class_index)?.to_string())
}

/// Read a `NestMembers` attribute body: the members' internal names.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on structural damage.
pub fn nest_members(data: &[u8], pool: &ConstantPool) -> Result<Vec<String>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let class_index = parser.read_be::<u16>()?;
        members.push(pool.class_name(class_index)?.to_string());
    }
    Ok(members)
}

/// Read an `InnerClasses` attribute body: the inner classes' internal names.
///
/// Entries whose `inner_class_info` index is zero are skipped.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] on structural damage.
pub fn inner_classes(data: &[u8], pool: &ConstantPool) -> Result<Vec<String>> {
    let mut parser = Parser::new(data);
    let count = parser.read_be::<u16>()?;
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let inner_info = parser.read_be::<u16>()?;
        parser.read_be::<u16>()?; // outer_class_info
        parser.read_be::<u16>()?; // inner_name
        parser.read_be::<u16>()?; // inner_class_access_flags
        if inner_info != 0 {
            names.push(pool.class_name(inner_info)?.to_string());
        }
    }
    Ok(names)
}
