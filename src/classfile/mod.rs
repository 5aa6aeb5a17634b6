//! JVM class file model: parse, edit, re-emit.
//!
//! This module owns the binary format work the rewriter is built on. A class arrives
//! from the retransformation host as a byte buffer, is parsed into a [`ClassFile`]
//! (constant pool, members, attributes), edited in place, and serialized back.
//!
//! # Architecture
//!
//! Attributes are carried as opaque `(name, bytes)` pairs; only the handful the engine
//! interprets are decoded, and only when a method is actually rewritten. A class that
//! is parsed and re-emitted without edits round-trips byte-identical; untouched
//! methods keep their raw attribute bytes, including their `StackMapTable`.
//!
//! # Key Components
//!
//! - [`ClassFile`] - top-level model with [`ClassFile::parse`] / [`ClassFile::to_bytes`]
//! - [`pool::ConstantPool`] - entry resolution and interning
//! - [`code::CodeAttribute`] - label-indexed method bodies with patch support
//! - [`decode`] / [`encode`] - bytecode array conversion
//! - [`attributes`] - the attribute bodies the engine reads

pub mod attributes;
pub mod code;
pub mod decode;
pub mod encode;
pub mod insn;
pub mod pool;

use bitflags::bitflags;

use crate::{
    classfile::{code::CodeAttribute, pool::ConstantPool},
    file::Parser,
    Result,
};

bitflags! {
    /// Class-level access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassAccess: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared final
        const FINAL = 0x0010;
        /// Treat superclass methods specially on invokespecial
        const SUPER = 0x0020;
        /// Is an interface
        const INTERFACE = 0x0200;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Not present in source
        const SYNTHETIC = 0x1000;
        /// Declared as an annotation interface
        const ANNOTATION = 0x2000;
        /// Declared as an enum
        const ENUM = 0x4000;
        /// Is a module descriptor
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Method-level access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAccess: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final
        const FINAL = 0x0010;
        /// Declared synchronized
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge method
        const BRIDGE = 0x0040;
        /// Declared with variable arity
        const VARARGS = 0x0080;
        /// Implemented in native code
        const NATIVE = 0x0100;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// FP-strict
        const STRICT = 0x0800;
        /// Not present in source
        const SYNTHETIC = 0x1000;
    }
}

/// An attribute carried as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    /// Utf8 pool entry holding the attribute name.
    pub name_index: u16,
    /// The attribute body, uninterpreted.
    pub data: Vec<u8>,
}

/// A field or method of a class.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Access and property flags.
    pub access_flags: u16,
    /// Utf8 pool entry holding the member name.
    pub name_index: u16,
    /// Utf8 pool entry holding the descriptor.
    pub descriptor_index: u16,
    /// The member's attributes, uninterpreted.
    pub attributes: Vec<RawAttribute>,
}

impl MemberInfo {
    /// The member's name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a dangling pool index.
    pub fn name<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.name_index)
    }

    /// The member's descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a dangling pool index.
    pub fn descriptor<'a>(&self, pool: &'a ConstantPool) -> Result<&'a str> {
        pool.utf8(self.descriptor_index)
    }

    /// Method flags view of the raw access flags.
    #[must_use]
    pub fn method_access(&self) -> MethodAccess {
        MethodAccess::from_bits_truncate(self.access_flags)
    }

    /// Find an attribute by name.
    #[must_use]
    pub fn attribute<'a>(
        &'a self,
        pool: &ConstantPool,
        name: &str,
    ) -> Option<&'a RawAttribute> {
        self.attributes
            .iter()
            .find(|a| pool.utf8(a.name_index).is_ok_and(|n| n == name))
    }

    /// Decode this method's `Code` attribute, if present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on structural damage.
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>> {
        match self.attribute(pool, attributes::CODE) {
            Some(raw) => Ok(Some(CodeAttribute::parse(&raw.data, pool)?)),
            None => Ok(None),
        }
    }

    /// Replace this method's `Code` attribute with a rewritten body.
    ///
    /// Verifier metadata and local variable debug tables do not survive a
    /// rewrite; they live inside the replaced `Code` attribute data.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the body cannot be encoded.
    pub fn set_code(&mut self, pool: &mut ConstantPool, code: &CodeAttribute) -> Result<()> {
        let data = code.to_bytes(pool)?;
        let name_index = pool.ensure_utf8(attributes::CODE)?;
        for attribute in &mut self.attributes {
            if pool.utf8(attribute.name_index).is_ok_and(|n| n == attributes::CODE) {
                attribute.data = data;
                return Ok(());
            }
        }
        self.attributes.push(RawAttribute { name_index, data });
        Ok(())
    }
}

/// A parsed class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor format version.
    pub minor_version: u16,
    /// Major format version.
    pub major_version: u16,
    /// The constant pool.
    pub pool: ConstantPool,
    /// Class access flags.
    pub access_flags: u16,
    /// Class entry of this class.
    pub this_class: u16,
    /// Class entry of the superclass; zero for `java/lang/Object`.
    pub super_class: u16,
    /// Class entries of the direct interfaces.
    pub interfaces: Vec<u16>,
    /// Declared fields.
    pub fields: Vec<MemberInfo>,
    /// Declared methods.
    pub methods: Vec<MemberInfo>,
    /// Class-level attributes, uninterpreted.
    pub attributes: Vec<RawAttribute>,
}

impl ClassFile {
    /// Parse a class file buffer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when the magic is wrong or the
    /// structure is damaged, [`crate::Error::OutOfBounds`] on truncation.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(bytes);
        let magic = parser.read_be::<u32>()?;
        if magic != 0xCAFE_BABE {
            return Err(malformed_error!("bad class file magic {:#010x}", magic));
        }

        let minor_version = parser.read_be::<u16>()?;
        let major_version = parser.read_be::<u16>()?;
        let pool = ConstantPool::parse(&mut parser)?;
        let access_flags = parser.read_be::<u16>()?;
        let this_class = parser.read_be::<u16>()?;
        let super_class = parser.read_be::<u16>()?;

        let interface_count = parser.read_be::<u16>()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(parser.read_be::<u16>()?);
        }

        let fields = parse_members(&mut parser)?;
        let methods = parse_members(&mut parser)?;
        let attributes = parse_attributes(&mut parser)?;

        Ok(ClassFile {
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Serialize the class file.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        out.extend_from_slice(&self.minor_version.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        self.pool.write(&mut out);
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend_from_slice(&interface.to_be_bytes());
        }
        write_members(&mut out, &self.fields);
        write_members(&mut out, &self.methods);
        write_attributes(&mut out, &self.attributes);
        out
    }

    /// Internal name of this class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a dangling pool index.
    pub fn class_name(&self) -> Result<&str> {
        self.pool.class_name(self.this_class)
    }

    /// Internal name of the superclass; `None` for `java/lang/Object`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a dangling pool index.
    pub fn super_class_name(&self) -> Result<Option<&str>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        Ok(Some(self.pool.class_name(self.super_class)?))
    }

    /// Internal names of the direct interfaces.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on a dangling pool index.
    pub fn interface_names(&self) -> Result<Vec<&str>> {
        self.interfaces
            .iter()
            .map(|index| self.pool.class_name(*index))
            .collect()
    }

    /// Returns true if a field with this name is declared here.
    #[must_use]
    pub fn declares_field(&self, field_name: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.name(&self.pool).is_ok_and(|n| n == field_name))
    }

    /// Find a class-level attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&RawAttribute> {
        self.attributes
            .iter()
            .find(|a| self.pool.utf8(a.name_index).is_ok_and(|n| n == name))
    }
}

fn parse_members(parser: &mut Parser<'_>) -> Result<Vec<MemberInfo>> {
    let count = parser.read_be::<u16>()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = parser.read_be::<u16>()?;
        let name_index = parser.read_be::<u16>()?;
        let descriptor_index = parser.read_be::<u16>()?;
        let attributes = parse_attributes(parser)?;
        members.push(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }
    Ok(members)
}

fn parse_attributes(parser: &mut Parser<'_>) -> Result<Vec<RawAttribute>> {
    let count = parser.read_be::<u16>()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = parser.read_be::<u16>()?;
        let length = parser.read_be::<u32>()? as usize;
        let data = parser.take(length)?.to_vec();
        attributes.push(RawAttribute { name_index, data });
    }
    Ok(attributes)
}

fn write_members(out: &mut Vec<u8>, members: &[MemberInfo]) {
    out.extend_from_slice(&(members.len() as u16).to_be_bytes());
    for member in members {
        out.extend_from_slice(&member.access_flags.to_be_bytes());
        out.extend_from_slice(&member.name_index.to_be_bytes());
        out.extend_from_slice(&member.descriptor_index.to_be_bytes());
        write_attributes(out, &member.attributes);
    }
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[RawAttribute]) {
    out.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attribute in attributes {
        out.extend_from_slice(&attribute.name_index.to_be_bytes());
        out.extend_from_slice(&(attribute.data.len() as u32).to_be_bytes());
        out.extend_from_slice(&attribute.data);
    }
}
