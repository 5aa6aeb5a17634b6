//! Constant pool parsing, resolution and interning.
//!
//! The pool preserves the original entry order and raw UTF-8 bytes so that untouched
//! classes re-emit byte-identical. New entries needed by the rewriter (bridge class and
//! method references, string literals for class and field names) are interned at the end
//! of the pool; existing entries are never duplicated.

use rustc_hash::FxHashMap;

use crate::{file::Parser, utils::mutf8, Result};

/// Constant pool tags per the class file format.
mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELD_REF: u8 = 9;
    pub const METHOD_REF: u8 = 10;
    pub const INTERFACE_METHOD_REF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

/// A single constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Modified UTF-8 text; the raw bytes are kept for byte-identical re-emission.
    Utf8 {
        /// Original (or freshly encoded) modified UTF-8 bytes
        raw: Vec<u8>,
        /// Decoded text
        text: String,
    },
    /// 32-bit integer constant
    Integer(i32),
    /// 32-bit float constant, stored as raw bits
    Float(u32),
    /// 64-bit long constant (occupies two pool slots)
    Long(i64),
    /// 64-bit double constant, stored as raw bits (occupies two pool slots)
    Double(u64),
    /// Class reference, pointing at a Utf8 internal name
    Class(u16),
    /// String literal, pointing at a Utf8 entry
    String(u16),
    /// Field reference
    FieldRef {
        /// Class entry of the declaring class
        class: u16,
        /// NameAndType entry
        name_and_type: u16,
    },
    /// Method reference
    MethodRef {
        /// Class entry of the declaring class
        class: u16,
        /// NameAndType entry
        name_and_type: u16,
    },
    /// Interface method reference
    InterfaceMethodRef {
        /// Class entry of the declaring interface
        class: u16,
        /// NameAndType entry
        name_and_type: u16,
    },
    /// Name and descriptor pair
    NameAndType {
        /// Utf8 entry holding the name
        name: u16,
        /// Utf8 entry holding the descriptor
        descriptor: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind (1-9)
        kind: u8,
        /// Referenced pool entry
        reference: u16,
    },
    /// Method type, pointing at a Utf8 descriptor
    MethodType(u16),
    /// Dynamically computed constant
    Dynamic {
        /// Index into the BootstrapMethods attribute
        bootstrap: u16,
        /// NameAndType entry
        name_and_type: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into the BootstrapMethods attribute
        bootstrap: u16,
        /// NameAndType entry
        name_and_type: u16,
    },
    /// Module name
    Module(u16),
    /// Package name
    Package(u16),
    /// Occupies the second slot of a Long or Double entry (and slot zero)
    Placeholder,
}

/// The constant pool of one class file.
///
/// Slot zero and the high halves of `Long`/`Double` entries hold
/// [`Constant::Placeholder`], so entry indexes match class file indexes directly.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    utf8_cache: Option<FxHashMap<String, u16>>,
}

impl ConstantPool {
    /// Create an empty pool (slot zero reserved).
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Placeholder],
            utf8_cache: None,
        }
    }

    /// Parse the constant pool from the current parser position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on an unknown tag and
    /// [`crate::Error::OutOfBounds`] on truncation.
    pub fn parse(parser: &mut Parser<'_>) -> Result<Self> {
        let count = parser.read_be::<u16>()?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Constant::Placeholder);

        while entries.len() < count as usize {
            let tag = parser.read_be::<u8>()?;
            let entry = match tag {
                tag::UTF8 => {
                    let len = parser.read_be::<u16>()?;
                    let raw = parser.take(len as usize)?.to_vec();
                    let text = mutf8::decode(&raw)?;
                    Constant::Utf8 { raw, text }
                }
                tag::INTEGER => Constant::Integer(parser.read_be::<i32>()?),
                tag::FLOAT => Constant::Float(parser.read_be::<u32>()?),
                tag::LONG => Constant::Long(parser.read_be::<i64>()?),
                tag::DOUBLE => Constant::Double(parser.read_be::<u64>()?),
                tag::CLASS => Constant::Class(parser.read_be::<u16>()?),
                tag::STRING => Constant::String(parser.read_be::<u16>()?),
                tag::FIELD_REF => Constant::FieldRef {
                    class: parser.read_be::<u16>()?,
                    name_and_type: parser.read_be::<u16>()?,
                },
                tag::METHOD_REF => Constant::MethodRef {
                    class: parser.read_be::<u16>()?,
                    name_and_type: parser.read_be::<u16>()?,
                },
                tag::INTERFACE_METHOD_REF => Constant::InterfaceMethodRef {
                    class: parser.read_be::<u16>()?,
                    name_and_type: parser.read_be::<u16>()?,
                },
                tag::NAME_AND_TYPE => Constant::NameAndType {
                    name: parser.read_be::<u16>()?,
                    descriptor: parser.read_be::<u16>()?,
                },
                tag::METHOD_HANDLE => Constant::MethodHandle {
                    kind: parser.read_be::<u8>()?,
                    reference: parser.read_be::<u16>()?,
                },
                tag::METHOD_TYPE => Constant::MethodType(parser.read_be::<u16>()?),
                tag::DYNAMIC => Constant::Dynamic {
                    bootstrap: parser.read_be::<u16>()?,
                    name_and_type: parser.read_be::<u16>()?,
                },
                tag::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                    bootstrap: parser.read_be::<u16>()?,
                    name_and_type: parser.read_be::<u16>()?,
                },
                tag::MODULE => Constant::Module(parser.read_be::<u16>()?),
                tag::PACKAGE => Constant::Package(parser.read_be::<u16>()?),
                other => {
                    return Err(malformed_error!(
                        "unknown constant pool tag {} at entry {}",
                        other,
                        entries.len()
                    ))
                }
            };

            let is_wide = matches!(entry, Constant::Long(_) | Constant::Double(_));
            entries.push(entry);
            if is_wide {
                entries.push(Constant::Placeholder);
            }
        }

        Ok(ConstantPool {
            entries,
            utf8_cache: None,
        })
    }

    /// Serialize the pool.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in self.entries.iter().skip(1) {
            match entry {
                Constant::Utf8 { raw, .. } => {
                    out.push(tag::UTF8);
                    out.extend_from_slice(&(raw.len() as u16).to_be_bytes());
                    out.extend_from_slice(raw);
                }
                Constant::Integer(v) => {
                    out.push(tag::INTEGER);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Constant::Float(bits) => {
                    out.push(tag::FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Long(v) => {
                    out.push(tag::LONG);
                    out.extend_from_slice(&v.to_be_bytes());
                }
                Constant::Double(bits) => {
                    out.push(tag::DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Constant::Class(idx) => {
                    out.push(tag::CLASS);
                    out.extend_from_slice(&idx.to_be_bytes());
                }
                Constant::String(idx) => {
                    out.push(tag::STRING);
                    out.extend_from_slice(&idx.to_be_bytes());
                }
                Constant::FieldRef {
                    class,
                    name_and_type,
                } => {
                    out.push(tag::FIELD_REF);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                Constant::MethodRef {
                    class,
                    name_and_type,
                } => {
                    out.push(tag::METHOD_REF);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                Constant::InterfaceMethodRef {
                    class,
                    name_and_type,
                } => {
                    out.push(tag::INTERFACE_METHOD_REF);
                    out.extend_from_slice(&class.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                Constant::NameAndType { name, descriptor } => {
                    out.push(tag::NAME_AND_TYPE);
                    out.extend_from_slice(&name.to_be_bytes());
                    out.extend_from_slice(&descriptor.to_be_bytes());
                }
                Constant::MethodHandle { kind, reference } => {
                    out.push(tag::METHOD_HANDLE);
                    out.push(*kind);
                    out.extend_from_slice(&reference.to_be_bytes());
                }
                Constant::MethodType(idx) => {
                    out.push(tag::METHOD_TYPE);
                    out.extend_from_slice(&idx.to_be_bytes());
                }
                Constant::Dynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    out.push(tag::DYNAMIC);
                    out.extend_from_slice(&bootstrap.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                Constant::InvokeDynamic {
                    bootstrap,
                    name_and_type,
                } => {
                    out.push(tag::INVOKE_DYNAMIC);
                    out.extend_from_slice(&bootstrap.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                Constant::Module(idx) => {
                    out.push(tag::MODULE);
                    out.extend_from_slice(&idx.to_be_bytes());
                }
                Constant::Package(idx) => {
                    out.push(tag::PACKAGE);
                    out.extend_from_slice(&idx.to_be_bytes());
                }
                Constant::Placeholder => {}
            }
        }
    }

    /// Number of pool slots, including slot zero and wide placeholders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the pool holds no entries beyond slot zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Look up an entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the index is out of range.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        self.entries
            .get(index as usize)
            .ok_or_else(|| malformed_error!("constant pool index {} out of range", index))
    }

    /// Resolve a Utf8 entry to its text.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is missing or not Utf8.
    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8 { text, .. } => Ok(text),
            other => Err(malformed_error!(
                "constant pool entry {} is {:?}, expected Utf8",
                index,
                other
            )),
        }
    }

    /// Resolve a Class entry to its internal name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is missing or not a class.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class(name_index) => self.utf8(*name_index),
            other => Err(malformed_error!(
                "constant pool entry {} is {:?}, expected Class",
                index,
                other
            )),
        }
    }

    /// Resolve a field or method reference to `(owner, name, descriptor)`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the entry is not a member reference.
    pub fn member_ref(&self, index: u16) -> Result<(&str, &str, &str)> {
        let (class, name_and_type) = match self.get(index)? {
            Constant::FieldRef {
                class,
                name_and_type,
            }
            | Constant::MethodRef {
                class,
                name_and_type,
            }
            | Constant::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type),
            other => {
                return Err(malformed_error!(
                    "constant pool entry {} is {:?}, expected a member reference",
                    index,
                    other
                ))
            }
        };

        let owner = self.class_name(class)?;
        let (name, descriptor) = match self.get(name_and_type)? {
            Constant::NameAndType { name, descriptor } => {
                (self.utf8(*name)?, self.utf8(*descriptor)?)
            }
            other => {
                return Err(malformed_error!(
                    "constant pool entry {} is {:?}, expected NameAndType",
                    name_and_type,
                    other
                ))
            }
        };

        Ok((owner, name, descriptor))
    }

    fn push(&mut self, entry: Constant) -> Result<u16> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(malformed_error!("constant pool overflow"));
        }
        self.entries.push(entry);
        Ok((self.entries.len() - 1) as u16)
    }

    /// Intern a Utf8 entry, reusing an existing one when present.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn ensure_utf8(&mut self, text: &str) -> Result<u16> {
        if self.utf8_cache.is_none() {
            let mut cache = FxHashMap::default();
            for (index, entry) in self.entries.iter().enumerate() {
                if let Constant::Utf8 { text, .. } = entry {
                    cache.entry(text.clone()).or_insert(index as u16);
                }
            }
            self.utf8_cache = Some(cache);
        }

        if let Some(index) = self.utf8_cache.as_ref().and_then(|c| c.get(text)) {
            return Ok(*index);
        }

        let index = self.push(Constant::Utf8 {
            raw: mutf8::encode(text),
            text: text.to_string(),
        })?;
        if let Some(cache) = self.utf8_cache.as_mut() {
            cache.insert(text.to_string(), index);
        }
        Ok(index)
    }

    /// Intern a Class entry for an internal name.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn ensure_class(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.ensure_utf8(internal_name)?;
        for (index, entry) in self.entries.iter().enumerate() {
            if matches!(entry, Constant::Class(n) if *n == name_index) {
                return Ok(index as u16);
            }
        }
        self.push(Constant::Class(name_index))
    }

    /// Intern a String literal entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn ensure_string(&mut self, text: &str) -> Result<u16> {
        let utf8_index = self.ensure_utf8(text)?;
        for (index, entry) in self.entries.iter().enumerate() {
            if matches!(entry, Constant::String(n) if *n == utf8_index) {
                return Ok(index as u16);
            }
        }
        self.push(Constant::String(utf8_index))
    }

    /// Intern a NameAndType entry.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn ensure_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.ensure_utf8(name)?;
        let descriptor_index = self.ensure_utf8(descriptor)?;
        for (index, entry) in self.entries.iter().enumerate() {
            if matches!(entry, Constant::NameAndType { name, descriptor }
                if *name == name_index && *descriptor == descriptor_index)
            {
                return Ok(index as u16);
            }
        }
        self.push(Constant::NameAndType {
            name: name_index,
            descriptor: descriptor_index,
        })
    }

    /// Intern a Fieldref entry for `owner.name:descriptor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn ensure_field_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let class_index = self.ensure_class(owner)?;
        let nat_index = self.ensure_name_and_type(name, descriptor)?;
        for (index, entry) in self.entries.iter().enumerate() {
            if matches!(entry, Constant::FieldRef { class, name_and_type }
                if *class == class_index && *name_and_type == nat_index)
            {
                return Ok(index as u16);
            }
        }
        self.push(Constant::FieldRef {
            class: class_index,
            name_and_type: nat_index,
        })
    }

    /// Intern a Methodref entry for `owner.name:descriptor`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on pool overflow.
    pub fn ensure_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let class_index = self.ensure_class(owner)?;
        let nat_index = self.ensure_name_and_type(name, descriptor)?;
        for (index, entry) in self.entries.iter().enumerate() {
            if matches!(entry, Constant::MethodRef { class, name_and_type }
                if *class == class_index && *name_and_type == nat_index)
            {
                return Ok(index as u16);
            }
        }
        self.push(Constant::MethodRef {
            class: class_index,
            name_and_type: nat_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_preserves_bytes() {
        let mut pool = ConstantPool::new();
        pool.ensure_utf8("Hello").unwrap();
        pool.ensure_class("java/util/ArrayList").unwrap();
        pool.ensure_method_ref("Foo", "bar", "()V").unwrap();

        let mut bytes = Vec::new();
        pool.write(&mut bytes);

        let mut parser = Parser::new(&bytes);
        let reparsed = ConstantPool::parse(&mut parser).unwrap();

        let mut rewritten = Vec::new();
        reparsed.write(&mut rewritten);
        assert_eq!(bytes, rewritten);
    }

    #[test]
    fn test_interning_reuses_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.ensure_class("java/util/List").unwrap();
        let b = pool.ensure_class("java/util/List").unwrap();
        assert_eq!(a, b);

        let m1 = pool.ensure_method_ref("A", "m", "()V").unwrap();
        let m2 = pool.ensure_method_ref("A", "m", "()V").unwrap();
        assert_eq!(m1, m2);
    }

    #[test]
    fn test_wide_constants_take_two_slots() {
        let mut pool = ConstantPool::new();
        pool.push(Constant::Long(42)).unwrap();
        pool.entries.push(Constant::Placeholder);
        let after = pool.push(Constant::Integer(1)).unwrap();
        assert_eq!(after, 3);

        let mut bytes = Vec::new();
        pool.write(&mut bytes);
        let mut parser = Parser::new(&bytes);
        let reparsed = ConstantPool::parse(&mut parser).unwrap();
        assert!(matches!(reparsed.get(1).unwrap(), Constant::Long(42)));
        assert!(matches!(reparsed.get(3).unwrap(), Constant::Integer(1)));
    }

    #[test]
    fn test_member_ref_resolution() {
        let mut pool = ConstantPool::new();
        let index = pool
            .ensure_method_ref("java/util/Map", "put", "(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;")
            .unwrap();
        let (owner, name, descriptor) = pool.member_ref(index).unwrap();
        assert_eq!(owner, "java/util/Map");
        assert_eq!(name, "put");
        assert!(descriptor.starts_with("(Ljava/lang/Object;"));
    }
}
