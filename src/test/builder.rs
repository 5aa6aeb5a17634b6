//! Programmatic construction of small class files for tests.

use crate::classfile::{attributes, pool::ConstantPool, ClassFile, MemberInfo, RawAttribute};

/// Builds a minimal class file with the given members.
///
/// The builder owns its constant pool from the start, so fixtures can intern
/// field and method references first ([`ClassBuilder::field_ref`],
/// [`ClassBuilder::method_ref`]) and embed the returned indexes in raw method
/// bytecode. Every method gets a generous frame (`max_stack`/`max_locals` of 8)
/// so fixtures don't have to compute one.
pub struct ClassBuilder {
    name: String,
    super_name: String,
    interfaces: Vec<String>,
    fields: Vec<(u16, String, String)>,
    methods: Vec<(u16, String, String, Vec<u8>)>,
    nest_members: Vec<String>,
    nest_host: Option<String>,
    inner_classes: Vec<String>,
    pool: ConstantPool,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            super_name: "java/lang/Object".to_string(),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            nest_members: Vec::new(),
            nest_host: None,
            inner_classes: Vec::new(),
            pool: ConstantPool::new(),
        }
    }

    pub fn super_class(mut self, name: &str) -> Self {
        self.super_name = name.to_string();
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        self.interfaces.push(name.to_string());
        self
    }

    pub fn field(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.fields
            .push((access, name.to_string(), descriptor.to_string()));
        self
    }

    pub fn method(mut self, access: u16, name: &str, descriptor: &str, code: &[u8]) -> Self {
        self.methods
            .push((access, name.to_string(), descriptor.to_string(), code.to_vec()));
        self
    }

    /// Add an abstract method (no `Code` attribute).
    pub fn abstract_method(mut self, access: u16, name: &str, descriptor: &str) -> Self {
        self.methods
            .push((access, name.to_string(), descriptor.to_string(), Vec::new()));
        self
    }

    pub fn nest_member(mut self, name: &str) -> Self {
        self.nest_members.push(name.to_string());
        self
    }

    pub fn nest_host(mut self, name: &str) -> Self {
        self.nest_host = Some(name.to_string());
        self
    }

    pub fn inner_class(mut self, name: &str) -> Self {
        self.inner_classes.push(name.to_string());
        self
    }

    /// Intern a field reference for use in fixture bytecode.
    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.pool.ensure_field_ref(owner, name, descriptor).unwrap()
    }

    /// Intern a method reference for use in fixture bytecode.
    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.pool.ensure_method_ref(owner, name, descriptor).unwrap()
    }

    pub fn build(mut self) -> Vec<u8> {
        let this_class = self.pool.ensure_class(&self.name).unwrap();
        let super_class = self.pool.ensure_class(&self.super_name).unwrap();
        let interfaces = self
            .interfaces
            .iter()
            .map(|i| self.pool.ensure_class(i).unwrap())
            .collect();

        let fields = {
            let pool = &mut self.pool;
            self.fields
                .iter()
                .map(|(access, name, descriptor)| MemberInfo {
                    access_flags: *access,
                    name_index: pool.ensure_utf8(name).unwrap(),
                    descriptor_index: pool.ensure_utf8(descriptor).unwrap(),
                    attributes: Vec::new(),
                })
                .collect()
        };

        let code_name = self.pool.ensure_utf8(attributes::CODE).unwrap();
        let methods = {
            let pool = &mut self.pool;
            self.methods
                .iter()
                .map(|(access, name, descriptor, code)| {
                    let mut attrs = Vec::new();
                    if !code.is_empty() {
                        let mut data = Vec::new();
                        data.extend_from_slice(&8u16.to_be_bytes()); // max_stack
                        data.extend_from_slice(&8u16.to_be_bytes()); // max_locals
                        data.extend_from_slice(&(code.len() as u32).to_be_bytes());
                        data.extend_from_slice(code);
                        data.extend_from_slice(&0u16.to_be_bytes()); // handlers
                        data.extend_from_slice(&0u16.to_be_bytes()); // attributes
                        attrs.push(RawAttribute {
                            name_index: code_name,
                            data,
                        });
                    }
                    MemberInfo {
                        access_flags: *access,
                        name_index: pool.ensure_utf8(name).unwrap(),
                        descriptor_index: pool.ensure_utf8(descriptor).unwrap(),
                        attributes: attrs,
                    }
                })
                .collect()
        };

        let mut class_attrs = Vec::new();
        if let Some(host) = &self.nest_host {
            let host_index = self.pool.ensure_class(host).unwrap();
            class_attrs.push(RawAttribute {
                name_index: self.pool.ensure_utf8(attributes::NEST_HOST).unwrap(),
                data: host_index.to_be_bytes().to_vec(),
            });
        }
        if !self.nest_members.is_empty() {
            let mut data = (self.nest_members.len() as u16).to_be_bytes().to_vec();
            for member in &self.nest_members.clone() {
                data.extend_from_slice(&self.pool.ensure_class(member).unwrap().to_be_bytes());
            }
            class_attrs.push(RawAttribute {
                name_index: self.pool.ensure_utf8(attributes::NEST_MEMBERS).unwrap(),
                data,
            });
        }
        if !self.inner_classes.is_empty() {
            let mut data = (self.inner_classes.len() as u16).to_be_bytes().to_vec();
            for inner in &self.inner_classes.clone() {
                data.extend_from_slice(&self.pool.ensure_class(inner).unwrap().to_be_bytes());
                data.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // outer, name, access
            }
            class_attrs.push(RawAttribute {
                name_index: self.pool.ensure_utf8(attributes::INNER_CLASSES).unwrap(),
                data,
            });
        }

        let class = ClassFile {
            minor_version: 0,
            major_version: 52,
            pool: self.pool,
            access_flags: 0x0021, // public super
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes: class_attrs,
        };
        class.to_bytes()
    }
}
