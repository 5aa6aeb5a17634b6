//! Shared fixtures for the integration tests: class synthesis through the public
//! class file API, an in-memory retransformation host, and scripted target objects.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use mutscope::{
    classfile::{attributes, pool::ConstantPool, ClassFile, MemberInfo, RawAttribute},
    prelude::*,
};

/// Assemble a minimal class file with a fresh constant pool.
pub fn build_class(
    name: &str,
    super_name: &str,
    fields: &[(u16, &str, &str)],
    methods: &[(u16, &str, &str, Vec<u8>)],
) -> Vec<u8> {
    build_class_in(ConstantPool::new(), name, super_name, &[], fields, methods)
}

/// Assemble a minimal class file in a pre-populated pool, so fixture bytecode can
/// refer to entries interned beforehand. `methods` are
/// `(access, name, descriptor, code)`.
pub fn build_class_in(
    mut pool: ConstantPool,
    name: &str,
    super_name: &str,
    interfaces: &[&str],
    fields: &[(u16, &str, &str)],
    methods: &[(u16, &str, &str, Vec<u8>)],
) -> Vec<u8> {
    let this_class = pool.ensure_class(name).unwrap();
    let super_class = pool.ensure_class(super_name).unwrap();
    let interfaces = interfaces
        .iter()
        .map(|i| pool.ensure_class(i).unwrap())
        .collect();

    let fields = fields
        .iter()
        .map(|(access, name, descriptor)| MemberInfo {
            access_flags: *access,
            name_index: pool.ensure_utf8(name).unwrap(),
            descriptor_index: pool.ensure_utf8(descriptor).unwrap(),
            attributes: Vec::new(),
        })
        .collect();

    let code_name = pool.ensure_utf8(attributes::CODE).unwrap();
    let methods = methods
        .iter()
        .map(|(access, name, descriptor, code)| {
            let mut data = Vec::new();
            data.extend_from_slice(&8u16.to_be_bytes());
            data.extend_from_slice(&8u16.to_be_bytes());
            data.extend_from_slice(&(code.len() as u32).to_be_bytes());
            data.extend_from_slice(code);
            data.extend_from_slice(&0u16.to_be_bytes());
            data.extend_from_slice(&0u16.to_be_bytes());
            MemberInfo {
                access_flags: *access,
                name_index: pool.ensure_utf8(name).unwrap(),
                descriptor_index: pool.ensure_utf8(descriptor).unwrap(),
                attributes: vec![RawAttribute {
                    name_index: code_name,
                    data,
                }],
            }
        })
        .collect();

    ClassFile {
        minor_version: 0,
        major_version: 52,
        pool,
        access_flags: 0x0021,
        this_class,
        super_class,
        interfaces,
        fields,
        methods,
        attributes: Vec::new(),
    }
    .to_bytes()
}

/// In-memory host replaying the JVMTI retransform flow against the engine.
#[derive(Default)]
pub struct MockHost {
    classes: Mutex<HashMap<String, Vec<u8>>>,
    unmodifiable: Mutex<HashSet<String>>,
    engine: OnceLock<Weak<Engine>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(MockHost::default())
    }

    pub fn define(&self, internal_name: &str, bytes: Vec<u8>) {
        self.classes
            .lock()
            .unwrap()
            .insert(internal_name.to_string(), bytes);
    }

    pub fn attach(&self, engine: &Arc<Engine>) {
        let _ = self.engine.set(Arc::downgrade(engine));
    }

    pub fn mark_unmodifiable(&self, internal_name: &str) {
        self.unmodifiable
            .lock()
            .unwrap()
            .insert(internal_name.to_string());
    }

    pub fn bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.classes.lock().unwrap().get(internal_name).cloned()
    }
}

impl ClassHost for MockHost {
    fn loaded_classes(&self) -> Vec<String> {
        self.classes.lock().unwrap().keys().cloned().collect()
    }

    fn class_bytes(&self, internal_name: &str) -> Option<Vec<u8>> {
        self.bytes(internal_name)
    }

    fn retransform(&self, internal_name: &str) -> mutscope::Result<()> {
        if self.unmodifiable.lock().unwrap().contains(internal_name) {
            return Err(mutscope::Error::UnmodifiableClass(
                internal_name.to_string(),
            ));
        }
        let Some(engine) = self.engine.get().and_then(Weak::upgrade) else {
            return Ok(());
        };
        let Some(bytes) = self.bytes(internal_name) else {
            return Ok(());
        };
        if let Some(rewritten) = engine.transform(internal_name, &bytes) {
            self.define(internal_name, rewritten);
        }
        Ok(())
    }
}

/// A container instance of the simulated target program.
pub struct TestContainer {
    id: ObjectId,
    class_name: String,
    contents: Mutex<ContainerContents>,
}

impl TestContainer {
    pub fn collection(id: ObjectId, class_name: &str) -> Self {
        TestContainer {
            id,
            class_name: class_name.to_string(),
            contents: Mutex::new(ContainerContents::Collection(Vec::new())),
        }
    }

    pub fn map(id: ObjectId, class_name: &str) -> Self {
        TestContainer {
            id,
            class_name: class_name.to_string(),
            contents: Mutex::new(ContainerContents::Map(Vec::new())),
        }
    }

    pub fn add(&self, element: ObjectId) -> bool {
        match &mut *self.contents.lock().unwrap() {
            ContainerContents::Collection(elements) => {
                elements.push(element);
                true
            }
            ContainerContents::Map(_) => false,
        }
    }

    pub fn remove(&self, element: ObjectId) -> bool {
        match &mut *self.contents.lock().unwrap() {
            ContainerContents::Collection(elements) => {
                match elements.iter().position(|e| *e == element) {
                    Some(index) => {
                        elements.remove(index);
                        true
                    }
                    None => false,
                }
            }
            ContainerContents::Map(_) => false,
        }
    }

    pub fn put(&self, key: ObjectId, value: ObjectId) -> Option<ObjectId> {
        match &mut *self.contents.lock().unwrap() {
            ContainerContents::Map(entries) => {
                for entry in entries.iter_mut() {
                    if entry.0 == key {
                        return Some(std::mem::replace(&mut entry.1, value));
                    }
                }
                entries.push((key, value));
                None
            }
            ContainerContents::Collection(_) => None,
        }
    }

    pub fn remove_key(&self, key: ObjectId) -> Option<ObjectId> {
        match &mut *self.contents.lock().unwrap() {
            ContainerContents::Map(entries) => entries
                .iter()
                .position(|(k, _)| *k == key)
                .map(|index| entries.remove(index).1),
            ContainerContents::Collection(_) => None,
        }
    }
}

impl ContainerAccess for TestContainer {
    fn identity(&self) -> ObjectId {
        self.id
    }

    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn contents(&self) -> ContainerContents {
        self.contents.lock().unwrap().clone()
    }
}

/// A stack provider replaying fixed frames.
pub struct ScriptedStackProvider(pub Vec<StackFrame>);

impl StackProvider for ScriptedStackProvider {
    fn capture(&self) -> mutscope::Result<Vec<StackFrame>> {
        Ok(self.0.clone())
    }
}

/// Engine + host wired together, with one field-owner class defined:
/// `com/example/Foo` declaring `Ljava/util/List; items` and tracking enabled.
pub fn engine_with_tracked_field() -> (Arc<Engine>, Arc<MockHost>) {
    let host = MockHost::new();
    host.define(
        "com/example/Foo",
        build_class(
            "com/example/Foo",
            "java/lang/Object",
            &[(0x0002, "items", "Ljava/util/List;")],
            &[],
        ),
    );

    let engine = Engine::new(host.clone(), Arc::new(NullStackProvider));
    host.attach(&engine);

    engine.set_tracking_enabled("com.example.Foo", "items", true);
    engine.add_field_to_tracked(
        "com.example.Foo",
        "items",
        "Ljava/util/List;",
        &["com.example.Foo"],
    );
    (engine, host)
}
