//! The built-in known-methods table.
//!
//! Each standard-library container class carries a fixed set of method descriptors
//! classified by what the rewriter does to them. The table is part of the ABI: the
//! debugger relies on which methods are inline-captured to interpret the recorded
//! element shape.
//!
//! A container class outside `java/util` exposes no known methods; everything it
//! overrides falls back to the default bag-diff wrap.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// Internal name of `java/lang/Object`.
pub const OBJECT_CLASS: &str = "java/lang/Object";
/// Internal name of the collection hierarchy root.
pub const COLLECTION_CLASS: &str = "java/util/Collection";
/// Internal name of the map hierarchy root.
pub const MAP_CLASS: &str = "java/util/Map";

const ABSTRACT_COLLECTION_CLASS: &str = "java/util/AbstractCollection";
const ABSTRACT_LIST_CLASS: &str = "java/util/AbstractList";
const ARRAY_LIST_CLASS: &str = "java/util/ArrayList";

/// What the rewriter does to a known method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// No capture, no lock.
    Immutable,
    /// Inline delta keyed off the returned "modified?" boolean
    /// (`Collection.add` / `Collection.remove`).
    DocumentedBool {
        /// `true` for `add`, `false` for `remove`
        is_addition: bool,
    },
    /// Inline delta for `Map.put`: modified iff the returned previous value
    /// differs from the stored value.
    DocumentedPut,
    /// Inline delta for `Map.remove`: modified iff the returned previous value
    /// is non-null.
    DocumentedRemoveKey,
    /// Body replaced by per-element delegation to the bridge `addAll` helper.
    ReplaceableAddAll,
    /// Body replaced by per-element delegation to the bridge `removeAll` helper.
    ReplaceableRemoveAll,
}

impl MethodKind {
    /// Returns true for the two replaceable kinds.
    #[must_use]
    pub fn is_replaceable(&self) -> bool {
        matches!(
            self,
            MethodKind::ReplaceableAddAll | MethodKind::ReplaceableRemoveAll
        )
    }
}

/// A mutator whose contract is fully described by the built-in table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownMethod {
    /// Internal name of the class that contributed this entry.
    pub class_name: String,
    /// Method name concatenated with its descriptor, e.g. `add(Ljava/lang/Object;)Z`.
    pub name_and_desc: String,
    /// The rewrite selected for this method.
    pub kind: MethodKind,
    /// Whether the entry also applies to overrides in subclasses.
    pub applies_to_overridden: bool,
}

impl KnownMethod {
    fn new(class_name: &str, name_and_desc: &str, kind: MethodKind) -> Self {
        // Replaceable rewrites splice in a body that belongs to one exact
        // class; they never apply to overrides.
        let applies_to_overridden = !kind.is_replaceable();
        KnownMethod {
            class_name: class_name.to_string(),
            name_and_desc: name_and_desc.to_string(),
            kind,
            applies_to_overridden,
        }
    }

    /// Whether the entry applies when collected for `class_name`.
    #[must_use]
    pub fn applies_to(&self, class_name: &str) -> bool {
        self.applies_to_overridden || self.class_name == class_name
    }
}

/// The known methods planned for one container class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownMethodsSet {
    methods: FxHashMap<String, KnownMethod>,
}

impl KnownMethodsSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        KnownMethodsSet::default()
    }

    /// Add a method; an existing entry for the same descriptor wins.
    pub fn add(&mut self, method: KnownMethod) {
        self.methods
            .entry(method.name_and_desc.clone())
            .or_insert(method);
    }

    /// Look up by `name + descriptor`.
    #[must_use]
    pub fn get(&self, name_and_desc: &str) -> Option<&KnownMethod> {
        self.methods.get(name_and_desc)
    }

    /// All entries.
    pub fn values(&self) -> impl Iterator<Item = &KnownMethod> {
        self.methods.values()
    }

    /// Returns true if the set holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The built-in table, keyed by internal class name.
pub static KNOWN_METHODS: Lazy<FxHashMap<&'static str, KnownMethodsSet>> = Lazy::new(|| {
    let mut table = FxHashMap::default();

    let mut collection = KnownMethodsSet::new();
    for desc in [
        "size()I",
        "contains(Ljava/lang/Object;)Z",
        "iterator()Ljava/util/Iterator;",
        "toArray()[Ljava/lang/Object;",
        "toArray([Ljava/lang/Object;)[Ljava/lang/Object;",
        "containsAll(Ljava/util/Collection;)Z",
        "toArray(Ljava/util/function/IntFunction;)[Ljava/lang/Object;",
        "spliterator()Ljava/util/Spliterator;",
        "parallelStream()Ljava/util/stream/Stream;",
        "equals(Ljava/lang/Object;)Z",
        "hashCode()I",
    ] {
        collection.add(KnownMethod::new(COLLECTION_CLASS, desc, MethodKind::Immutable));
    }
    collection.add(KnownMethod::new(
        COLLECTION_CLASS,
        "add(Ljava/lang/Object;)Z",
        MethodKind::DocumentedBool { is_addition: true },
    ));
    collection.add(KnownMethod::new(
        COLLECTION_CLASS,
        "remove(Ljava/lang/Object;)Z",
        MethodKind::DocumentedBool { is_addition: false },
    ));
    table.insert(COLLECTION_CLASS, collection);

    let mut abstract_collection = KnownMethodsSet::new();
    abstract_collection.add(KnownMethod::new(
        ABSTRACT_COLLECTION_CLASS,
        "toString()Ljava/lang/String;",
        MethodKind::Immutable,
    ));
    table.insert(ABSTRACT_COLLECTION_CLASS, abstract_collection);

    let mut abstract_list = KnownMethodsSet::new();
    for desc in [
        "indexOf(Ljava/lang/Object;)I",
        "lastIndexOf(Ljava/lang/Object;)I",
        "listIterator()Ljava/util/ListIterator;",
        "listIterator(I)Ljava/util/ListIterator;",
        "subList(II)Ljava/util/List;",
    ] {
        abstract_list.add(KnownMethod::new(ABSTRACT_LIST_CLASS, desc, MethodKind::Immutable));
    }
    table.insert(ABSTRACT_LIST_CLASS, abstract_list);

    let mut array_list = KnownMethodsSet::new();
    for desc in [
        "indexOfRange(Ljava/lang/Object;II)I",
        "lastIndexOfRange(Ljava/lang/Object;II)I",
        "clone()Ljava/lang/Object;",
        "equalsRange(Ljava/util/List;II)Z",
        "equalsArrayList(Ljava/util/ArrayList;)Z",
        "hashCodeRange(II)I",
        "outOfBoundsMsg(I)Ljava/lang/String;",
    ] {
        array_list.add(KnownMethod::new(ARRAY_LIST_CLASS, desc, MethodKind::Immutable));
    }
    array_list.add(KnownMethod::new(
        ARRAY_LIST_CLASS,
        "addAll(Ljava/util/Collection;)Z",
        MethodKind::ReplaceableAddAll,
    ));
    array_list.add(KnownMethod::new(
        ARRAY_LIST_CLASS,
        "removeAll(Ljava/util/Collection;)Z",
        MethodKind::ReplaceableRemoveAll,
    ));
    table.insert(ARRAY_LIST_CLASS, array_list);

    let mut map = KnownMethodsSet::new();
    for desc in [
        "size()I",
        "isEmpty()Z",
        "keySet()Ljava/util/Set;",
        "values()Ljava/util/Collection;",
        "entrySet()Ljava/util/Set;",
        "containsKey(Ljava/lang/Object;)Z",
        "containsValue(Ljava/lang/Object;)Z",
        "equals(Ljava/lang/Object;)Z",
        "hashCode()I",
    ] {
        map.add(KnownMethod::new(MAP_CLASS, desc, MethodKind::Immutable));
    }
    map.add(KnownMethod::new(
        MAP_CLASS,
        "put(Ljava/lang/Object;Ljava/lang/Object;)Ljava/lang/Object;",
        MethodKind::DocumentedPut,
    ));
    map.add(KnownMethod::new(
        MAP_CLASS,
        "remove(Ljava/lang/Object;)Ljava/lang/Object;",
        MethodKind::DocumentedRemoveKey,
    ));
    table.insert(MAP_CLASS, map);

    table
});
