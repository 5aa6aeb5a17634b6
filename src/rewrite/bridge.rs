//! Names and descriptors of the bridge callbacks that rewritten bytecode invokes.
//!
//! The bridge is a small class injected into the target process; its static methods
//! forward into the engine's hot-path entry points. Everything here is ABI: the
//! rewriter emits `invokestatic` references against these exact names, and captured
//! stacks are filtered by [`AGENT_PACKAGE`].

/// Internal name of the bridge class the rewriter calls into.
pub const BRIDGE_CLASS: &str = "mutscope/agent/AgentBridge";
/// Internal name of the per-element delegation helpers for `addAll`/`removeAll`.
pub const HELPERS_CLASS: &str = "mutscope/agent/CollectionHelpers";
/// Binary package prefix excluded from captured stacks.
pub const AGENT_PACKAGE: &str = "mutscope.agent";

/// `captureFieldModification(value, owner, className, fieldName, saveStack)`.
pub const CAPTURE_FIELD_MODIFICATION: (&str, &str) = (
    "captureFieldModification",
    "(Ljava/lang/Object;Ljava/lang/Object;Ljava/lang/String;Ljava/lang/String;Z)V",
);

/// `captureCollectionModification(shouldCapture, modified, container, element, isAddition)`.
pub const CAPTURE_MODIFICATION_INLINE: (&str, &str) = (
    "captureCollectionModification",
    "(ZZLjava/lang/Object;Ljava/lang/Object;Z)V",
);

/// `captureCollectionModification(beforeSnapshot, container)`.
pub const CAPTURE_MODIFICATION_DEFAULT: (&str, &str) = (
    "captureCollectionModification",
    "(Lmutscope/agent/Snapshot;Ljava/lang/Object;)V",
);

/// `onCaptureStart(container, synchronize) -> outermost?`.
pub const ON_CAPTURE_START: (&str, &str) = ("onCaptureStart", "(Ljava/lang/Object;Z)Z");

/// `onCaptureStart(container, copiesMap)` for the field-op tracker.
pub const ON_CAPTURE_START_COPIES: (&str, &str) = (
    "onCaptureStart",
    "(Ljava/lang/Object;Ljava/util/IdentityHashMap;)V",
);

/// `onCaptureEnd(container, synchronize)`.
pub const ON_CAPTURE_END: (&str, &str) = ("onCaptureEnd", "(Ljava/lang/Object;Z)V");

/// `onCaptureEnd(copiesMap)` for the field-op tracker.
pub const ON_CAPTURE_END_COPIES: (&str, &str) =
    ("onCaptureEnd", "(Ljava/util/IdentityHashMap;)V");

/// `captureCollectionCopy(shouldCapture, container) -> snapshot`.
pub const CAPTURE_COPY: (&str, &str) = (
    "captureCollectionCopy",
    "(ZLjava/lang/Object;)Lmutscope/agent/Snapshot;",
);

/// `getCopiesStorage() -> empty identity map`.
pub const GET_COPIES_STORAGE: (&str, &str) =
    ("getCopiesStorage", "()Ljava/util/IdentityHashMap;");

/// `createEntry(key, value) -> entry wrapper`.
pub const CREATE_ENTRY: (&str, &str) = (
    "createEntry",
    "(Ljava/lang/Object;Ljava/lang/Object;)Lmutscope/agent/Entry;",
);

/// `CollectionHelpers.addAll(collection, elements) -> changed?`.
pub const HELPER_ADD_ALL: (&str, &str) = (
    "addAll",
    "(Ljava/util/Collection;Ljava/util/Collection;)Z",
);

/// `CollectionHelpers.removeAll(collection, elements) -> changed?`.
pub const HELPER_REMOVE_ALL: (&str, &str) = (
    "removeAll",
    "(Ljava/util/Collection;Ljava/util/Collection;)Z",
);

/// Constructor method name.
pub const CONSTRUCTOR_NAME: &str = "<init>";
