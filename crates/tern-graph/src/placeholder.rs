use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tern_core::{ElemKind, Shape, TensorType};

/// Identity of a placeholder.
///
/// Pairs the owning module's process-unique id with the placeholder's slot
/// in that module, so ids from different modules never compare equal even
/// when the names do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderId {
    module: u64,
    index: usize,
}

impl PlaceholderId {
    pub(crate) fn new(module: ModuleId, index: usize) -> Self {
        Self {
            module: module.0,
            index,
        }
    }

    /// The module this placeholder was declared in.
    pub fn module(&self) -> ModuleId {
        ModuleId(self.module)
    }
}

/// Process-unique module identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Generate a new unique module ID (global atomic counter).
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        ModuleId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A named input/output slot declared in a module.
///
/// This is a descriptor, cheap to clone: the module keeps the canonical copy
/// and hands clones to callers, who use them to build nodes and to bind
/// tensors into a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    id: PlaceholderId,
    name: String,
    ty: TensorType,
    trainable: bool,
}

impl Placeholder {
    pub(crate) fn new(id: PlaceholderId, name: String, ty: TensorType, trainable: bool) -> Self {
        Self {
            id,
            name,
            ty,
            trainable,
        }
    }

    pub fn id(&self) -> PlaceholderId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TensorType {
        &self.ty
    }

    pub fn elem_kind(&self) -> ElemKind {
        self.ty.kind
    }

    pub fn shape(&self) -> &Shape {
        &self.ty.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.ty.dims()
    }

    /// Whether training may update this placeholder's tensor.
    pub fn is_trainable(&self) -> bool {
        self.trainable
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}: {}", self.name, self.ty)
    }
}
