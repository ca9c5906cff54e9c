use std::{collections::BTreeMap, fmt, marker::PhantomData};

/// Identifies a resource that was created in a [`SoftwareContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    VertexBuffer,
    ShaderProgram,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub kind: ResourceKind,
    pub byte_size: usize,
}

/// Resource context of the sample asset kinds. It stands in for a graphics device and only
/// keeps track of the resources that would have been created.
///
/// The context can't be sent to another thread so it stays with the thread that pumps the cache.
#[derive(Debug, Default)]
pub struct SoftwareContext {
    next_id: u64,
    resources: BTreeMap<ResourceId, ResourceInfo>,
    _not_send: PhantomData<*const ()>,
}

impl SoftwareContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resource and returns its id. Ids are handed out sequentially starting at 1.
    pub fn allocate(&mut self, kind: ResourceKind, byte_size: usize) -> ResourceId {
        self.next_id += 1;
        let id = ResourceId(self.next_id);
        self.resources.insert(id, ResourceInfo { kind, byte_size });
        id
    }

    pub fn release(&mut self, id: ResourceId) -> bool {
        self.resources.remove(&id).is_some()
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceInfo> {
        self.resources.get(&id)
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.resources.values().map(|info| info.byte_size).sum()
    }
}
