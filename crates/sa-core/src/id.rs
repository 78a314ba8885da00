use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global string interner for node handles.
static INTERNER: LazyLock<ThreadedRodeo> = LazyLock::new(ThreadedRodeo::default);

/// Session-local handle of a node in the scene graph.
/// Internally a `Spur` index: 4 bytes, Copy, Eq, Hash in O(1).
///
/// Handles are never persisted. Identity across export/import cycles is
/// carried by [`InternalId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(Spur);

impl NodeId {
    /// Intern a string as a NodeId, or return the existing one.
    pub fn intern(s: &str) -> Self {
        NodeId(INTERNER.get_or_intern(s))
    }

    /// Resolve back to a string slice.
    pub fn as_str(&self) -> &str {
        INTERNER.resolve(&self.0)
    }

    /// Generate a unique handle with a kind prefix (e.g. `mesh_4`, `group_7`).
    pub fn with_prefix(prefix: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::intern(&format!("{prefix}_{n}"))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.as_str())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.as_str())
    }
}

/// Persistent identity of a logical object, the third component of the
/// reconciliation key. Assigned once on first creation and written to the
/// exported document as `resource.id`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId(u64);

static NEXT_INTERNAL: AtomicU64 = AtomicU64::new(1);

impl InternalId {
    /// Allocate an id never handed out before in this process.
    pub fn fresh() -> Self {
        InternalId(NEXT_INTERNAL.fetch_add(1, Ordering::Relaxed))
    }

    /// Adopt an id read from a document. Later `fresh()` calls skip past it.
    pub fn adopt(raw: u64) -> Self {
        NEXT_INTERNAL.fetch_max(raw.saturating_add(1), Ordering::Relaxed);
        InternalId(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Serialize for InternalId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for InternalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        Ok(InternalId::adopt(raw))
    }
}
