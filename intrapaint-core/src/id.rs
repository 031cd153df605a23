//! # IDs
//! Two flavors of identifier live here:
//!
//! * [`UniqueID<T>`], process-unique IDs namespaced by the type T. Used for things that only need to be
//!   told apart during this run of the program (documents, subscriptions, generation tasks).
//! * [`LayerID`], document-local layer IDs. These are handed out by a counter owned by the document,
//!   so they survive a save/load round trip and are never reused for the lifetime of the document.

// Collection of pending IDs by type.
static ID_SERVER: parking_lot::RwLock<
    std::collections::BTreeMap<std::any::TypeId, std::sync::atomic::AtomicU64>,
> = parking_lot::const_rwlock(std::collections::BTreeMap::new());

/// ID that is guaranteed unique within this execution of the program.
/// IDs with different namespaces may share a value but should not be considered equal.
pub struct UniqueID<T: std::any::Any> {
    id: std::num::NonZeroU64,
    _phantom: std::marker::PhantomData<fn() -> T>,
}
impl<T: std::any::Any> Clone for UniqueID<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: std::any::Any> Copy for UniqueID<T> {}
impl<T: std::any::Any> PartialEq for UniqueID<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T: std::any::Any> Eq for UniqueID<T> {}
impl<T: std::any::Any> std::hash::Hash for UniqueID<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
impl<T: std::any::Any> UniqueID<T> {
    /// Get the raw numeric value of this ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id.get()
    }
    fn allocate() -> Self {
        let ty = std::any::TypeId::of::<T>();
        let value = {
            let read = ID_SERVER.upgradable_read();
            if let Some(atomic) = read.get(&ty) {
                atomic.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            } else {
                // First ID of this namespace. Rare, so take the exclusive path.
                let mut write = parking_lot::RwLockUpgradableReadGuard::upgrade(read);
                write
                    .entry(ty)
                    .or_insert_with(|| std::sync::atomic::AtomicU64::new(1))
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            }
        };
        // A u64 counter incremented once per allocation will not wrap in practice.
        // Start is 1, so zero is never observed unless it does.
        let id = std::num::NonZeroU64::new(value).unwrap_or_else(|| {
            log::error!("{} ID overflow!", std::any::type_name::<T>());
            std::process::abort()
        });
        Self {
            id,
            _phantom: std::marker::PhantomData,
        }
    }
}
impl<T: std::any::Any> Default for UniqueID<T> {
    fn default() -> Self {
        Self::allocate()
    }
}
impl<T: std::any::Any> std::fmt::Display for UniqueID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{}",
            std::any::type_name::<T>().rsplit("::").next().unwrap_or("?"),
            self.id
        )
    }
}
impl<T: std::any::Any> std::fmt::Debug for UniqueID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

/// Identifies a layer within one document.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct LayerID(u64);
impl LayerID {
    /// The root group of every document. Never handed out by a [`LayerIDServer`].
    pub const ROOT: Self = Self(0);
    /// The document's selection mask. Not part of the layer tree.
    pub const SELECTION: Self = Self(u64::MAX);
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}
impl std::fmt::Display for LayerID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Layer#{}", self.0)
    }
}

/// Monotonic source of [`LayerID`]s. Never rewinds, even when the creation of a layer is undone,
/// so an ID seen once is never seen attached to a different layer.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LayerIDServer {
    next: u64,
}
impl Default for LayerIDServer {
    fn default() -> Self {
        Self { next: 1 }
    }
}
impl LayerIDServer {
    pub fn allocate(&mut self) -> LayerID {
        let id = LayerID(self.next);
        self.next += 1;
        id
    }
    /// Make sure the server will never hand out `id` or anything below it.
    /// Used when restoring a document.
    pub fn reserve_through(&mut self, id: LayerID) {
        self.next = self.next.max(id.0.saturating_add(1));
    }
    #[must_use]
    pub fn peek(&self) -> u64 {
        self.next
    }
}
