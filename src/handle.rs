//! Handle allocation and per-kind handle tables.
//!
//! A [`Handle`] is the only thing a foreign caller ever holds. It is minted by a
//! [`HandleTable`] from a table-owned counter, never from the address of the
//! object it names, so two handles compare equal exactly when the table minted
//! them for the same registration.
//!
//! # Layout
//!
//! ```text
//!  63        56 55        48 47                                  0
//! ┌────────────┬────────────┬─────────────────────────────────────┐
//! │    kind    │ generation │              sequence               │
//! └────────────┴────────────┴─────────────────────────────────────┘
//! ```
//!
//! The kind tag keeps a gauge handle from resolving in the counter table, the
//! generation keeps handles of a torn-down bridge from resolving in its
//! successor, and the sequence starts at 1. `0` is never minted.
//!
//! # Children
//!
//! Vector children are registered through [`HandleTable::register_child`],
//! which keeps one canonical handle per `(vector, label values)` pair while the
//! child is live. [`HandleTable::remove_child`] drops that handle and runs the
//! vector-side delete under the same write lock, so a concurrent derive never
//! observes a handle whose series is already gone from the vector.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{BridgeError, Result};

/// Raw value of the invalid handle.
pub const INVALID_HANDLE: u64 = 0;

const SEQ_BITS: u32 = 48;
const SEQ_MASK: u64 = (1 << SEQ_BITS) - 1;
const GENERATION_SHIFT: u32 = 48;
const KIND_SHIFT: u32 = 56;

/// The kind of object a handle table stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstrumentKind {
    Gauge = 1,
    GaugeVec = 2,
    Counter = 3,
    CounterVec = 4,
    Summary = 5,
    SummaryVec = 6,
}

impl InstrumentKind {
    /// Tag stored in the top byte of every handle of this kind.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Gauge),
            2 => Some(Self::GaugeVec),
            3 => Some(Self::Counter),
            4 => Some(Self::CounterVec),
            5 => Some(Self::Summary),
            6 => Some(Self::SummaryVec),
            _ => None,
        }
    }

    /// Lowercase name used in logs and errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::GaugeVec => "gauge vec",
            Self::Counter => "counter",
            Self::CounterVec => "counter vec",
            Self::Summary => "summary",
            Self::SummaryVec => "summary vec",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque capability naming one live object inside one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(u64);

impl Handle {
    /// The sentinel returned across the boundary when no object was produced.
    pub const INVALID: Handle = Handle(INVALID_HANDLE);

    /// Wrap a raw value received from a foreign caller.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw value handed to a foreign caller.
    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_invalid(self) -> bool {
        self.0 == INVALID_HANDLE
    }

    /// Kind encoded in the handle, if the tag is one this crate mints.
    pub fn kind(self) -> Option<InstrumentKind> {
        InstrumentKind::from_tag((self.0 >> KIND_SHIFT) as u8)
    }

    /// Generation of the bridge that minted the handle.
    pub const fn generation(self) -> u8 {
        (self.0 >> GENERATION_SHIFT) as u8
    }

    const fn compose(kind: InstrumentKind, generation: u8, seq: u64) -> Self {
        Self(
            ((kind.tag() as u64) << KIND_SHIFT)
                | ((generation as u64) << GENERATION_SHIFT)
                | (seq & SEQ_MASK),
        )
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Identity of a vector child: the vector's handle and the label values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChildKey {
    pub vector: Handle,
    pub labels: Vec<String>,
}

impl ChildKey {
    pub fn new(vector: Handle, labels: Vec<String>) -> Self {
        Self { vector, labels }
    }
}

struct Entry<T> {
    object: T,
    /// Set for vector children so removal can drop the canonical index entry.
    origin: Option<ChildKey>,
}

struct Slots<T> {
    entries: HashMap<Handle, Entry<T>>,
    children: HashMap<ChildKey, Handle>,
}

/// Table mapping handles of one kind to the objects they own.
///
/// Register and remove take the write lock; resolve takes the read lock, so
/// lookups from many foreign threads proceed in parallel.
pub struct HandleTable<T> {
    kind: InstrumentKind,
    generation: u8,
    next: AtomicU64,
    slots: RwLock<Slots<T>>,
}

impl<T: Clone> HandleTable<T> {
    /// Create an empty table for `kind` owned by a bridge of `generation`.
    pub fn new(kind: InstrumentKind, generation: u8) -> Self {
        Self {
            kind,
            generation,
            next: AtomicU64::new(1),
            slots: RwLock::new(Slots {
                entries: HashMap::new(),
                children: HashMap::new(),
            }),
        }
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Whether `handle` carries this table's kind and generation.
    ///
    /// This says nothing about liveness; it only rules out handles that can
    /// never be found here.
    pub fn owns(&self, handle: Handle) -> bool {
        handle.kind() == Some(self.kind) && handle.generation() == self.generation
    }

    fn mint(&self) -> Result<Handle> {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        if seq > SEQ_MASK {
            return Err(BridgeError::HandleSpaceExhausted(self.kind));
        }
        Ok(Handle::compose(self.kind, self.generation, seq))
    }

    /// Take ownership of `object` and return a fresh handle for it.
    pub fn register(&self, object: T) -> Result<Handle> {
        let handle = self.mint()?;
        self.slots.write().entries.insert(
            handle,
            Entry {
                object,
                origin: None,
            },
        );
        Ok(handle)
    }

    /// Return the canonical handle of a vector child, creating the child with
    /// `make` on first use.
    ///
    /// `make` runs under the write lock, which also serializes it against
    /// [`remove_child`](Self::remove_child) for the same table.
    pub fn register_child<F>(&self, key: ChildKey, make: F) -> Result<Handle>
    where
        F: FnOnce() -> Result<T>,
    {
        // Fast path: read lock
        {
            let slots = self.slots.read();
            if let Some(handle) = slots.children.get(&key) {
                return Ok(*handle);
            }
        }

        let mut slots = self.slots.write();

        // Double-check after acquiring write lock
        if let Some(handle) = slots.children.get(&key) {
            return Ok(*handle);
        }

        let object = make()?;
        let handle = self.mint()?;
        slots.children.insert(key.clone(), handle);
        slots.entries.insert(
            handle,
            Entry {
                object,
                origin: Some(key),
            },
        );
        Ok(handle)
    }

    /// Clone out the object registered under `handle`.
    pub fn resolve(&self, handle: Handle) -> Option<T> {
        if !self.owns(handle) {
            return None;
        }
        self.slots
            .read()
            .entries
            .get(&handle)
            .map(|entry| entry.object.clone())
    }

    /// Drop the table's reference to `handle`. Removing an unknown or already
    /// removed handle is a no-op.
    pub fn remove(&self, handle: Handle) -> Option<T> {
        if !self.owns(handle) {
            return None;
        }
        let mut slots = self.slots.write();
        let entry = slots.entries.remove(&handle)?;
        if let Some(origin) = entry.origin {
            slots.children.remove(&origin);
        }
        Some(entry.object)
    }

    /// Remove the canonical handle of a vector child and run `finish` before
    /// releasing the write lock.
    ///
    /// `finish` runs even when no handle was registered for `key`, so series
    /// created outside this table are still deleted from their vector.
    pub fn remove_child<R, F>(&self, key: &ChildKey, finish: F) -> (Option<Handle>, R)
    where
        F: FnOnce() -> R,
    {
        let mut slots = self.slots.write();
        let handle = slots.children.remove(key);
        if let Some(handle) = handle {
            slots.entries.remove(&handle);
        }
        (handle, finish())
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.slots.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.read();
        f.debug_struct("HandleTable")
            .field("kind", &self.kind)
            .field("generation", &self.generation)
            .field("live", &slots.entries.len())
            .field("children", &slots.children.len())
            .finish()
    }
}
