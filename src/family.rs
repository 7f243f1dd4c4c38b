//! Handle bookkeeping for one instrument kind and its vector form.
//!
//! A [`Family`] pairs the scalar table (plain instruments and vector children)
//! with the vector table of the same kind. The vector owns its children; the
//! scalar table only holds clones that share the child's series, registered
//! under one canonical handle per `(vector, label values)` while the child is
//! live.

use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::handle::{ChildKey, Handle, HandleTable, InstrumentKind};
use crate::metrics::LabeledFamily;

pub(crate) struct Family<V: LabeledFamily> {
    scalars: HandleTable<V::Child>,
    vectors: HandleTable<V>,
}

impl<V: LabeledFamily> Family<V> {
    pub(crate) fn new(scalar: InstrumentKind, vector: InstrumentKind, generation: u8) -> Self {
        Self {
            scalars: HandleTable::new(scalar, generation),
            vectors: HandleTable::new(vector, generation),
        }
    }

    pub(crate) fn scalar_kind(&self) -> InstrumentKind {
        self.scalars.kind()
    }

    pub(crate) fn vector_kind(&self) -> InstrumentKind {
        self.vectors.kind()
    }

    pub(crate) fn register_scalar(&self, instrument: V::Child) -> Result<Handle> {
        self.scalars.register(instrument)
    }

    pub(crate) fn register_vector(&self, vector: V) -> Result<Handle> {
        self.vectors.register(vector)
    }

    pub(crate) fn scalar(&self, handle: Handle) -> Option<V::Child> {
        self.scalars.resolve(handle)
    }

    /// Get or create the child of `vector` for `labels` and return its
    /// canonical scalar handle.
    pub(crate) fn derive(&self, vector: Handle, labels: Vec<String>) -> Result<Handle> {
        let family = self.resolve_vector(vector)?;
        let values = labels.clone();
        self.scalars
            .register_child(ChildKey::new(vector, labels), move || {
                let vals: Vec<&str> = values.iter().map(String::as_str).collect();
                Ok(family.child(&vals)?)
            })
    }

    /// Delete the child of `vector` for `labels`, invalidating its handle.
    ///
    /// Returns whether the vector had such a series.
    pub(crate) fn delete(&self, vector: Handle, labels: Vec<String>) -> Result<bool> {
        let family = self.resolve_vector(vector)?;
        let key = ChildKey::new(vector, labels);
        let (handle, deleted) = self.scalars.remove_child(&key, || {
            let vals: Vec<&str> = key.labels.iter().map(String::as_str).collect();
            family.delete(&vals)
        });

        match deleted {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!(
                    kind = %self.vector_kind(),
                    %vector,
                    handle = ?handle,
                    %e,
                    "no series to delete"
                );
                Ok(false)
            }
        }
    }

    /// Live handles in the scalar and vector tables.
    pub(crate) fn live(&self) -> (usize, usize) {
        (self.scalars.len(), self.vectors.len())
    }

    fn resolve_vector(&self, vector: Handle) -> Result<V> {
        self.vectors
            .resolve(vector)
            .ok_or(BridgeError::UnknownHandle {
                kind: self.vector_kind(),
                handle: vector.raw(),
            })
    }
}

impl<V: LabeledFamily> std::fmt::Debug for Family<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Family")
            .field("scalars", &self.scalars)
            .field("vectors", &self.vectors)
            .finish()
    }
}
