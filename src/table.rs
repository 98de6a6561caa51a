//! Flat row-major embedding storage with tombstones and batched gather.
//!
//! All vectors live in one contiguous `Vec<f32>` of `slots * dim` floats.
//! Row ids are stable handles: an id keeps resolving to the same vector
//! across tombstoning and compaction via an id-to-slot map. Tombstoned rows
//! keep their slot in the backing store until [`EmbeddingTable::compact`].

use crate::pool::ScratchBuffer;
use ahash::{AHashMap, AHashSet};

/// Stable handle to a row in the table.
pub type RowId = u32;

/// Errors from [`EmbeddingTable::insert`].
#[derive(Debug, PartialEq)]
pub enum InsertError {
    /// The vector's length does not match the table dimension.
    DimensionMismatch { expected: usize, got: usize },
    /// A component is NaN or infinite; the table stays unchanged.
    InvalidComponent { index: usize, value: f32 },
}

impl std::fmt::Display for InsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsertError::DimensionMismatch { expected, got } => {
                write!(f, "vector dimension mismatch: expected {}, got {}", expected, got)
            }
            InsertError::InvalidComponent { index, value } => {
                write!(f, "non-finite component {} at index {}", value, index)
            }
        }
    }
}

impl std::error::Error for InsertError {}

/// Errors from row lookups during `tombstone` and `gather`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    RowNotFound { id: RowId },
    RowTombstoned { id: RowId },
}

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupError::RowNotFound { id } => write!(f, "row {} not found", id),
            LookupError::RowTombstoned { id } => write!(f, "row {} is tombstoned", id),
        }
    }
}

impl std::error::Error for LookupError {}

/// Flat row-major storage of fixed-dimension f32 vectors.
pub struct EmbeddingTable {
    /// All rows concatenated, `slot_ids.len() * dim` floats.
    data: Vec<f32>,
    /// Row id occupying each slot, in slot order.
    slot_ids: Vec<RowId>,
    /// Stable id to current slot index.
    id_to_slot: AHashMap<RowId, usize>,
    /// Logically deleted rows whose slots await compaction.
    tombstones: AHashSet<RowId>,
    dim: usize,
    next_id: RowId,
}

impl EmbeddingTable {
    /// Create an empty table for vectors of `dim` components.
    ///
    /// # Panics
    /// Panics if `dim` is zero.
    pub fn new(dim: usize) -> Self {
        Self::with_capacity(dim, 0)
    }

    /// Create an empty table preallocated for `rows` vectors.
    pub fn with_capacity(dim: usize, rows: usize) -> Self {
        assert!(dim > 0, "dimension must be non-zero");
        Self {
            data: Vec::with_capacity(rows * dim),
            slot_ids: Vec::with_capacity(rows),
            id_to_slot: AHashMap::with_capacity(rows),
            tombstones: AHashSet::new(),
            dim,
            next_id: 0,
        }
    }

    /// Append a row. Every component must be finite.
    pub fn insert(&mut self, vector: &[f32]) -> Result<RowId, InsertError> {
        if vector.len() != self.dim {
            return Err(InsertError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        if let Some((index, &value)) = vector.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(InsertError::InvalidComponent { index, value });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.id_to_slot.insert(id, self.slot_ids.len());
        self.slot_ids.push(id);
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Mark a row as logically deleted. Its slot is retained until
    /// [`compact`](Self::compact).
    pub fn tombstone(&mut self, id: RowId) -> Result<(), LookupError> {
        if !self.id_to_slot.contains_key(&id) {
            return Err(LookupError::RowNotFound { id });
        }
        if !self.tombstones.insert(id) {
            return Err(LookupError::RowTombstoned { id });
        }
        Ok(())
    }

    /// Vector for `id`, including tombstoned rows whose slots still exist.
    pub fn row(&self, id: RowId) -> Option<&[f32]> {
        self.id_to_slot.get(&id).map(|&slot| {
            let start = slot * self.dim;
            &self.data[start..start + self.dim]
        })
    }

    /// Copy the given rows, in order, into contiguous positions of `out` and
    /// set its logical length to `ids.len() * dim`.
    ///
    /// Rejects unknown and tombstoned ids even though callers are expected to
    /// have filtered already; on error `out` holds no meaningful data.
    ///
    /// # Panics
    /// Panics if `out` is too small for `ids.len()` rows, which indicates a
    /// mis-sized rent by the caller.
    pub fn gather(&self, ids: &[RowId], out: &mut ScratchBuffer) -> Result<(), LookupError> {
        let needed = ids.len() * self.dim;
        assert!(
            out.capacity() >= needed,
            "scratch capacity {} too small for {} rows of dim {}",
            out.capacity(),
            ids.len(),
            self.dim
        );

        out.set_logical_len(0);
        let dst = out.space();
        for (i, &id) in ids.iter().enumerate() {
            let slot = *self
                .id_to_slot
                .get(&id)
                .ok_or(LookupError::RowNotFound { id })?;
            if self.tombstones.contains(&id) {
                return Err(LookupError::RowTombstoned { id });
            }
            let src = slot * self.dim;
            dst[i * self.dim..(i + 1) * self.dim]
                .copy_from_slice(&self.data[src..src + self.dim]);
        }
        out.set_logical_len(needed);
        Ok(())
    }

    /// Copy every live row, in slot order, into contiguous positions of
    /// `out` and set its logical length to `live_len() * dim`. Returns the
    /// number of rows copied; their order matches [`live_ids`](Self::live_ids),
    /// so no id list has to be materialized for a full scan.
    ///
    /// # Panics
    /// Panics if `out` is too small for every live row, which indicates a
    /// mis-sized rent by the caller.
    pub fn gather_live(&self, out: &mut ScratchBuffer) -> usize {
        let live = self.live_len();
        let needed = live * self.dim;
        assert!(
            out.capacity() >= needed,
            "scratch capacity {} too small for {} live rows of dim {}",
            out.capacity(),
            live,
            self.dim
        );

        out.set_logical_len(0);
        let dst = out.space();
        let mut written = 0;
        for (slot, &id) in self.slot_ids.iter().enumerate() {
            if self.tombstones.contains(&id) {
                continue;
            }
            let src = slot * self.dim;
            dst[written * self.dim..(written + 1) * self.dim]
                .copy_from_slice(&self.data[src..src + self.dim]);
            written += 1;
        }
        out.set_logical_len(needed);
        written
    }

    /// Ids of all live (non-tombstoned) rows, in insertion order.
    pub fn live_ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.slot_ids
            .iter()
            .copied()
            .filter(move |id| !self.tombstones.contains(id))
    }

    /// Drop tombstoned slots from the backing store and rebuild the slot
    /// map. Live row ids remain valid. Returns the number of slots
    /// reclaimed.
    pub fn compact(&mut self) -> usize {
        if self.tombstones.is_empty() {
            return 0;
        }
        let reclaimed = self.tombstones.len();

        let mut write_slot = 0;
        for read_slot in 0..self.slot_ids.len() {
            let id = self.slot_ids[read_slot];
            if self.tombstones.contains(&id) {
                continue;
            }
            if write_slot != read_slot {
                let src = read_slot * self.dim;
                let dst = write_slot * self.dim;
                self.data.copy_within(src..src + self.dim, dst);
                self.slot_ids[write_slot] = id;
            }
            self.id_to_slot.insert(id, write_slot);
            write_slot += 1;
        }

        for id in self.tombstones.drain() {
            self.id_to_slot.remove(&id);
        }
        self.slot_ids.truncate(write_slot);
        self.data.truncate(write_slot * self.dim);
        self.data.shrink_to_fit();
        self.slot_ids.shrink_to_fit();
        reclaimed
    }

    /// Total slots, tombstoned included.
    pub fn len(&self) -> usize {
        self.slot_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_ids.is_empty()
    }

    /// Rows that gather will still return.
    pub fn live_len(&self) -> usize {
        self.slot_ids.len() - self.tombstones.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Backing store footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
            + self.slot_ids.len() * std::mem::size_of::<RowId>()
            + self.id_to_slot.len()
                * (std::mem::size_of::<RowId>() + std::mem::size_of::<usize>())
    }
}
