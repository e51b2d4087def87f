//! Weak-map/weak-set record bookkeeping and the death-time sweep.
//!
//! A weak record observes a key without extending its lifetime: storing a
//! value under a GC-cell key in a weak map must not keep that key alive
//! through the record alone. When the key dies, every record keyed on it
//! is removed from its owning table and its value released.
//!
//! Records live in their own arena, indexed by [`RecordId`], rather than
//! behind the raw intrusive pointers a C host would use for the map's hash
//! chain and the key's own per-object chain. [`ObjectData::weak_record_ids`]
//! already plays the role of the key's chain (as a `Vec<RecordId>`); this
//! module plays the role of the owning table. Because neither chain is a
//! raw aliased pointer here, there is no hazard in releasing a record's
//! value in the same pass that unlinks it — the two-pass split a
//! pointer-chasing implementation needs collapses into one arena removal.

use std::cell::Cell as StdCell;

use crate::object::{CellId, Value};
use crate::refcount::{self, Phase};
use crate::registry::Registry;

/// Index of a weak record within a [`WeakTable`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(pub u32);

struct Record {
    /// The key this record observes. Not traced, not retained: storing it
    /// here does not call `retain` on the key.
    key: CellId,
    /// The value stored under `key`. Owned: released when the record dies.
    value: Value,
}

/// A weak-map/weak-set record store.
///
/// Represents every weak table a runtime hosts as one flat arena; record
/// ids are handed out to and stored by the individual map/set objects,
/// which this crate treats as opaque mutator-owned state (it does not
/// implement `Map`/`Set` lookup semantics, only the death-time cleanup
/// protocol).
#[derive(Debug, Default)]
pub struct WeakTable {
    slots: Vec<Option<Record>>,
    free_list: Vec<u32>,
}

impl WeakTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new record observing `key`, owning `value`. The caller
    /// is responsible for appending the returned id to `key`'s cell's
    /// `weak_record_ids` so the sweep can find it when `key` dies.
    pub fn register(&mut self, key: CellId, value: Value) -> RecordId {
        let idx = if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize] = Some(Record { key, value });
            idx
        } else {
            self.slots.push(Some(Record { key, value }));
            (self.slots.len() - 1) as u32
        };
        RecordId(idx)
    }

    /// The value stored under a still-live record, if `id` hasn't been
    /// swept yet.
    pub fn value(&self, id: RecordId) -> Option<&Value> {
        self.slots[id.0 as usize].as_ref().map(|r| &r.value)
    }

    /// The key a still-live record observes, if `id` hasn't been swept yet.
    pub fn key(&self, id: RecordId) -> Option<CellId> {
        self.slots[id.0 as usize].as_ref().map(|r| r.key)
    }

    /// Remove every record in `record_ids` from the table and return the
    /// values they owned, for the caller to release in turn. Ids not
    /// found (already swept) are silently skipped — a key can appear in
    /// more than one table-adjacent structure during incremental mutator
    /// bookkeeping, so a double-sweep must be harmless.
    pub fn sweep(&mut self, record_ids: &[u32]) -> Vec<Value> {
        let mut released = Vec::with_capacity(record_ids.len());
        for &idx in record_ids {
            if let Some(record) = self.slots[idx as usize].take() {
                released.push(record.value);
                self.free_list.push(idx);
            }
        }
        released
    }

    /// Number of currently-registered (not yet swept) records.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the table currently holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sweep every weak record keyed on a dying object and release the values
/// they owned, recursing through the ordinary refcount machinery (which
/// may itself trigger further drains).
///
/// Called from the object teardown sequence once a `JS_OBJECT` cell with
/// a non-empty `weak_record_ids` list has been taken out of the registry.
pub fn sweep_dead_object(
    registry: &mut Registry,
    phase: &StdCell<Phase>,
    weak_table: &mut WeakTable,
    record_ids: &[u32],
) {
    for value in weak_table.sweep(record_ids) {
        refcount::release(registry, phase, weak_table, value);
    }
}
