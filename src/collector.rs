//! The trial-deletion cycle collector.
//!
//! Plain refcounting (`refcount.rs`) reclaims everything with no surviving
//! cycle the moment its count drops to zero. What it can never reclaim on
//! its own is a strongly-connected group of cells that only reference each
//! other — each member's count stays positive forever because its peers
//! keep it alive. [`Collector::run_gc`] finds and frees exactly those
//! groups, in three passes over the registry's `live` and `tmp` lists:
//! decref, scan, and free.

use std::cell::Cell as StdCell;
use std::collections::VecDeque;

use crate::cell_data::CellData;
use crate::object::{CellId, ListId};
use crate::refcount::Phase;
use crate::registry::Registry;
use crate::visitor::{self, Release};
use crate::weak_ref::WeakTable;

/// Counters describing the most recently completed cycle collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    /// Number of completed `run_gc` calls.
    pub collections: u64,
    /// Candidates found by the decref pass (before the scan pass pardons any).
    pub last_candidates: usize,
    /// Cells actually deallocated by the most recent free pass.
    pub last_reclaimed: usize,
}

/// Runs the trial-deletion algorithm over a [`Registry`].
///
/// Holds no state of its own beyond [`GcStats`] — all mutable GC state
/// (the lists, refcounts, mark bits) lives on the registry and its cells,
/// so a `Collector` is cheap to construct and reuse across calls.
#[derive(Debug, Default)]
pub struct Collector {
    stats: GcStats,
}

impl Collector {
    /// A collector with no recorded history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics from the most recently completed collection.
    pub fn stats(&self) -> GcStats {
        self.stats
    }

    /// Run one full cycle collection to completion.
    ///
    /// `phase` must be `Phase::None` on entry (no drain loop or collection
    /// already in progress); it is returned to `Phase::None` before this
    /// returns.
    pub fn run_gc(
        &mut self,
        registry: &mut Registry,
        phase: &StdCell<Phase>,
        weak_table: &mut WeakTable,
    ) {
        debug_assert_eq!(
            phase.get(),
            Phase::None,
            "run_gc invoked while another GC phase was active"
        );
        phase.set(Phase::RemoveCycles);
        #[cfg(feature = "gc_logging")]
        tracing::debug!(live = registry.len(), "entering REMOVE_CYCLES phase");

        let candidates = self.decref_pass(registry);
        self.scan_pass(registry);
        let reclaimed = self.free_pass(registry, phase, weak_table);

        self.stats.collections += 1;
        self.stats.last_candidates = candidates;
        self.stats.last_reclaimed = reclaimed;
        phase.set(Phase::None);

        #[cfg(feature = "gc_logging")]
        tracing::info!(
            collections = self.stats.collections,
            candidates,
            reclaimed,
            "cycle collection complete"
        );
    }

    /// Decrement every live cell's outgoing-edge counts once, moving any
    /// cell whose count falls to zero from `live` onto `tmp`. What remains
    /// on `tmp` afterward is the set of candidates: cells whose entire
    /// refcount is accounted for by other cells in the live set, meaning
    /// no root outside it keeps them alive.
    fn decref_pass(&self, registry: &mut Registry) -> usize {
        let snapshot = registry.list_ids(ListId::Live);
        for &id in &snapshot {
            debug_assert!(!registry.header(id).mark());
            let to_demote = decref_children(registry, id);
            for child in to_demote {
                registry.move_to(child, ListId::Tmp);
            }
            registry.header(id).set_mark(true);
            if registry.header(id).ref_count() == 0 && registry.header(id).list() == ListId::Live
            {
                registry.move_to(id, ListId::Tmp);
            }
        }
        registry.list_ids(ListId::Tmp).len()
    }

    /// Re-increment every edge the decref pass subtracted, restoring exact
    /// counts. An edge from a cell still on `live` that pulls a `tmp`
    /// candidate's count off zero proves that candidate is externally
    /// reachable after all; it is moved back to `live` and its own
    /// children are scanned in turn so the correction cascades through
    /// whatever it pardons transitively. Whatever is still on `tmp` once
    /// the cascade settles is genuinely unreachable.
    fn scan_pass(&self, registry: &mut Registry) {
        let mut queue: VecDeque<CellId> = registry.list_ids(ListId::Live).into();
        while let Some(id) = queue.pop_front() {
            registry.header(id).set_mark(false);
            let restored = scan_incref_pardoning(registry, id);
            for child in restored {
                registry.move_to(child, ListId::Live);
                registry.header(child).set_mark(false);
                queue.push_back(child);
            }
        }
        // Whatever remains on `tmp` is condemned; restore its internal
        // refcounts too so the free pass's releases balance correctly.
        for id in registry.list_ids(ListId::Tmp) {
            visitor::mark(registry, id, &mut |child| {
                registry.header(child).inc_ref_count();
            });
        }
    }

    /// Finalize every condemned cell still on `tmp`, in list order, then
    /// deallocate everything that finalizing produced. A finalizer's
    /// releases land on children that are themselves condemned (since the
    /// scan pass already proved nothing outside the cycle points to them)
    /// or on cells kept alive from outside, whose restored counts simply
    /// absorb the decrement.
    fn free_pass(
        &self,
        registry: &mut Registry,
        phase: &StdCell<Phase>,
        weak_table: &mut WeakTable,
    ) -> usize {
        let tmp_ids = registry.list_ids(ListId::Tmp);
        for &id in &tmp_ids {
            if registry.is_finalized(id) {
                continue;
            }
            finalize_cell(registry, phase, weak_table, id);
        }
        // A weak-record value (or, in principle, any other release this pass
        // triggers) can point at a cell outside `tmp` entirely; finalize it
        // here too before freeing rather than assuming everything reaching
        // `zero_refcount` during this pass was already handled above.
        let mut reclaimed = 0;
        while let Some(id) = registry.pop_front(ListId::ZeroRefcount) {
            if !registry.is_finalized(id) {
                finalize_cell(registry, phase, weak_table, id);
            }
            registry.deallocate(id);
            reclaimed += 1;
        }
        reclaimed
    }
}

fn decref_children(registry: &Registry, id: CellId) -> Vec<CellId> {
    let mut to_demote = Vec::new();
    visitor::mark(registry, id, &mut |child| {
        let header = registry.header(child);
        let new_count = header.dec_ref_count();
        if new_count == 0 && header.mark() && header.list() == ListId::Live {
            to_demote.push(child);
        }
    });
    to_demote
}

fn scan_incref_pardoning(registry: &Registry, id: CellId) -> Vec<CellId> {
    let mut restored = Vec::new();
    visitor::mark(registry, id, &mut |child| {
        let header = registry.header(child);
        let new_count = header.inc_ref_count();
        if new_count == 1 && header.list() == ListId::Tmp {
            restored.push(child);
        }
    });
    restored
}

fn finalize_cell(
    registry: &mut Registry,
    phase: &StdCell<Phase>,
    weak_table: &mut WeakTable,
    id: CellId,
) {
    registry.header(id).set_zombie(true);
    let data = registry.take_data(id);
    let weak_record_ids = match &data {
        CellData::JsObject(obj) if !obj.weak_record_ids.is_empty() => obj.weak_record_ids.clone(),
        _ => Vec::new(),
    };
    visitor::finalize(data, &mut |item| release_during_collection(registry, item));
    if !weak_record_ids.is_empty() {
        crate::weak_ref::sweep_dead_object(registry, phase, weak_table, &weak_record_ids);
    }
    registry.move_to(id, ListId::ZeroRefcount);
}

fn release_during_collection(registry: &mut Registry, item: Release) {
    let child = match item {
        Release::Value(v) => v.cell_id(),
        Release::Cell(c) | Release::ShapeInline(c) => Some(c),
    };
    let Some(child) = child else { return };
    if registry.header(child).dec_ref_count() == 0 && !registry.is_finalized(child) {
        registry.move_to(child, ListId::ZeroRefcount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_data::{CellData, ObjectData, PropertySlot, ShapeData};
    use crate::object::{Kind, Value};

    fn new_shape(reg: &mut Registry) -> CellId {
        reg.insert(
            Kind::Shape,
            CellData::Shape(ShapeData {
                proto: None,
                properties: Vec::new(),
                hashed: false,
            }),
        )
    }

    #[test]
    fn two_cycle_with_no_external_root_is_reclaimed() {
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape_a = new_shape(&mut reg);
        let shape_b = new_shape(&mut reg);
        let a = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_a)));
        let b = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_b)));

        // a.x = b; b.x = a — each now has an extra incoming reference.
        reg.header(b).inc_ref_count();
        reg.with_data_mut(a, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(b)));
            }
        });
        reg.header(a).inc_ref_count();
        reg.with_data_mut(b, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(a)));
            }
        });

        // Drop the creator's own handle to each; only the mutual cycle
        // keeps them alive now (refcount 1 apiece).
        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(a));
        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(b));
        assert_eq!(reg.header(a).ref_count(), 1);
        assert!(!reg.is_empty());

        let mut collector = Collector::new();
        collector.run_gc(&mut reg, &phase, &mut weak_table);

        assert!(reg.is_empty());
        assert_eq!(collector.stats().collections, 1);
    }

    #[test]
    fn cycle_with_external_root_on_one_member_survives() {
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape_a = new_shape(&mut reg);
        let shape_b = new_shape(&mut reg);
        let a = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_a)));
        let b = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_b)));

        reg.header(b).inc_ref_count();
        reg.with_data_mut(a, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(b)));
            }
        });
        reg.header(a).inc_ref_count();
        reg.with_data_mut(b, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(a)));
            }
        });

        // Only drop the external handle to b; a is still rooted.
        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(b));

        let mut collector = Collector::new();
        collector.run_gc(&mut reg, &phase, &mut weak_table);

        assert!(!reg.is_empty());
        assert_eq!(reg.header(a).ref_count(), 1);
    }

    #[test]
    fn free_pass_marks_a_cell_zombie_before_its_still_unfinalized_peer() {
        // Exercises the zombie rule (spec §4.3): while the free pass walks
        // `tmp`, a cell it has already finalized must read as a zombie
        // (`is_zombie() == true`) while a peer still awaiting its turn
        // reads as not-yet-finalized (`is_zombie() == false`). This drives
        // the collector's internal passes directly rather than through
        // `run_gc` so the mid-pass state is observable at all.
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape_a = new_shape(&mut reg);
        let shape_b = new_shape(&mut reg);
        let a = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_a)));
        let b = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_b)));

        reg.header(b).inc_ref_count();
        reg.with_data_mut(a, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(b)));
            }
        });
        reg.header(a).inc_ref_count();
        reg.with_data_mut(b, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(a)));
            }
        });
        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(a));
        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(b));

        let collector = Collector::new();
        phase.set(Phase::RemoveCycles);
        collector.decref_pass(&mut reg);
        collector.scan_pass(&mut reg);

        let tmp_ids = reg.list_ids(ListId::Tmp);
        assert_eq!(tmp_ids.len(), 2);
        let (first, second) = (tmp_ids[0], tmp_ids[1]);

        assert!(!reg.header(first).is_zombie());
        assert!(!reg.header(second).is_zombie());

        finalize_cell(&mut reg, &phase, &mut weak_table, first);
        // `first`'s finalizer has run: it reads as a zombie now. `second`
        // has not been reached yet and still reads as live.
        assert!(reg.header(first).is_zombie());
        assert!(!reg.header(second).is_zombie());

        finalize_cell(&mut reg, &phase, &mut weak_table, second);
        assert!(reg.header(second).is_zombie());
        phase.set(Phase::None);
    }

    #[test]
    fn leaf_reachable_only_through_a_dead_cycle_is_also_reclaimed() {
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape_a = new_shape(&mut reg);
        let shape_b = new_shape(&mut reg);
        let shape_leaf = new_shape(&mut reg);
        let leaf = reg.insert(
            Kind::JsObject,
            CellData::JsObject(ObjectData::new(shape_leaf)),
        );
        let a = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_a)));
        let b = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape_b)));

        reg.header(b).inc_ref_count();
        reg.with_data_mut(a, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(b)));
            }
        });
        reg.header(a).inc_ref_count();
        reg.header(leaf).inc_ref_count();
        reg.with_data_mut(b, |data| {
            if let CellData::JsObject(obj) = data {
                obj.properties.push(PropertySlot::Value(Value::Object(a)));
                obj.properties
                    .push(PropertySlot::Value(Value::Object(leaf)));
            }
        });
        // Drop leaf's own creator handle: it is now reachable only via b.
        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(leaf));

        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(a));
        crate::refcount::release(&mut reg, &phase, &mut weak_table, Value::Object(b));

        let mut collector = Collector::new();
        collector.run_gc(&mut reg, &phase, &mut weak_table);

        assert!(reg.is_empty());
    }
}
