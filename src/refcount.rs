//! The reference-count engine: `retain`/`release` and the zero-refcount
//! drain loop.

use std::cell::Cell as StdCell;

use crate::cell_data::CellData;
use crate::object::{CellId, ListId, Value};
use crate::registry::Registry;
use crate::visitor::{self, Release};
use crate::weak_ref::WeakTable;

/// Which GC activity is currently in progress. At most one of these runs
/// at a time — the drain loop and the cycle collector never interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No GC activity.
    None,
    /// Draining the zero-refcount list outside a cycle pass.
    Decref,
    /// Inside the trial-deletion cycle collector.
    RemoveCycles,
}

/// `retain(value)`: increment the strong count backing `value`, if any.
///
/// Strings/symbols/big-ints are refcounted through `Rc`; the increment
/// for those already happened when the caller cloned the `Rc` (or the
/// whole `Value`) to produce this second handle, so this is a no-op for
/// those tags — it exists only so callers have one function to call
/// regardless of tag.
pub fn retain(registry: &Registry, value: &Value) {
    if let Some(id) = value.cell_id() {
        registry.header(id).inc_ref_count();
    }
}

/// `release(rt_or_ctx, value)`: decrement the strong count backing
/// `value`; on non-GC tags this is a no-op (the caller's `Value` drop
/// handles it). On GC tags, dropping the count to zero either starts a
/// drain loop (phase was `None`) or simply parks the cell on
/// `zero_refcount` for an in-progress cycle collector to observe.
pub fn release(
    registry: &mut Registry,
    phase: &StdCell<Phase>,
    weak_table: &mut WeakTable,
    value: Value,
) {
    let Some(id) = value.cell_id() else {
        return;
    };
    release_cell(registry, phase, weak_table, id);
}

pub(crate) fn release_cell(
    registry: &mut Registry,
    phase: &StdCell<Phase>,
    weak_table: &mut WeakTable,
    id: CellId,
) {
    if registry.header(id).dec_ref_count() != 0 {
        return;
    }
    // ref_count has reached zero; no outgoing references have been released yet.
    registry.move_to(id, ListId::ZeroRefcount);
    match phase.get() {
        Phase::None => {
            phase.set(Phase::Decref);
            #[cfg(feature = "gc_logging")]
            tracing::debug!("entering DECREF phase");
            drain(registry, phase, weak_table);
        }
        Phase::Decref | Phase::RemoveCycles => {
            // Either already draining (the outer loop will reach this cell)
            // or the cycle collector is running and will observe it itself.
        }
    }
}

/// Repeatedly pop a cell off `zero_refcount`, finalize it (which may
/// enqueue more cells via child releases), and deallocate it, until the
/// list is empty. Returns phase to `None` when done.
fn drain(registry: &mut Registry, phase: &StdCell<Phase>, weak_table: &mut WeakTable) {
    while let Some(id) = registry.pop_front(ListId::ZeroRefcount) {
        let data = registry.take_data(id);
        let weak_record_ids = match &data {
            CellData::JsObject(obj) if !obj.weak_record_ids.is_empty() => {
                obj.weak_record_ids.clone()
            }
            _ => Vec::new(),
        };
        visitor::finalize(data, &mut |item| match item {
            Release::Value(v) => release(registry, phase, weak_table, v),
            Release::Cell(child) => release_cell(registry, phase, weak_table, child),
            Release::ShapeInline(shape_id) => {
                free_shape_inline(registry, phase, weak_table, shape_id)
            }
        });
        if !weak_record_ids.is_empty() {
            crate::weak_ref::sweep_dead_object(registry, phase, weak_table, &weak_record_ids);
        }
        registry.deallocate(id);
    }
    phase.set(Phase::None);
}

/// Free a cell's shape eagerly rather than enqueueing it on
/// `zero_refcount`. Still goes through the ordinary decrement-and-maybe-free
/// path — "inline" here means "synchronously, as part of this call", not
/// "skip refcounting" — but unlike an ordinary child release, it recurses
/// immediately into finalizing the shape rather than returning to let the
/// drain loop pick it up later, since shapes form no cycles among
/// themselves (their only outgoing edge is an optional prototype object).
fn free_shape_inline(
    registry: &mut Registry,
    phase: &StdCell<Phase>,
    weak_table: &mut WeakTable,
    shape_id: CellId,
) {
    if registry.header(shape_id).dec_ref_count() != 0 {
        return;
    }
    registry.move_to(shape_id, ListId::ZeroRefcount);
    // Pop it straight back off and finalize now, instead of waiting for
    // the enclosing drain loop's own iteration to reach it.
    if let Some(popped) = registry.pop_front(ListId::ZeroRefcount) {
        debug_assert_eq!(popped, shape_id);
        let data = registry.take_data(shape_id);
        visitor::finalize(data, &mut |item| match item {
            Release::Value(v) => release(registry, phase, weak_table, v),
            Release::Cell(child) => release_cell(registry, phase, weak_table, child),
            Release::ShapeInline(nested) => free_shape_inline(registry, phase, weak_table, nested),
        });
        registry.deallocate(shape_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_data::{CellData, ObjectData, ShapeData};
    use crate::object::Kind;

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
    fn release_to_zero_frees_synchronously_outside_cycle() {
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape = new_shape(&mut reg);
        let obj = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape)));

        assert_eq!(reg.len(), 2);
        release(&mut reg, &phase, &mut weak_table, Value::Object(obj));
        // Object and its (now-unreferenced) shape are both gone.
        assert_eq!(reg.len(), 0);
        assert_eq!(phase.get(), Phase::None);
    }

    #[test]
    fn retain_bumps_refcount_and_release_balances_it() {
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape = new_shape(&mut reg);
        let obj = reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape)));
        let handle = Value::Object(obj);

        retain(&reg, &handle);
        assert_eq!(reg.header(obj).ref_count(), 2);

        release(&mut reg, &phase, &mut weak_table, handle.clone());
        assert_eq!(reg.header(obj).ref_count(), 1);
        assert_eq!(reg.len(), 2); // still alive

        release(&mut reg, &phase, &mut weak_table, handle);
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn releasing_leaf_child_frees_it_before_parent_gone() {
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape = new_shape(&mut reg);
        let mut parent_data = ObjectData::new(shape);
        let leaf_shape = new_shape(&mut reg);
        let leaf = reg.insert(
            Kind::JsObject,
            CellData::JsObject(ObjectData::new(leaf_shape)),
        );
        parent_data
            .properties
            .push(crate::cell_data::PropertySlot::Value(Value::Object(leaf)));
        let parent = reg.insert(Kind::JsObject, CellData::JsObject(parent_data));

        release(&mut reg, &phase, &mut weak_table, Value::Object(parent));
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn dead_object_sweeps_its_weak_records() {
        let mut reg = Registry::new();
        let phase = StdCell::new(Phase::None);
        let mut weak_table = WeakTable::new();
        let shape = new_shape(&mut reg);
        let mut obj_data = ObjectData::new(shape);
        let record = weak_table.register(CellId(999), Value::Int(7));
        obj_data.weak_record_ids.push(record.0);
        let obj = reg.insert(Kind::JsObject, CellData::JsObject(obj_data));

        release(&mut reg, &phase, &mut weak_table, Value::Object(obj));

        assert!(weak_table.is_empty());
    }
}
