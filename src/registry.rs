//! The GC registry: the cell arena and the three intrusive lists.
//!
//! Every cell is appended to `live` at creation and moves between
//! `live`, `tmp`, and `zero_refcount` as the refcount engine and cycle
//! collector run. Lists are intrusive — linkage lives on each cell's
//! [`Header`] — so moving a cell between lists is O(1) and allocation-free,
//! without needing raw aliased pointers.
//!
//! ## `CellId` reuse safety
//!
//! A freed slot is only returned to the free list once its `CellData`
//! has been taken (finalized) and it has been unlinked from every list.
//! Nothing in this crate retains a `CellId` across a point where its
//! referent could have been freed without that release being observed:
//! every release path decrements the refcount and checks it before
//! any `CellId` derived from that cell is used again.

use std::cell::RefCell;

use crate::cell_data::CellData;
use crate::object::{CellId, Header, Kind, ListId};

struct Slot {
    header: Header,
    data: RefCell<Option<CellData>>,
}

/// Owns every managed cell's storage and the three membership lists.
pub struct Registry {
    slots: Vec<Option<Slot>>,
    free_list: Vec<u32>,
    heads: [Option<CellId>; 3],
    live_count: usize,
}

fn list_index(list: ListId) -> usize {
    match list {
        ListId::Live => 0,
        ListId::Tmp => 1,
        ListId::ZeroRefcount => 2,
    }
}

impl Registry {
    /// An empty registry with no live cells.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            heads: [None, None, None],
            live_count: 0,
        }
    }

    /// Allocate a new cell of `kind` holding `data`, appended to `live`.
    pub fn insert(&mut self, kind: Kind, data: CellData) -> CellId {
        let id = if let Some(idx) = self.free_list.pop() {
            idx
        } else {
            self.slots.push(None);
            (self.slots.len() - 1) as u32
        };
        self.slots[id as usize] = Some(Slot {
            header: Header::new(kind),
            data: RefCell::new(Some(data)),
        });
        let cell_id = CellId(id);
        self.push_front(ListId::Live, cell_id);
        self.live_count += 1;
        cell_id
    }

    fn slot(&self, id: CellId) -> &Slot {
        self.slots[id.0 as usize]
            .as_ref()
            .expect("corruption: CellId refers to an already-freed slot")
    }

    /// The header of a live cell.
    pub fn header(&self, id: CellId) -> &Header {
        &self.slot(id).header
    }

    /// Run `f` with read access to a cell's data.
    pub fn with_data<R>(&self, id: CellId, f: impl FnOnce(&CellData) -> R) -> R {
        let borrow = self.slot(id).data.borrow();
        let data = borrow
            .as_ref()
            .expect("corruption: accessed data of a finalized cell");
        f(data)
    }

    /// Run `f` with mutable access to a cell's data.
    pub fn with_data_mut<R>(&self, id: CellId, f: impl FnOnce(&mut CellData) -> R) -> R {
        let mut borrow = self.slot(id).data.borrow_mut();
        let data = borrow
            .as_mut()
            .expect("corruption: accessed data of a finalized cell");
        f(data)
    }

    /// Take ownership of a cell's data, leaving it empty. Used by the
    /// finalizer so the cell's payload can be dropped (recursively
    /// releasing children) before the cell itself is unlinked and freed.
    pub fn take_data(&self, id: CellId) -> CellData {
        self.slot(id)
            .data
            .borrow_mut()
            .take()
            .expect("corruption: double-finalize of a cell")
    }

    /// Whether a cell's data has already been taken (i.e. it has been finalized).
    pub fn is_finalized(&self, id: CellId) -> bool {
        self.slot(id).data.borrow().is_none()
    }

    /// Remove a cell from whichever list it is on and return its slot to
    /// the free list. Must only be called after `take_data`.
    pub fn deallocate(&mut self, id: CellId) {
        debug_assert!(
            self.is_finalized(id),
            "corruption: deallocated a cell before finalizing it"
        );
        self.remove_from_list(id);
        self.slots[id.0 as usize] = None;
        self.free_list.push(id.0);
        self.live_count -= 1;
    }

    /// Number of cells currently tracked (on any of the three lists).
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Whether the registry currently tracks no cells.
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Whether `id` still refers to a live slot (not yet deallocated).
    /// A finalized-but-not-deallocated zombie still counts as present;
    /// callers distinguish that case via `Header::is_zombie`.
    pub fn contains(&self, id: CellId) -> bool {
        self.slots
            .get(id.0 as usize)
            .is_some_and(|slot| slot.is_some())
    }

    fn push_front(&mut self, list: ListId, id: CellId) {
        let idx = list_index(list);
        let old_head = self.heads[idx];
        self.header(id).set_prev(None);
        self.header(id).set_next(old_head);
        if let Some(h) = old_head {
            self.header(h).set_prev(Some(id));
        }
        self.heads[idx] = Some(id);
        self.header(id).set_list(list);
    }

    fn remove_from_list(&mut self, id: CellId) {
        let header = self.header(id);
        let list = header.list();
        let idx = list_index(list);
        let prev = header.prev();
        let next = header.next();
        match prev {
            Some(p) => self.header(p).set_next(next),
            None => self.heads[idx] = next,
        }
        if let Some(n) = next {
            self.header(n).set_prev(prev);
        }
        header.set_prev(None);
        header.set_next(None);
    }

    /// Move a cell from its current list onto `list` (front-insert).
    pub fn move_to(&mut self, id: CellId, list: ListId) {
        self.remove_from_list(id);
        self.push_front(list, id);
    }

    /// Iterate the ids currently on `list`, oldest-insertion-last
    /// (front-insert means this is reverse of insertion order within a pass,
    /// which is fine: callers that need determinism collect once up front).
    pub fn list_ids(&self, list: ListId) -> Vec<CellId> {
        let mut out = Vec::new();
        let mut cur = self.heads[list_index(list)];
        while let Some(id) = cur {
            out.push(id);
            cur = self.header(id).next();
        }
        out
    }

    /// Whether `list` currently has no members.
    pub fn list_is_empty(&self, list: ListId) -> bool {
        self.heads[list_index(list)].is_none()
    }

    /// Pop and return the cell at the front of `list`, if any.
    pub fn pop_front(&mut self, list: ListId) -> Option<CellId> {
        let id = self.heads[list_index(list)]?;
        self.remove_from_list(id);
        Some(id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_data::{CellData, ObjectData};

    fn plain_object(reg: &mut Registry) -> CellId {
        let shape = reg.insert(
            Kind::Shape,
            CellData::Shape(crate::cell_data::ShapeData {
                proto: None,
                properties: Vec::new(),
                hashed: false,
            }),
        );
        reg.insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape)))
    }

    #[test]
    fn insert_appends_to_live() {
        let mut reg = Registry::new();
        let a = plain_object(&mut reg);
        assert_eq!(reg.len(), 2); // shape + object
        assert_eq!(reg.header(a).list(), ListId::Live);
        assert_eq!(reg.list_ids(ListId::Live).len(), 2);
    }

    #[test]
    fn move_to_updates_membership() {
        let mut reg = Registry::new();
        let a = plain_object(&mut reg);
        reg.move_to(a, ListId::ZeroRefcount);
        assert_eq!(reg.header(a).list(), ListId::ZeroRefcount);
        assert!(reg.list_ids(ListId::Live).iter().all(|&id| id != a));
        assert_eq!(reg.list_ids(ListId::ZeroRefcount), vec![a]);
    }

    #[test]
    fn deallocate_recycles_slot() {
        let mut reg = Registry::new();
        let a = plain_object(&mut reg);
        let _ = reg.take_data(a);
        reg.deallocate(a);
        assert_eq!(reg.len(), 1);
        let b = plain_object(&mut reg);
        // The freed slot index is reused.
        assert_eq!(b.0, a.0);
    }

    #[test]
    fn pop_front_drains_in_lifo_order() {
        let mut reg = Registry::new();
        let a = reg.insert(
            Kind::Shape,
            CellData::Shape(crate::cell_data::ShapeData {
                proto: None,
                properties: Vec::new(),
                hashed: false,
            }),
        );
        reg.move_to(a, ListId::ZeroRefcount);
        assert_eq!(reg.pop_front(ListId::ZeroRefcount), Some(a));
        assert_eq!(reg.pop_front(ListId::ZeroRefcount), None);
    }
}
