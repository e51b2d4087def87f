//! `Runtime`: the explicit owner of every process-wide list (spec Design
//! Notes §9, "no hidden singletons"). Every operation in this crate's
//! mutator-facing API (§6) takes a `Runtime` — or a `CellId` known to
//! belong to one — as its first real argument, directly or through `&self`.

use std::cell::Cell as StdCell;
use std::io::Write;
use std::path::PathBuf;

use crate::allocator::AllocatorFacade;
use crate::cell_data::{
    AsyncFunctionData, CellData, FunctionBytecodeData, ObjectData, ShapeData, VarRefData,
};
use crate::collector::{Collector, GcStats};
use crate::config::{GcConfig, Threshold};
use crate::context;
use crate::error::GcResult;
use crate::memory_usage::{self, MemoryUsageReport};
use crate::object::{CellId, Kind, ListId, Value};
use crate::refcount::{self, Phase};
use crate::registry::Registry;
use crate::snapshot;
use crate::weak_ref::WeakTable;

/// Owns every GC list, the refcount/collector phase, the weak-record
/// table, the allocator facade, and the set of contexts this runtime
/// roots. A `Runtime` is single-threaded cooperative per spec §5: it is
/// not `Send`/`Sync`, and nothing inside it yields across an await point.
pub struct Runtime {
    registry: Registry,
    phase: StdCell<Phase>,
    weak_table: WeakTable,
    collector: Collector,
    allocator: AllocatorFacade,
    config: GcConfig,
    used_estimate: u64,
    gc_threshold_bytes: Option<u64>,
    /// Contexts this runtime holds a strong root on. A context that drops
    /// out of this list (via [`Runtime::release_context_root`]) remains
    /// collectible like any other cell.
    contexts: Vec<CellId>,
}

impl Runtime {
    /// `new_runtime()`: a fresh runtime with no contexts and the given
    /// configuration's initial memory limit / GC threshold.
    pub fn new(config: GcConfig) -> Self {
        let mut allocator = AllocatorFacade::default();
        allocator.set_limit(config.memory_limit);
        let gc_threshold_bytes = match config.gc_threshold {
            Threshold::Bytes(n) => Some(n),
            Threshold::Disabled => None,
        };
        Self {
            registry: Registry::new(),
            phase: StdCell::new(Phase::None),
            weak_table: WeakTable::new(),
            collector: Collector::new(),
            allocator,
            config,
            used_estimate: 0,
            gc_threshold_bytes,
            contexts: Vec::new(),
        }
    }

    /// Direct access to the cell registry. Exposed (rather than
    /// `pub(crate)`) because building a cell's actual edges — pushing
    /// property slots, wiring a closure's captured var-refs, populating a
    /// context's well-known slots beyond what `context.rs`'s setters cover
    /// — is the bytecode interpreter's job, not this crate's; `retain`/
    /// `release` alone only move refcounts, they don't shape the graph.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// See [`Self::registry`].
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub(crate) fn weak_table_mut(&mut self) -> &mut WeakTable {
        &mut self.weak_table
    }

    pub(crate) fn phase(&self) -> &StdCell<Phase> {
        &self.phase
    }

    pub(crate) fn allocator_counters(&self) -> crate::allocator::MallocCounters {
        self.allocator.counters()
    }

    /// Collector statistics as of the most recent `run_gc`.
    pub fn stats(&self) -> GcStats {
        self.collector.stats()
    }

    /// `set_memory_limit(rt, bytes)`: cap on outstanding allocator bytes.
    pub fn set_memory_limit(&mut self, bytes: u64) {
        self.config.memory_limit = Some(bytes);
        self.allocator.set_limit(Some(bytes));
    }

    /// `set_gc_threshold(rt, bytes | DISABLED)`.
    pub fn set_gc_threshold(&mut self, threshold: Threshold) {
        self.config.gc_threshold = threshold;
        self.gc_threshold_bytes = match threshold {
            Threshold::Bytes(n) => Some(n),
            Threshold::Disabled => None,
        };
    }

    /// `retain(value)`.
    pub fn retain(&self, value: &Value) {
        refcount::retain(&self.registry, value);
    }

    /// `release(rt_or_ctx, value)`.
    pub fn release(&mut self, value: Value) {
        refcount::release(&mut self.registry, &self.phase, &mut self.weak_table, value);
    }

    /// Release a reference to a cell identified by bare `CellId` rather
    /// than a `Value` — the creator's own handle on a `Shape`, a detached
    /// `VarRef`, or any other cell a mutator holds directly without it
    /// ever being wrapped in a `Value` (only `object` and
    /// `function-bytecode` tags have `Value` variants; see
    /// [`Value::cell_id`]). Mirrors `release(Value::Object(..))` for the
    /// cells that can't go through that call.
    pub fn release_cell(&mut self, id: CellId) {
        refcount::release_cell(&mut self.registry, &self.phase, &mut self.weak_table, id);
    }

    /// `is_live(obj) -> bool`: false for zombies and for anything that
    /// isn't (or is no longer) a live cell.
    pub fn is_live(&self, obj: CellId) -> bool {
        self.registry.contains(obj) && !self.registry.header(obj).is_zombie()
    }

    /// `run_gc(rt)`: run the trial-deletion cycle collector to completion.
    pub fn run_gc(&mut self) {
        self.collector
            .run_gc(&mut self.registry, &self.phase, &mut self.weak_table);
        self.used_estimate = self.live_bytes_estimate();
        self.reset_threshold();
    }

    /// Sum of `self_size` across every live cell — this crate's own
    /// "used" figure for the trigger policy. Cell storage lives in the
    /// registry's arena (a plain `Vec`), not behind `AllocatorFacade`, so
    /// this is computed from the live list directly rather than from the
    /// allocator's `malloc_size` counter, which never moves for cells.
    fn live_bytes_estimate(&self) -> u64 {
        self.registry
            .list_ids(ListId::Live)
            .into_iter()
            .map(|id| snapshot::classify_cell(&self.registry, id).2 as u64)
            .sum()
    }

    fn reset_threshold(&mut self) {
        if let Threshold::Bytes(_) = self.config.gc_threshold {
            let new_threshold = (self.used_estimate as f64 * 1.5) as u64;
            self.gc_threshold_bytes = Some(new_threshold.max(1));
        }
    }

    /// Trigger policy (§4.3): before an allocation of `incoming_size`
    /// bytes, run a full collection if `used + incoming_size` would
    /// exceed the current threshold, then reset the threshold to
    /// `used * 1.5`. A disabled threshold never triggers automatically.
    fn maybe_trigger_gc(&mut self, incoming_size: u64) {
        let Some(threshold) = self.gc_threshold_bytes else {
            return;
        };
        if self.used_estimate + incoming_size > threshold {
            self.run_gc();
        }
    }

    fn note_allocation(&mut self, approx_size: u64) {
        self.maybe_trigger_gc(approx_size);
        self.used_estimate += approx_size;
    }

    // -- kind-specific constructors (spec §3 "Ownership and lifecycle") --

    /// Allocate a fresh `JS_OBJECT` cell with the given shape.
    pub fn new_object(&mut self, shape: CellId) -> CellId {
        self.note_allocation(std::mem::size_of::<ObjectData>() as u64);
        self.registry.header(shape).inc_ref_count();
        self.registry
            .insert(Kind::JsObject, CellData::JsObject(ObjectData::new(shape)))
    }

    /// Allocate a fresh `SHAPE` cell, returned at refcount 1: the
    /// creator's own handle. Attaching it to an object (`new_object`)
    /// retains it again on that object's behalf, so a shape shared by
    /// several objects carries one reference per owner plus this initial
    /// creator reference — drop the latter with
    /// [`Self::release_cell`] once the shape has been handed off (the
    /// same discipline `release(Value::Object(..))` applies to objects,
    /// just for a cell kind `Value` has no variant for).
    pub fn new_shape(&mut self, proto: Option<CellId>) -> CellId {
        self.note_allocation(std::mem::size_of::<ShapeData>() as u64);
        if let Some(p) = proto {
            self.registry.header(p).inc_ref_count();
        }
        self.registry.insert(
            Kind::Shape,
            CellData::Shape(ShapeData {
                proto,
                properties: Vec::new(),
                hashed: false,
            }),
        )
    }

    /// Allocate a fresh `FUNCTION_BYTECODE` cell.
    pub fn new_function_bytecode(&mut self, data: FunctionBytecodeData) -> CellId {
        let size = std::mem::size_of::<FunctionBytecodeData>() as u64 + data.byte_code.len() as u64;
        self.note_allocation(size);
        self.registry.header(data.realm).inc_ref_count();
        self.registry
            .insert(Kind::FunctionBytecode, CellData::FunctionBytecode(data))
    }

    /// Allocate a detached `VAR_REF` cell owning `value`.
    pub fn new_detached_var_ref(&mut self, value: Value) -> CellId {
        self.note_allocation(std::mem::size_of::<Value>() as u64);
        self.retain(&value);
        self.registry
            .insert(Kind::VarRef, CellData::VarRef(VarRefData::Detached(value)))
    }

    /// Allocate an on-stack `VAR_REF` cell (delegates to a live activation;
    /// not traced — see invariant I4).
    pub fn new_on_stack_var_ref(&mut self) -> CellId {
        self.note_allocation(std::mem::size_of::<Value>() as u64);
        self.registry
            .insert(Kind::VarRef, CellData::VarRef(VarRefData::OnStack))
    }

    /// Allocate a suspended `ASYNC_FUNCTION` cell.
    pub fn new_async_function(&mut self, resolve: Value, reject: Value) -> CellId {
        self.note_allocation(std::mem::size_of::<AsyncFunctionData>() as u64);
        self.retain(&resolve);
        self.retain(&reject);
        self.registry.insert(
            Kind::AsyncFunction,
            CellData::AsyncFunction(AsyncFunctionData {
                resolve,
                reject,
                active: false,
                frame: None,
            }),
        )
    }

    /// `new_runtime`'s context counterpart: allocate a `CONTEXT` cell and
    /// root it on this runtime (held until [`Self::release_context_root`]
    /// or `run_gc`/`release` determine it unreachable).
    pub fn new_context(&mut self) -> CellId {
        self.note_allocation(std::mem::size_of::<crate::cell_data::ContextData>() as u64);
        let id = context::new_context_cell(self);
        self.contexts.push(id);
        id
    }

    /// Drop this runtime's own root on a context. The context itself may
    /// still be kept alive by other references; if not, this can trigger
    /// its synchronous teardown (or leave it for the next `run_gc` if it
    /// is only cycle-reachable).
    pub fn release_context_root(&mut self, ctx: CellId) {
        self.contexts.retain(|&id| id != ctx);
        self.release_cell(ctx);
    }

    /// The contexts this runtime currently roots.
    pub fn contexts(&self) -> &[CellId] {
        &self.contexts
    }

    /// Number of cells currently tracked across all three GC lists.
    pub fn cell_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether this runtime currently tracks no cells at all.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// `compute_memory_usage(rt) -> Report`.
    pub fn compute_memory_usage(&self) -> MemoryUsageReport {
        memory_usage::compute_memory_usage(self)
    }

    /// `dump_memory_usage(out, report, rt)`.
    pub fn dump_memory_usage(&self, out: &mut dyn Write, report: &MemoryUsageReport) -> std::io::Result<()> {
        memory_usage::dump_memory_usage(out, report)
    }

    /// `dump_objects(ctx) -> writes heapsnapshot file`. Returns the path
    /// written to, or a [`crate::error::GcError::SnapshotIo`] if the file
    /// could not be opened or written — the dumper abandons the
    /// in-progress snapshot on any I/O failure (§7).
    pub fn dump_objects(&self, ctx: CellId) -> GcResult<PathBuf> {
        snapshot::dump_objects(self, ctx)
    }
}
