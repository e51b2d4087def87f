//! The `CONTEXT` cell kind: a per-realm container of well-known slots,
//! and the mutation helpers that keep its refcounts balanced (spec §4.6).
//!
//! `ContextData` itself (the flat struct of well-known slots) lives in
//! `cell_data.rs` alongside every other kind's payload, and its `mark`
//! enumeration lives in `visitor.rs` next to the other kinds' — this
//! module is the ergonomic layer a mutator actually calls: `Context` is
//! itself a GC cell (so a context can be reclaimed once unreachable, per
//! §2), which means every slot replace here must `retain` the incoming
//! value and `release` whatever it displaces instead of a bare field
//! assignment.

use crate::cell_data::{CellData, ContextData, CtorProtoPair};
use crate::object::{CellId, Kind, Value};
use crate::refcount;
use crate::runtime::Runtime;

/// Which constructor/prototype pair of a context's well-known slots is
/// being addressed by [`set_ctor_proto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownPair {
    /// `Iterator` constructor/prototype.
    Iterator,
    /// `AsyncIterator` constructor/prototype.
    AsyncIterator,
    /// `Promise` constructor/prototype.
    Promise,
    /// `Array` constructor/prototype.
    Array,
    /// `RegExp` constructor/prototype.
    Regexp,
    /// `Function` constructor/prototype.
    Function,
}

fn pair_mut(data: &mut ContextData, which: WellKnownPair) -> &mut CtorProtoPair {
    match which {
        WellKnownPair::Iterator => &mut data.iterator,
        WellKnownPair::AsyncIterator => &mut data.async_iterator,
        WellKnownPair::Promise => &mut data.promise,
        WellKnownPair::Array => &mut data.array,
        WellKnownPair::Regexp => &mut data.regexp,
        WellKnownPair::Function => &mut data.function,
    }
}

/// Create a fresh context cell with every well-known slot empty, and
/// return its id. The caller (`Runtime::new_context`) is responsible for
/// deciding whether it becomes a root.
pub(crate) fn new_context_cell(rt: &mut Runtime) -> CellId {
    rt.registry_mut()
        .insert(Kind::Context, CellData::Context(Box::new(ContextData::default())))
}

/// Replace an `Option<Value>` well-known slot, retaining the new value and
/// releasing whatever it displaced. Every one of the context's scalar
/// slots (global object, global var object, the type-error trap, the eval
/// object) goes through this so mutation never skips the refcount engine.
pub fn set_option_slot(
    rt: &mut Runtime,
    ctx: CellId,
    select: impl FnOnce(&mut ContextData) -> &mut Option<Value>,
    new: Value,
) {
    refcount::retain(rt.registry(), &new);
    let old = rt.registry_mut().with_data_mut(ctx, |data| {
        let CellData::Context(c) = data else {
            unreachable!("corruption: CellId did not refer to a Context cell")
        };
        std::mem::replace(select(c), Some(new))
    });
    if let Some(old) = old {
        rt.release(old);
    }
}

/// Set the global object slot.
pub fn set_global_object(rt: &mut Runtime, ctx: CellId, value: Value) {
    set_option_slot(rt, ctx, |c| &mut c.global_object, value);
}

/// Set the global lexical/var-declaration object slot.
pub fn set_global_var_object(rt: &mut Runtime, ctx: CellId, value: Value) {
    set_option_slot(rt, ctx, |c| &mut c.global_var_object, value);
}

/// Set the `TypeError`-synthesis trap object.
pub fn set_type_error_trap(rt: &mut Runtime, ctx: CellId, value: Value) {
    set_option_slot(rt, ctx, |c| &mut c.type_error_trap, value);
}

/// Set the object `eval` executes against.
pub fn set_eval_object(rt: &mut Runtime, ctx: CellId, value: Value) {
    set_option_slot(rt, ctx, |c| &mut c.eval_object, value);
}

/// Replace one of the constructor/prototype pairs (`Iterator`, `Promise`, ...).
pub fn set_ctor_proto(
    rt: &mut Runtime,
    ctx: CellId,
    which: WellKnownPair,
    ctor: Option<Value>,
    proto: Option<Value>,
) {
    if let Some(v) = &ctor {
        refcount::retain(rt.registry(), v);
    }
    if let Some(v) = &proto {
        refcount::retain(rt.registry(), v);
    }
    let (old_ctor, old_proto) = rt.registry_mut().with_data_mut(ctx, |data| {
        let CellData::Context(c) = data else {
            unreachable!("corruption: CellId did not refer to a Context cell")
        };
        let pair = pair_mut(c, which);
        (
            std::mem::replace(&mut pair.ctor, ctor),
            std::mem::replace(&mut pair.proto, proto),
        )
    });
    if let Some(v) = old_ctor {
        rt.release(v);
    }
    if let Some(v) = old_proto {
        rt.release(v);
    }
}

/// Set the shared shape used by every plain array in this realm.
pub fn set_array_shape(rt: &mut Runtime, ctx: CellId, shape: CellId) {
    rt.registry().header(shape).inc_ref_count();
    let old = rt.registry_mut().with_data_mut(ctx, |data| {
        let CellData::Context(c) = data else {
            unreachable!("corruption: CellId did not refer to a Context cell")
        };
        std::mem::replace(&mut c.array_shape, Some(shape))
    });
    if let Some(old_shape) = old {
        rt.release_cell(old_shape);
    }
}

/// Register a fully-initialized loaded module's managed references on this
/// context: its exported var-refs, namespace object, top-level function
/// object, an optional uncaught evaluation exception, and its `import.meta`
/// object. Retains every reference handed in, matching "the context
/// transitively accounts for their managed references" (§4.6): modules
/// are not independently GC cells in this crate.
pub fn add_loaded_module(
    rt: &mut Runtime,
    ctx: CellId,
    exported_var_refs: Vec<CellId>,
    namespace: Value,
    function_object: Value,
    eval_exception: Option<Value>,
    meta: Value,
) {
    for var_ref in &exported_var_refs {
        rt.registry().header(*var_ref).inc_ref_count();
    }
    refcount::retain(rt.registry(), &namespace);
    refcount::retain(rt.registry(), &function_object);
    if let Some(v) = &eval_exception {
        refcount::retain(rt.registry(), v);
    }
    refcount::retain(rt.registry(), &meta);
    rt.registry_mut().with_data_mut(ctx, |data| {
        let CellData::Context(c) = data else {
            unreachable!("corruption: CellId did not refer to a Context cell")
        };
        c.exported_var_refs.extend(exported_var_refs);
        c.module_namespaces.push(namespace);
        c.function_objects.push(function_object);
        if let Some(v) = eval_exception {
            c.eval_exceptions.push(v);
        }
        c.meta_objects.push(meta);
    });
}
