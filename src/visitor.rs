//! Per-kind `mark` and `finalize` dispatch.
//!
//! The dump callback lives in `snapshot.rs` instead of here: it needs the
//! dumper's own node/edge/string bookkeeping threaded through every call,
//! so keeping it next to that state avoids passing the whole snapshot
//! context through this module for no benefit. `mark` and `finalize` are
//! the two callbacks the refcount engine and cycle collector actually
//! drive, so they stay together here as the hot-path dispatch table
//! (tag + match, rather than a vtable per cell).

use crate::cell_data::{CellData, ObjectClassData, PropertySlot, VarRefData};
use crate::object::{CellId, Value};
use crate::registry::Registry;

/// Call `emit` once for every outgoing strong reference to another managed
/// cell that `id` holds.
///
/// This only enumerates `CellId` edges (the GC graph); string/symbol/bigint
/// values reachable through properties or the constant pool are skipped
/// since they are not GC cells (they free themselves via `Rc`).
pub fn mark(registry: &Registry, id: CellId, emit: &mut dyn FnMut(CellId)) {
    registry.with_data(id, |data| match data {
        CellData::JsObject(obj) => {
            emit(obj.shape);
            for slot in &obj.properties {
                match slot {
                    PropertySlot::Value(v) => emit_value(v, emit),
                    PropertySlot::GetSet { get, set } => {
                        emit_value(get, emit);
                        emit_value(set, emit);
                    }
                    PropertySlot::VarRef(var_ref_id) => {
                        // Only traced while detached: an on-stack var-ref
                        // delegates to a live activation and is not GC-reachable.
                        let detached = registry
                            .with_data(*var_ref_id, |vr| matches!(vr, CellData::VarRef(VarRefData::Detached(_))));
                        if detached {
                            emit(*var_ref_id);
                        }
                    }
                    PropertySlot::AutoInit(realm) => emit(*realm),
                }
            }
            match &obj.class {
                ObjectClassData::Plain => {}
                ObjectClassData::Array(elements) => {
                    for v in elements {
                        emit_value(v, emit);
                    }
                }
                ObjectClassData::Boxed(v) => emit_value(v, emit),
                ObjectClassData::NativeFunction { realm } => emit(*realm),
                ObjectClassData::BytecodeFunction {
                    home_object,
                    var_refs,
                    bytecode,
                } => {
                    if let Some(h) = home_object {
                        emit(*h);
                    }
                    for v in var_refs {
                        emit(*v);
                    }
                    emit(*bytecode);
                }
                ObjectClassData::Bound {
                    target,
                    bound_this,
                    bound_args,
                } => {
                    emit_value(target, emit);
                    emit_value(bound_this, emit);
                    for a in bound_args {
                        emit_value(a, emit);
                    }
                }
                ObjectClassData::ForInIterator { source } => emit_value(source, emit),
                ObjectClassData::TypedArray { buffer } => emit(*buffer),
            }
        }
        CellData::FunctionBytecode(fb) => {
            for v in &fb.const_pool {
                emit_value(v, emit);
            }
            emit(fb.realm);
        }
        CellData::VarRef(VarRefData::Detached(v)) => emit_value(v, emit),
        CellData::VarRef(VarRefData::OnStack) => {}
        CellData::AsyncFunction(af) => {
            emit_value(&af.resolve, emit);
            emit_value(&af.reject, emit);
            if af.active {
                if let Some(frame) = &af.frame {
                    frame.mark_roots(emit);
                }
            }
        }
        CellData::Shape(shape) => {
            if let Some(proto) = shape.proto {
                emit(proto);
            }
        }
        CellData::Context(ctx) => {
            emit_value_opt(&ctx.global_object, emit);
            emit_value_opt(&ctx.global_var_object, emit);
            emit_value_opt(&ctx.type_error_trap, emit);
            emit_value_opt(&ctx.eval_object, emit);
            for v in &ctx.array_proto_values {
                emit_value(v, emit);
            }
            for v in &ctx.native_error_protos {
                emit_value(v, emit);
            }
            for v in &ctx.class_protos {
                emit_value(v, emit);
            }
            for pair in [
                &ctx.iterator,
                &ctx.async_iterator,
                &ctx.promise,
                &ctx.array,
                &ctx.regexp,
                &ctx.function,
            ] {
                emit_value_opt(&pair.ctor, emit);
                emit_value_opt(&pair.proto, emit);
            }
            if let Some(shape) = ctx.array_shape {
                emit(shape);
            }
            for var_ref in &ctx.exported_var_refs {
                emit(*var_ref);
            }
            for v in &ctx.module_namespaces {
                emit_value(v, emit);
            }
            for v in &ctx.function_objects {
                emit_value(v, emit);
            }
            for v in &ctx.eval_exceptions {
                emit_value(v, emit);
            }
            for v in &ctx.meta_objects {
                emit_value(v, emit);
            }
        }
    });
}

fn emit_value(v: &Value, emit: &mut dyn FnMut(CellId)) {
    if let Some(id) = v.cell_id() {
        emit(id);
    }
}

fn emit_value_opt(v: &Option<Value>, emit: &mut dyn FnMut(CellId)) {
    if let Some(v) = v {
        emit_value(v, emit);
    }
}

/// What a finalizer asks the caller to release: either a `Value` (which
/// may or may not be GC-tracked) or a bare `CellId` edge that isn't
/// wrapped in a `Value` (a var-ref slot, a realm, a home object, ...).
/// `ShapeInline` names a cell's own shape, which the caller should free
/// eagerly rather than routing through `zero_refcount`.
#[derive(Debug)]
pub enum Release {
    /// An ordinary child value.
    Value(Value),
    /// A bare cell reference that isn't wrapped in a `Value`.
    Cell(CellId),
    /// This cell's shape, to be freed inline.
    ShapeInline(CellId),
}

/// Release every strong reference `data` owned that is not reachable
/// through `mark` alone, reporting each one to `release` in turn.
///
/// `data` has already been taken out of the registry (the cell is a
/// zombie by the time this runs); this function only walks the owned
/// structure and reports what needs releasing. A single `FnMut` is used
/// (rather than one callback per `Release` variant) so the caller can
/// capture one mutable borrow of its registry/refcount state instead of
/// juggling several simultaneous mutable captures of the same state.
pub fn finalize(data: CellData, release: &mut dyn FnMut(Release)) {
    match data {
        CellData::JsObject(obj) => {
            for slot in obj.properties {
                match slot {
                    PropertySlot::Value(v) => release(Release::Value(v)),
                    PropertySlot::GetSet { get, set } => {
                        release(Release::Value(get));
                        release(Release::Value(set));
                    }
                    PropertySlot::VarRef(var_ref_id) => release(Release::Cell(var_ref_id)),
                    PropertySlot::AutoInit(realm) => release(Release::Cell(realm)),
                }
            }
            match obj.class {
                ObjectClassData::Plain => {}
                ObjectClassData::Array(elements) => {
                    for v in elements {
                        release(Release::Value(v));
                    }
                }
                ObjectClassData::Boxed(v) => release(Release::Value(v)),
                ObjectClassData::Bound {
                    target,
                    bound_this,
                    bound_args,
                } => {
                    release(Release::Value(target));
                    release(Release::Value(bound_this));
                    for a in bound_args {
                        release(Release::Value(a));
                    }
                }
                ObjectClassData::BytecodeFunction {
                    home_object,
                    var_refs,
                    bytecode,
                } => {
                    if let Some(h) = home_object {
                        release(Release::Cell(h));
                    }
                    for v in var_refs {
                        release(Release::Cell(v));
                    }
                    release(Release::Cell(bytecode));
                }
                ObjectClassData::NativeFunction { realm } => release(Release::Cell(realm)),
                ObjectClassData::ForInIterator { source } => release(Release::Value(source)),
                ObjectClassData::TypedArray { buffer } => release(Release::Cell(buffer)),
            }
            release(Release::ShapeInline(obj.shape));
        }
        CellData::FunctionBytecode(fb) => {
            for v in fb.const_pool {
                release(Release::Value(v));
            }
            release(Release::Cell(fb.realm));
            // atoms, var_defs, closure_vars, and debug info are Rc-backed;
            // dropping `fb` here releases them without an explicit call.
        }
        CellData::VarRef(VarRefData::Detached(v)) => release(Release::Value(v)),
        CellData::VarRef(VarRefData::OnStack) => {}
        CellData::AsyncFunction(af) => {
            release(Release::Value(af.resolve));
            release(Release::Value(af.reject));
        }
        CellData::Shape(shape) => {
            if let Some(proto) = shape.proto {
                release(Release::Cell(proto));
            }
        }
        CellData::Context(ctx) => {
            let mut release_opt = |v: Option<Value>, release: &mut dyn FnMut(Release)| {
                if let Some(v) = v {
                    release(Release::Value(v));
                }
            };
            release_opt(ctx.global_object, release);
            release_opt(ctx.global_var_object, release);
            release_opt(ctx.type_error_trap, release);
            release_opt(ctx.eval_object, release);
            for v in ctx.array_proto_values {
                release(Release::Value(v));
            }
            for v in ctx.native_error_protos {
                release(Release::Value(v));
            }
            for v in ctx.class_protos {
                release(Release::Value(v));
            }
            for pair in [
                ctx.iterator,
                ctx.async_iterator,
                ctx.promise,
                ctx.array,
                ctx.regexp,
                ctx.function,
            ] {
                release_opt(pair.ctor, release);
                release_opt(pair.proto, release);
            }
            if let Some(shape) = ctx.array_shape {
                release(Release::Cell(shape));
            }
            for var_ref in ctx.exported_var_refs {
                release(Release::Cell(var_ref));
            }
            for v in ctx.module_namespaces {
                release(Release::Value(v));
            }
            for v in ctx.function_objects {
                release(Release::Value(v));
            }
            for v in ctx.eval_exceptions {
                release(Release::Value(v));
            }
            for v in ctx.meta_objects {
                release(Release::Value(v));
            }
        }
    }
}
