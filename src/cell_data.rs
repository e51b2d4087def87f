//! Per-kind payloads stored alongside each cell's [`crate::object::Header`].
//!
//! `CellData` is the closed variant the visitor table (`visitor.rs`)
//! matches on; each arm corresponds to one of the six kinds in
//! `object::Kind`. Keeping the payload as a plain enum (rather than a
//! `Box<dyn Trait>` per cell) favors a tag-and-match dispatch over a
//! vtable-per-cell, since this runs on every cell, every edge.

use std::rc::Rc;

use crate::object::{CellId, Value};

/// The class-specific data an object cell carries in addition to its
/// shape and property slots.
#[derive(Debug)]
pub enum ObjectClassData {
    /// A plain object with no extra owned state.
    Plain,
    /// A dense array: owns every element value.
    Array(Vec<Value>),
    /// An object wrapping a single boxed primitive (`Number`, `Boolean`, ...).
    Boxed(Value),
    /// A native (host-implemented) function: owns its realm only.
    NativeFunction {
        /// The realm (`Context` cell) this native function belongs to.
        realm: CellId,
    },
    /// A compiled function object: owns its home object, detached var-refs,
    /// and the function-bytecode cell itself.
    BytecodeFunction {
        /// The lexically enclosing `this`-binding object, if any.
        home_object: Option<CellId>,
        /// Upvalue cells captured by this closure.
        var_refs: Vec<CellId>,
        /// The `FUNCTION_BYTECODE` cell holding compiled code.
        bytecode: CellId,
    },
    /// A `Function.prototype.bind` result.
    Bound {
        /// The function being bound.
        target: Value,
        /// The bound `this` value.
        bound_this: Value,
        /// Arguments partially applied by the bind.
        bound_args: Vec<Value>,
    },
    /// A `for-in` enumeration iterator.
    ForInIterator {
        /// The object whose enumerable keys are being iterated.
        source: Value,
    },
    /// A typed-array view (`Uint8Array`, `Float64Array`, ...) over a
    /// backing buffer object.
    TypedArray {
        /// The `ArrayBuffer`-like object this view reads and writes through.
        buffer: CellId,
    },
}

/// One property slot on an object.
#[derive(Debug)]
pub enum PropertySlot {
    /// A plain data property.
    Value(Value),
    /// An accessor property; either half may be absent (`Value::Undefined`).
    GetSet {
        /// The getter function, or `Value::Undefined` if none.
        get: Value,
        /// The setter function, or `Value::Undefined` if none.
        set: Value,
    },
    /// A slot that delegates storage to a `VAR_REF` cell (captured by closures).
    /// Traced only when that var-ref is detached.
    VarRef(CellId),
    /// A slot whose initializer runs lazily, owning a reference to its realm.
    AutoInit(CellId),
}

/// Data owned by a `JS_OBJECT` cell.
#[derive(Debug)]
pub struct ObjectData {
    /// The shape (property layout) cell.
    pub shape: CellId,
    /// Property slots, indexed per the shape.
    pub properties: Vec<PropertySlot>,
    /// Class-specific owned state (array elements, bound args, ...).
    pub class: ObjectClassData,
    /// Identifiers of weak-map/weak-set records keyed on this object.
    pub weak_record_ids: Vec<u32>,
}

impl ObjectData {
    /// A freshly created plain object with the given shape and no properties.
    pub fn new(shape: CellId) -> Self {
        Self {
            shape,
            properties: Vec::new(),
            class: ObjectClassData::Plain,
            weak_record_ids: Vec::new(),
        }
    }
}

/// Debug metadata attached to a function-bytecode cell, when present.
#[derive(Debug, Default)]
pub struct DebugInfo {
    /// Source file name, if compiled with debug info.
    pub filename: Option<Rc<str>>,
    /// PC-to-source-line mapping, encoded as opaque bytes.
    pub pc_to_line: Vec<u8>,
    /// Original source text, if retained.
    pub source: Option<Rc<str>>,
}

/// Data owned by a `FUNCTION_BYTECODE` cell.
#[derive(Debug)]
pub struct FunctionBytecodeData {
    /// Raw bytecode stream, used only for `self_size` accounting here
    /// (decoding is the bytecode interpreter's job, out of scope).
    pub byte_code: Vec<u8>,
    /// Atoms referenced directly by the bytecode stream.
    pub atoms: Vec<Rc<str>>,
    /// Names of local variable definitions.
    pub var_defs: Vec<Rc<str>>,
    /// Names of captured closure variables.
    pub closure_vars: Vec<Rc<str>>,
    /// Every value held in the constant pool.
    pub const_pool: Vec<Value>,
    /// The realm this function belongs to.
    pub realm: CellId,
    /// The function's own name atom, if any.
    pub function_name: Option<Rc<str>>,
    /// Optional debug metadata.
    pub debug: Option<DebugInfo>,
}

/// State of a `VAR_REF` cell.
#[derive(Debug)]
pub enum VarRefData {
    /// Delegates to a live activation; not reachable via marking.
    OnStack,
    /// Owns exactly one value on the heap.
    Detached(Value),
}

/// A caller-supplied visitor over an async function's suspended-frame roots.
///
/// The frame itself belongs to the bytecode interpreter, an external
/// collaborator; the collector only needs to enumerate whatever GC
/// references it roots while the activation is suspended.
pub trait FrameRoots: std::fmt::Debug {
    /// Call `emit` once per outgoing strong reference rooted by this frame.
    fn mark_roots(&self, emit: &mut dyn FnMut(CellId));
}

/// Data owned by an `ASYNC_FUNCTION` cell.
#[derive(Debug)]
pub struct AsyncFunctionData {
    /// The `resolve` callable of the activation's resolver pair.
    pub resolve: Value,
    /// The `reject` callable of the activation's resolver pair.
    pub reject: Value,
    /// Whether the activation is currently suspended (has a live frame).
    pub active: bool,
    /// The suspended frame's root visitor, present only while `active`.
    pub frame: Option<Box<dyn FrameRoots>>,
}

/// One property name recorded on a `Shape`, for synthetic snapshot children.
#[derive(Debug, Clone)]
pub struct ShapeProperty {
    /// The property's atom (name).
    pub atom: Rc<str>,
}

/// Data owned by a `SHAPE` cell.
#[derive(Debug)]
pub struct ShapeData {
    /// The prototype object this shape's instances inherit from, if any.
    pub proto: Option<CellId>,
    /// Property layout entries, in slot order.
    pub properties: Vec<ShapeProperty>,
    /// Whether this shape is interned in the runtime's shape hash table.
    /// Affects `self_size` accounting in the snapshot dumper.
    pub hashed: bool,
}

/// A constructor/prototype pair, as appears repeatedly among a context's
/// well-known slots.
#[derive(Debug, Default, Clone)]
pub struct CtorProtoPair {
    /// The constructor function, if initialized.
    pub ctor: Option<Value>,
    /// The prototype object, if initialized.
    pub proto: Option<Value>,
}

/// Data owned by a `CONTEXT` cell: every well-known slot a realm carries
/// (global object, built-in prototypes/constructors, loaded modules).
#[derive(Debug, Default)]
pub struct ContextData {
    /// The global object.
    pub global_object: Option<Value>,
    /// The global lexical/var-declaration object.
    pub global_var_object: Option<Value>,
    /// The trap object used to synthesize `TypeError`s.
    pub type_error_trap: Option<Value>,
    /// The object `eval` executes against.
    pub eval_object: Option<Value>,
    /// Miscellaneous cached `Array.prototype` values.
    pub array_proto_values: Vec<Value>,
    /// Prototypes for each native error subclass (`TypeError`, `RangeError`, ...).
    pub native_error_protos: Vec<Value>,
    /// Prototypes for every built-in class this realm has instantiated.
    pub class_protos: Vec<Value>,
    /// `Iterator` constructor/prototype.
    pub iterator: CtorProtoPair,
    /// `AsyncIterator` constructor/prototype.
    pub async_iterator: CtorProtoPair,
    /// `Promise` constructor/prototype.
    pub promise: CtorProtoPair,
    /// `Array` constructor/prototype.
    pub array: CtorProtoPair,
    /// `RegExp` constructor/prototype.
    pub regexp: CtorProtoPair,
    /// `Function` constructor/prototype.
    pub function: CtorProtoPair,
    /// The shape shared by all plain arrays in this realm.
    pub array_shape: Option<CellId>,
    /// Var-refs exported by every loaded module.
    pub exported_var_refs: Vec<CellId>,
    /// Namespace objects of every loaded module.
    pub module_namespaces: Vec<Value>,
    /// Top-level function objects of every loaded module.
    pub function_objects: Vec<Value>,
    /// Uncaught evaluation exceptions retained per loaded module.
    pub eval_exceptions: Vec<Value>,
    /// `import.meta` objects of every loaded module.
    pub meta_objects: Vec<Value>,
}

/// The per-kind payload stored alongside a cell's header.
#[derive(Debug)]
pub enum CellData {
    /// See [`ObjectData`].
    JsObject(ObjectData),
    /// See [`FunctionBytecodeData`].
    FunctionBytecode(FunctionBytecodeData),
    /// See [`VarRefData`].
    VarRef(VarRefData),
    /// See [`AsyncFunctionData`].
    AsyncFunction(AsyncFunctionData),
    /// See [`ShapeData`].
    Shape(ShapeData),
    /// See [`ContextData`].
    Context(Box<ContextData>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_object_has_no_properties() {
        let data = ObjectData::new(CellId(0));
        assert!(data.properties.is_empty());
        assert!(matches!(data.class, ObjectClassData::Plain));
    }

    #[test]
    fn ctor_proto_pair_defaults_to_uninitialized() {
        let pair = CtorProtoPair::default();
        assert!(pair.ctor.is_none());
        assert!(pair.proto.is_none());
    }
}
