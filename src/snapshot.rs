//! The heap-snapshot dumper (spec §4.8): walks the live graph, interns
//! strings, assigns node indices, and serializes the standard
//! browser-heap-profiler node/edge/string schema.
//!
//! This is the largest single component by the spec's own budget
//! (~30% of the core), and the one piece of this crate with an external
//! wire-format contract: any tool that already parses a V8/Chromium-style
//! `.heapsnapshot` file should be able to parse this crate's output too.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{Datelike, Local, Timelike};
use rustc_hash::FxHashMap;

use crate::cell_data::{CellData, ObjectClassData, ObjectData, PropertySlot, VarRefData};
use crate::error::GcResult;
use crate::object::{CellId, Header, Kind, ListId, Value};
use crate::registry::Registry;
use crate::runtime::Runtime;

/// Number of fields in a node 5-tuple: `{type, name, id, self_size, edge_count}`.
pub const NODE_FIELD_COUNT: u32 = 5;
/// Number of fields in an edge 3-tuple: `{type, name_or_index, to_node}`.
pub const EDGE_FIELD_COUNT: u32 = 3;

/// The closed set of node types the dumper emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// VM-internal bookkeeping (shapes, their synthetic property children).
    Hidden,
    /// A dense JS array.
    Array,
    /// A string value held by a var-ref.
    String,
    /// A plain (or otherwise unclassified) JS object.
    Object,
    /// Compiled function bytecode.
    Code,
    /// A callable object (native, bytecode-backed, or bound).
    Closure,
    /// A regular expression object. Unused until this crate models a
    /// dedicated RegExp class; kept for wire-format parity.
    Regexp,
    /// A numeric value held by a var-ref.
    Number,
    /// A synthetic function-pointer node standing in for a native callable.
    Native,
    /// A synthetic grouping node (e.g. a class's prototype collection).
    Synthetic,
    /// A concatenated rope string. Unused: this crate's `Value::Str` is a
    /// flat `Rc<str>`, so no distinct rope representation exists to dump.
    ConcatString,
    /// A sliced (substring view) string. Unused for the same reason.
    SlicedString,
    /// A symbol value.
    Symbol,
    /// An arbitrary-precision integer value.
    Bigint,
}

impl NodeType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            NodeType::Hidden => "hidden",
            NodeType::Array => "array",
            NodeType::String => "string",
            NodeType::Object => "object",
            NodeType::Code => "code",
            NodeType::Closure => "closure",
            NodeType::Regexp => "regexp",
            NodeType::Number => "number",
            NodeType::Native => "native",
            NodeType::Synthetic => "synthetic",
            NodeType::ConcatString => "concat-string",
            NodeType::SlicedString => "sliced-string",
            NodeType::Symbol => "symbol",
            NodeType::Bigint => "bigint",
        }
    }
}

/// The closed set of edge types the dumper emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    /// A closure's captured variable, or a module's exported var-ref —
    /// anything that is, semantically, a context/scope slot.
    Context,
    /// An indexed array element.
    Element,
    /// A named own property, including `__proto__`.
    Property,
    /// VM-internal linkage (shape, bytecode, realm, boxed value, ...).
    Internal,
    /// An edge to a VM-internal node that should stay collapsed by
    /// default in a viewer. Used for a shape's synthetic property children.
    Hidden,
    /// A shortcut edge bypassing an intermediate node a viewer would
    /// otherwise have to traverse. Unused: this crate never elides an
    /// intermediate hop, so no edge currently needs shortcutting.
    Shortcut,
    /// An edge from a weak-table record to its key. Unused: weak records
    /// observe rather than own their key, so they contribute no outgoing
    /// edge in this crate's graph (see `weak_ref.rs`).
    Weak,
}

impl EdgeType {
    fn as_str(self) -> &'static str {
        match self {
            EdgeType::Context => "context",
            EdgeType::Element => "element",
            EdgeType::Property => "property",
            EdgeType::Internal => "internal",
            EdgeType::Hidden => "hidden",
            EdgeType::Shortcut => "shortcut",
            EdgeType::Weak => "weak",
        }
    }
}

/// Either a string name or an integer index, per edge.
enum NameOrIndex {
    Str(u32),
    Index(u32),
}

struct NodeRecord {
    node_type: NodeType,
    name_id: u32,
    id: u32,
    self_size: u32,
    edge_count: u32,
}

struct EdgeRecord {
    edge_type: EdgeType,
    name_or_index: NameOrIndex,
    to_node_offset: u32,
}

/// Accumulates nodes/edges/strings while walking the live graph.
struct Dumper<'a> {
    registry: &'a Registry,
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
    strings: Vec<String>,
    string_ids: FxHashMap<String, u32>,
    node_index: FxHashMap<CellId, u32>,
    next_id: u32,
}

impl<'a> Dumper<'a> {
    fn new(registry: &'a Registry) -> Self {
        let mut d = Self {
            registry,
            nodes: Vec::new(),
            edges: Vec::new(),
            strings: Vec::new(),
            string_ids: FxHashMap::default(),
            node_index: FxHashMap::default(),
            next_id: 0,
        };
        // Index 0 of `strings` is conventionally the empty string.
        d.intern_str("");
        d
    }

    fn intern_str(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.string_ids.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_ids.insert(s.to_string(), id);
        id
    }

    fn alloc_node(&mut self, node_type: NodeType, name: &str, self_size: u32) -> u32 {
        let name_id = self.intern_str(name);
        let idx = self.nodes.len() as u32;
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.push(NodeRecord {
            node_type,
            name_id,
            id,
            self_size,
            edge_count: 0,
        });
        idx
    }

    /// The node index for `cell`, materializing it (without emitting its
    /// own outgoing edges yet) if this is the first time it's been seen.
    fn node_for_cell(&mut self, cell: CellId) -> u32 {
        if let Some(&idx) = self.node_index.get(&cell) {
            return idx;
        }
        let (node_type, name, self_size) = classify_cell(self.registry, cell);
        let idx = self.alloc_node(node_type, &name, self_size);
        self.node_index.insert(cell, idx);
        idx
    }

    fn add_edge(&mut self, from: u32, edge_type: EdgeType, name_or_index: NameOrIndex, to: u32) {
        self.edges.push(EdgeRecord {
            edge_type,
            name_or_index,
            to_node_offset: to * NODE_FIELD_COUNT,
        });
        self.nodes[from as usize].edge_count += 1;
    }

    fn add_named_edge(&mut self, from: u32, edge_type: EdgeType, name: &str, to: u32) {
        let name_id = self.intern_str(name);
        self.add_edge(from, edge_type, NameOrIndex::Str(name_id), to);
    }
}

fn header_size() -> u32 {
    std::mem::size_of::<Header>() as u32
}

/// Classify a live cell into its node type, display name, and self-size
/// (spec §4.8 "Node classification"). Shared with `memory_usage.rs`'s
/// per-class histogram so the two reports never disagree about what a
/// cell is called or how large it is.
pub(crate) fn classify_cell(registry: &Registry, cell: CellId) -> (NodeType, String, u32) {
    registry.with_data(cell, |data| match data {
        CellData::JsObject(obj) => classify_object(registry, obj),
        CellData::FunctionBytecode(fb) => {
            let size = header_size()
                + fb.byte_code.len() as u32
                + (fb.var_defs.len() * std::mem::size_of::<std::rc::Rc<str>>()) as u32
                + (fb.closure_vars.len() * std::mem::size_of::<std::rc::Rc<str>>()) as u32
                + (fb.const_pool.len() * std::mem::size_of::<Value>()) as u32
                + fb
                    .debug
                    .as_ref()
                    .and_then(|d| d.source.as_ref())
                    .map(|s| s.len() as u32)
                    .unwrap_or(0);
            let name = fb
                .function_name
                .as_ref()
                .map(|n| n.to_string())
                .unwrap_or_default();
            (NodeType::Code, name, size)
        }
        CellData::VarRef(var_ref) => {
            let node_type = match var_ref {
                VarRefData::Detached(Value::Str(_)) => NodeType::String,
                VarRefData::Detached(Value::Int(_)) | VarRefData::Detached(Value::Float(_)) => {
                    NodeType::Number
                }
                _ => NodeType::Hidden,
            };
            (
                node_type,
                String::new(),
                std::mem::size_of::<VarRefData>() as u32,
            )
        }
        CellData::AsyncFunction(_) => (
            NodeType::Object,
            "AsyncFunction".to_string(),
            std::mem::size_of::<crate::cell_data::AsyncFunctionData>() as u32,
        ),
        CellData::Shape(shape) => {
            let size = if shape.hashed {
                std::mem::size_of::<crate::cell_data::ShapeData>() as u32
            } else {
                0
            };
            (NodeType::Hidden, String::new(), size)
        }
        CellData::Context(_) => (
            NodeType::Object,
            "Context".to_string(),
            std::mem::size_of::<crate::cell_data::ContextData>() as u32,
        ),
    })
}

fn classify_object(registry: &Registry, obj: &ObjectData) -> (NodeType, String, u32) {
    let is_array = matches!(obj.class, ObjectClassData::Array(_));
    let is_callable = matches!(
        obj.class,
        ObjectClassData::NativeFunction { .. }
            | ObjectClassData::BytecodeFunction { .. }
            | ObjectClassData::Bound { .. }
    );
    let node_type = if is_array {
        NodeType::Array
    } else if is_callable {
        NodeType::Closure
    } else {
        NodeType::Object
    };
    let base = std::mem::size_of::<ObjectData>() as u32;
    let size = base
        + (obj.properties.len() * std::mem::size_of::<PropertySlot>()) as u32
        + match &obj.class {
            ObjectClassData::Array(els) => (els.len() * std::mem::size_of::<Value>()) as u32,
            ObjectClassData::Bound { bound_args, .. } => {
                (bound_args.len() * std::mem::size_of::<Value>()) as u32
            }
            ObjectClassData::BytecodeFunction { var_refs, .. } => {
                (var_refs.len() * std::mem::size_of::<CellId>()) as u32
            }
            _ => 0,
        };
    (node_type, object_node_name(registry, obj), size)
}

fn shape_properties(registry: &Registry, shape: CellId) -> Vec<crate::cell_data::ShapeProperty> {
    registry.with_data(shape, |d| match d {
        CellData::Shape(s) => s.properties.clone(),
        _ => unreachable!("corruption: object's shape field did not refer to a Shape cell"),
    })
}

fn slot_value_str(slot: &PropertySlot) -> Option<&str> {
    match slot {
        PropertySlot::Value(Value::Str(s)) => Some(s),
        _ => None,
    }
}

fn own_name_property(registry: &Registry, obj: &ObjectData) -> Option<String> {
    let atoms = shape_properties(registry, obj.shape);
    for (atom, slot) in atoms.iter().zip(obj.properties.iter()) {
        if &*atom.atom == "name" {
            return slot_value_str(slot).map(str::to_string);
        }
    }
    None
}

fn constructor_name(registry: &Registry, obj: &ObjectData) -> Option<String> {
    let atoms = shape_properties(registry, obj.shape);
    for (atom, slot) in atoms.iter().zip(obj.properties.iter()) {
        if &*atom.atom == "constructor" {
            if let PropertySlot::Value(Value::Object(ctor_id) | Value::FunctionBytecode(ctor_id)) =
                slot
            {
                return registry.with_data(*ctor_id, |d| match d {
                    CellData::JsObject(ctor_obj) => own_name_property(registry, ctor_obj),
                    CellData::FunctionBytecode(fb) => {
                        fb.function_name.as_ref().map(|n| n.to_string())
                    }
                    _ => None,
                });
            }
        }
    }
    None
}

fn class_name_fallback(class: &ObjectClassData) -> &'static str {
    match class {
        ObjectClassData::Plain => "Object",
        ObjectClassData::Array(_) => "Array",
        ObjectClassData::Boxed(_) => "Object",
        ObjectClassData::NativeFunction { .. } => "Function",
        ObjectClassData::BytecodeFunction { .. } => "Function",
        ObjectClassData::Bound { .. } => "Function",
        ObjectClassData::ForInIterator { .. } => "ForInIterator",
        ObjectClassData::TypedArray { .. } => "TypedArray",
    }
}

/// Name derivation for an object node (§4.8): no Proxy class exists in
/// this crate's `ObjectClassData`, so that branch never fires here and
/// exists only to document the rule's full precedence order.
fn object_node_name(registry: &Registry, obj: &ObjectData) -> String {
    if let Some(name) = own_name_property(registry, obj) {
        return name;
    }
    if let Some(name) = constructor_name(registry, obj) {
        return name;
    }
    class_name_fallback(&obj.class).to_string()
}

fn value_cell(v: &Value) -> Option<CellId> {
    v.cell_id()
}

/// Emit every outgoing edge for a materialized node (phase 2 of the
/// traversal), after every live cell already has a node index assigned.
fn dump_cell_edges(dumper: &mut Dumper<'_>, node_idx: u32, cell: CellId) {
    let registry = dumper.registry;
    let kind = registry.header(cell).kind();
    match kind {
        Kind::JsObject => dump_object_edges(dumper, node_idx, cell),
        Kind::FunctionBytecode => dump_function_bytecode_edges(dumper, node_idx, cell),
        Kind::VarRef => dump_var_ref_edges(dumper, node_idx, cell),
        Kind::AsyncFunction => dump_async_function_edges(dumper, node_idx, cell),
        Kind::Shape => dump_shape_edges(dumper, node_idx, cell),
        Kind::Context => dump_context_edges(dumper, node_idx, cell),
    }
}

fn dump_object_edges(dumper: &mut Dumper<'_>, node_idx: u32, cell: CellId) {
    let registry = dumper.registry;
    let atoms = registry.with_data(cell, |d| match d {
        CellData::JsObject(obj) => shape_properties(registry, obj.shape),
        _ => unreachable!(),
    });
    // Ordinary named property-slot edges.
    registry.with_data(cell, |d| {
        let CellData::JsObject(obj) = d else { unreachable!() };
        for (i, slot) in obj.properties.iter().enumerate() {
            let name = atoms
                .get(i)
                .map(|a| a.atom.to_string())
                .unwrap_or_else(|| format!("slot{i}"));
            match slot {
                PropertySlot::Value(v) => {
                    if let Some(to) = value_cell(v) {
                        let to_idx = dumper.node_index[&to];
                        dumper.add_named_edge(node_idx, EdgeType::Property, &name, to_idx);
                    }
                }
                PropertySlot::GetSet { get, set } => {
                    if let Some(to) = value_cell(get) {
                        let to_idx = dumper.node_index[&to];
                        dumper.add_named_edge(
                            node_idx,
                            EdgeType::Property,
                            &format!("get {name}"),
                            to_idx,
                        );
                    }
                    if let Some(to) = value_cell(set) {
                        let to_idx = dumper.node_index[&to];
                        dumper.add_named_edge(
                            node_idx,
                            EdgeType::Property,
                            &format!("set {name}"),
                            to_idx,
                        );
                    }
                }
                PropertySlot::VarRef(var_ref_id) => {
                    let to_idx = dumper.node_index[var_ref_id];
                    dumper.add_named_edge(node_idx, EdgeType::Property, &name, to_idx);
                }
                PropertySlot::AutoInit(realm) => {
                    let to_idx = dumper.node_index[realm];
                    dumper.add_named_edge(
                        node_idx,
                        EdgeType::Internal,
                        &format!("autoInit:{name}"),
                        to_idx,
                    );
                }
            }
        }
    });

    // Mandatory `__proto__` and `shape` edges.
    let shape = registry.with_data(cell, |d| match d {
        CellData::JsObject(obj) => obj.shape,
        _ => unreachable!(),
    });
    let proto = registry.with_data(shape, |d| match d {
        CellData::Shape(s) => s.proto,
        _ => unreachable!(),
    });
    if let Some(proto) = proto {
        let to_idx = dumper.node_index[&proto];
        dumper.add_named_edge(node_idx, EdgeType::Property, "__proto__", to_idx);
    }
    let shape_idx = dumper.node_index[&shape];
    dumper.add_named_edge(node_idx, EdgeType::Internal, "shape", shape_idx);

    // Class-specific edges.
    let class_edges: Vec<(EdgeType, NameOrIndexOwned, CellId)> = registry.with_data(cell, |d| {
        let CellData::JsObject(obj) = d else { unreachable!() };
        let mut out = Vec::new();
        match &obj.class {
            ObjectClassData::Plain => {}
            ObjectClassData::Array(elements) => {
                for (i, v) in elements.iter().enumerate() {
                    if let Some(to) = value_cell(v) {
                        out.push((EdgeType::Element, NameOrIndexOwned::Index(i as u32), to));
                    }
                }
            }
            ObjectClassData::Boxed(v) => {
                if let Some(to) = value_cell(v) {
                    out.push((
                        EdgeType::Internal,
                        NameOrIndexOwned::Str("boxedValue".into()),
                        to,
                    ));
                }
            }
            ObjectClassData::NativeFunction { realm } => {
                out.push((
                    EdgeType::Internal,
                    NameOrIndexOwned::Str("realm".into()),
                    *realm,
                ));
            }
            ObjectClassData::BytecodeFunction {
                home_object,
                var_refs,
                bytecode,
            } => {
                if let Some(h) = home_object {
                    out.push((
                        EdgeType::Internal,
                        NameOrIndexOwned::Str("homeObject".into()),
                        *h,
                    ));
                }
                for (i, v) in var_refs.iter().enumerate() {
                    out.push((EdgeType::Context, NameOrIndexOwned::Index(i as u32), *v));
                }
                out.push((
                    EdgeType::Internal,
                    NameOrIndexOwned::Str("code".into()),
                    *bytecode,
                ));
            }
            ObjectClassData::Bound {
                target,
                bound_this,
                bound_args,
            } => {
                if let Some(to) = value_cell(target) {
                    out.push((
                        EdgeType::Internal,
                        NameOrIndexOwned::Str("target".into()),
                        to,
                    ));
                }
                if let Some(to) = value_cell(bound_this) {
                    out.push((
                        EdgeType::Internal,
                        NameOrIndexOwned::Str("boundThis".into()),
                        to,
                    ));
                }
                for (i, v) in bound_args.iter().enumerate() {
                    if let Some(to) = value_cell(v) {
                        out.push((
                            EdgeType::Internal,
                            NameOrIndexOwned::Str(format!("boundArgs[{i}]")),
                            to,
                        ));
                    }
                }
            }
            ObjectClassData::ForInIterator { source } => {
                if let Some(to) = value_cell(source) {
                    out.push((
                        EdgeType::Internal,
                        NameOrIndexOwned::Str("source".into()),
                        to,
                    ));
                }
            }
            ObjectClassData::TypedArray { buffer } => {
                out.push((
                    EdgeType::Property,
                    NameOrIndexOwned::Str("typed_array".into()),
                    *buffer,
                ));
            }
        }
        out
    });
    for (edge_type, name, to) in class_edges {
        let to_idx = dumper.node_index[&to];
        match name {
            NameOrIndexOwned::Str(s) => dumper.add_named_edge(node_idx, edge_type, &s, to_idx),
            NameOrIndexOwned::Index(i) => {
                dumper.add_edge(node_idx, edge_type, NameOrIndex::Index(i), to_idx)
            }
        }
    }

    // `code` edge for callables to their bytecode (or a synthetic native node).
    let native = registry.with_data(cell, |d| match d {
        CellData::JsObject(obj) => matches!(obj.class, ObjectClassData::NativeFunction { .. }),
        _ => unreachable!(),
    });
    if native {
        let synthetic_idx = dumper.alloc_node(NodeType::Native, "cfunc", std::mem::size_of::<usize>() as u32);
        dumper.add_named_edge(node_idx, EdgeType::Internal, "code", synthetic_idx);
    }
}

enum NameOrIndexOwned {
    Str(String),
    Index(u32),
}

fn dump_function_bytecode_edges(dumper: &mut Dumper<'_>, node_idx: u32, cell: CellId) {
    let registry = dumper.registry;
    let (const_pool_cells, realm): (Vec<(usize, CellId)>, CellId) = registry.with_data(cell, |d| {
        let CellData::FunctionBytecode(fb) = d else { unreachable!() };
        let cells = fb
            .const_pool
            .iter()
            .enumerate()
            .filter_map(|(i, v)| value_cell(v).map(|c| (i, c)))
            .collect();
        (cells, fb.realm)
    });
    for (i, to) in const_pool_cells {
        let to_idx = dumper.node_index[&to];
        dumper.add_named_edge(node_idx, EdgeType::Internal, &format!("constantPool[{i}]"), to_idx);
    }
    let realm_idx = dumper.node_index[&realm];
    dumper.add_named_edge(node_idx, EdgeType::Internal, "realm", realm_idx);
}

fn dump_var_ref_edges(dumper: &mut Dumper<'_>, node_idx: u32, cell: CellId) {
    let registry = dumper.registry;
    let target = registry.with_data(cell, |d| match d {
        CellData::VarRef(VarRefData::Detached(v)) => value_cell(v),
        _ => None,
    });
    if let Some(to) = target {
        let to_idx = dumper.node_index[&to];
        dumper.add_named_edge(node_idx, EdgeType::Internal, "value", to_idx);
    }
}

fn dump_async_function_edges(dumper: &mut Dumper<'_>, node_idx: u32, cell: CellId) {
    let registry = dumper.registry;
    let (resolve, reject) = registry.with_data(cell, |d| match d {
        CellData::AsyncFunction(af) => (value_cell(&af.resolve), value_cell(&af.reject)),
        _ => unreachable!(),
    });
    if let Some(to) = resolve {
        let to_idx = dumper.node_index[&to];
        dumper.add_named_edge(node_idx, EdgeType::Internal, "resolve", to_idx);
    }
    if let Some(to) = reject {
        let to_idx = dumper.node_index[&to];
        dumper.add_named_edge(node_idx, EdgeType::Internal, "reject", to_idx);
    }
}

fn dump_shape_edges(dumper: &mut Dumper<'_>, node_idx: u32, cell: CellId) {
    let registry = dumper.registry;
    let (proto, properties) = registry.with_data(cell, |d| match d {
        CellData::Shape(s) => (s.proto, s.properties.clone()),
        _ => unreachable!(),
    });
    if let Some(proto) = proto {
        let to_idx = dumper.node_index[&proto];
        dumper.add_named_edge(node_idx, EdgeType::Internal, "prototype", to_idx);
    }
    for prop in properties {
        let size = std::mem::size_of::<crate::cell_data::ShapeProperty>() as u32;
        let synthetic_idx = dumper.alloc_node(NodeType::Hidden, &prop.atom, size);
        dumper.add_named_edge(node_idx, EdgeType::Hidden, &prop.atom, synthetic_idx);
    }
}

fn dump_context_edges(dumper: &mut Dumper<'_>, node_idx: u32, cell: CellId) {
    let registry = dumper.registry;
    registry.with_data(cell, |d| {
        let CellData::Context(ctx) = d else { unreachable!() };
        let mut scalar = |dumper: &mut Dumper<'_>, name: &str, v: &Option<Value>| {
            if let Some(to) = v.as_ref().and_then(value_cell) {
                let to_idx = dumper.node_index[&to];
                dumper.add_named_edge(node_idx, EdgeType::Internal, name, to_idx);
            }
        };
        scalar(dumper, "globalObject", &ctx.global_object);
        scalar(dumper, "globalVarObject", &ctx.global_var_object);
        scalar(dumper, "typeErrorTrap", &ctx.type_error_trap);
        scalar(dumper, "evalObject", &ctx.eval_object);

        emit_collection_synthetic(dumper, node_idx, "arrayProtoValues", &ctx.array_proto_values);
        emit_collection_synthetic(dumper, node_idx, "nativeErrorProtos", &ctx.native_error_protos);
        emit_collection_synthetic(dumper, node_idx, "classProtos", &ctx.class_protos);

        for (label, pair) in [
            ("iterator", &ctx.iterator),
            ("asyncIterator", &ctx.async_iterator),
            ("promise", &ctx.promise),
            ("array", &ctx.array),
            ("regexp", &ctx.regexp),
            ("function", &ctx.function),
        ] {
            scalar(dumper, &format!("{label}Ctor"), &pair.ctor);
            scalar(dumper, &format!("{label}Proto"), &pair.proto);
        }

        if let Some(shape) = ctx.array_shape {
            let to_idx = dumper.node_index[&shape];
            dumper.add_named_edge(node_idx, EdgeType::Internal, "arrayShape", to_idx);
        }
        for (i, var_ref) in ctx.exported_var_refs.iter().enumerate() {
            let to_idx = dumper.node_index[var_ref];
            dumper.add_edge(node_idx, EdgeType::Context, NameOrIndex::Index(i as u32), to_idx);
        }
        emit_value_list(dumper, node_idx, "moduleNamespaces", &ctx.module_namespaces);
        emit_value_list(dumper, node_idx, "functionObjects", &ctx.function_objects);
        emit_value_list(dumper, node_idx, "evalExceptions", &ctx.eval_exceptions);
        emit_value_list(dumper, node_idx, "metaObjects", &ctx.meta_objects);
    });
}

fn emit_value_list(dumper: &mut Dumper<'_>, from: u32, prefix: &str, values: &[Value]) {
    for (i, v) in values.iter().enumerate() {
        if let Some(to) = value_cell(v) {
            let to_idx = dumper.node_index[&to];
            dumper.add_named_edge(from, EdgeType::Internal, &format!("{prefix}[{i}]"), to_idx);
        }
    }
}

/// A synthetic collection node (spec: `native_error_proto`/`class_proto`),
/// emitted as type `synthetic` named "Array", with one `internal` edge
/// per element to the real prototype object it names.
fn emit_collection_synthetic(dumper: &mut Dumper<'_>, from: u32, label: &str, values: &[Value]) {
    if values.is_empty() {
        return;
    }
    let synthetic_idx = dumper.alloc_node(NodeType::Synthetic, "Array", 0);
    dumper.add_named_edge(from, EdgeType::Internal, label, synthetic_idx);
    for (i, v) in values.iter().enumerate() {
        if let Some(to) = value_cell(v) {
            let to_idx = dumper.node_index[&to];
            dumper.add_edge(synthetic_idx, EdgeType::Internal, NameOrIndex::Index(i as u32), to_idx);
        }
    }
}

/// Walk `registry`'s live list rooted at `ctx` and produce a fully
/// populated [`Dumper`]. Exposed separately from [`dump_objects`] so
/// tests can inspect node/edge/string counts without touching the
/// filesystem.
fn build_snapshot(registry: &Registry, ctx: CellId) -> Dumper<'_> {
    let mut dumper = Dumper::new(registry);

    // Phase 1: assign every live cell a node index, root first.
    let root_idx = dumper.node_for_cell(ctx);
    debug_assert_eq!(root_idx, 0, "the root must be assigned node index 0");
    let mut order = vec![ctx];
    for id in registry.list_ids(ListId::Live) {
        if id == ctx {
            continue;
        }
        dumper.node_for_cell(id);
        order.push(id);
    }

    // Phase 2: emit every node's outgoing edges, in the same order.
    for (idx, &cell) in order.iter().enumerate() {
        dump_cell_edges(&mut dumper, idx as u32, cell);
    }

    dumper
}

fn write_snapshot(dumper: &Dumper<'_>, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "{{")?;
    writeln!(out, "\"snapshot\":{{")?;
    writeln!(out, "\"meta\":{{")?;
    writeln!(
        out,
        "\"node_fields\":[\"type\",\"name\",\"id\",\"self_size\",\"edge_count\"],"
    )?;
    write!(out, "\"node_types\":[[")?;
    let node_type_names = [
        NodeType::Hidden,
        NodeType::Array,
        NodeType::String,
        NodeType::Object,
        NodeType::Code,
        NodeType::Closure,
        NodeType::Regexp,
        NodeType::Number,
        NodeType::Native,
        NodeType::Synthetic,
        NodeType::ConcatString,
        NodeType::SlicedString,
        NodeType::Symbol,
        NodeType::Bigint,
    ];
    for (i, t) in node_type_names.iter().enumerate() {
        if i > 0 {
            write!(out, ",")?;
        }
        write!(out, "\"{}\"", t.as_str())?;
    }
    writeln!(out, "],\"string\",\"number\",\"number\",\"number\"],")?;
    writeln!(out, "\"edge_fields\":[\"type\",\"name_or_index\",\"to_node\"],")?;
    write!(out, "\"edge_types\":[[")?;
    let edge_type_names = [
        EdgeType::Context,
        EdgeType::Element,
        EdgeType::Property,
        EdgeType::Internal,
        EdgeType::Hidden,
        EdgeType::Shortcut,
        EdgeType::Weak,
    ];
    for (i, t) in edge_type_names.iter().enumerate() {
        if i > 0 {
            write!(out, ",")?;
        }
        write!(out, "\"{}\"", t.as_str())?;
    }
    writeln!(out, "],\"string_or_number\",\"node\"]")?;
    writeln!(out, "}},")?;
    writeln!(out, "\"node_count\":{},", dumper.nodes.len())?;
    writeln!(out, "\"edge_count\":{}", dumper.edges.len())?;
    writeln!(out, "}},")?;

    writeln!(out, "\"nodes\":[")?;
    for (i, n) in dumper.nodes.iter().enumerate() {
        let sep = if i + 1 == dumper.nodes.len() { "" } else { "," };
        writeln!(
            out,
            "{},{},{},{},{}{sep}",
            node_type_names
                .iter()
                .position(|t| *t == n.node_type)
                .unwrap(),
            n.name_id,
            n.id,
            n.self_size,
            n.edge_count
        )?;
    }
    writeln!(out, "],")?;

    writeln!(out, "\"edges\":[")?;
    for (i, e) in dumper.edges.iter().enumerate() {
        let sep = if i + 1 == dumper.edges.len() { "" } else { "," };
        let name_field = match &e.name_or_index {
            NameOrIndex::Str(id) => id.to_string(),
            NameOrIndex::Index(ix) => ix.to_string(),
        };
        writeln!(
            out,
            "{},{},{}{sep}",
            edge_type_names
                .iter()
                .position(|t| *t == e.edge_type)
                .unwrap(),
            name_field,
            e.to_node_offset
        )?;
    }
    writeln!(out, "],")?;

    writeln!(out, "\"strings\":[")?;
    for (i, s) in dumper.strings.iter().enumerate() {
        let sep = if i + 1 == dumper.strings.len() { "" } else { "," };
        writeln!(out, "\"{}\"{sep}", json_escape(s))?;
    }
    writeln!(out, "]")?;
    writeln!(out, "}}")?;
    Ok(())
}

/// Escape a string for embedding in a JSON string literal. Hand-rolled
/// rather than pulled in from a JSON crate, matching the rest of this
/// writer: the snapshot format is simple enough not to need a full
/// serializer, and the one thing it must not do is emit invalid JSON
/// when a property or atom name contains a quote or control character.
fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

fn snapshot_file_name() -> String {
    let now = Local::now();
    format!(
        "Heap.{:04}{:02}{:02}.{:02}{:02}{:02}.{:03}.heapsnapshot",
        now.year(),
        now.month(),
        now.day(),
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis()
    )
}

/// `dump_objects(ctx) -> writes heapsnapshot file`.
///
/// Walks the live graph rooted (by convention, not by reachability — the
/// dumper visits every live cell regardless) at `ctx`, and writes it to
/// `Heap.YYYYMMDD.HHMMSS.mmm.heapsnapshot` in the current directory. Any
/// I/O failure abandons the in-progress snapshot (§7) — the file is only
/// ever created once the full document is already buffered.
pub fn dump_objects(rt: &Runtime, ctx: CellId) -> GcResult<PathBuf> {
    let dumper = build_snapshot(rt.registry(), ctx);
    let mut buf = Vec::new();
    write_snapshot(&dumper, &mut buf)?;

    let path = PathBuf::from(snapshot_file_name());
    let result = File::create(&path).and_then(|mut file| file.write_all(&buf));
    if let Err(err) = result {
        #[cfg(feature = "gc_logging")]
        tracing::warn!(path = %path.display(), error = %err, "heap snapshot write failed, abandoning dump");
        return Err(err.into());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_data::{PropertySlot, ShapeProperty};
    use crate::config::GcConfig;
    use crate::context;
    use crate::runtime::Runtime;
    use std::rc::Rc;

    #[test]
    fn minimal_snapshot_has_root_and_one_property_edge() {
        let mut rt = Runtime::new(GcConfig::default());
        let ctx = rt.new_context();

        let leaf_shape = rt.new_shape(None);
        let leaf = rt.new_object(leaf_shape);
        rt.release_cell(leaf_shape);

        let global_shape = rt.new_shape(None);
        rt.registry_mut().with_data_mut(global_shape, |d| {
            let CellData::Shape(s) = d else { unreachable!() };
            s.properties.push(ShapeProperty { atom: Rc::from("x") });
            s.hashed = true;
        });
        let global = rt.new_object(global_shape);
        rt.release_cell(global_shape);
        rt.registry_mut().with_data_mut(global, |d| {
            let CellData::JsObject(obj) = d else { unreachable!() };
            obj.properties.push(PropertySlot::Value(Value::Object(leaf)));
        });
        rt.registry().header(leaf).inc_ref_count();

        context::set_global_object(&mut rt, ctx, Value::Object(global));
        rt.release(Value::Object(global));

        let dumper = build_snapshot(rt.registry(), ctx);
        // ctx, global, global_shape, leaf, leaf_shape.
        assert!(dumper.nodes.len() >= 5);
        assert!(dumper.strings.contains(&"x".to_string()));

        let has_x_edge = dumper.edges.iter().any(|e| {
            matches!(e.edge_type, EdgeType::Property)
                && matches!(&e.name_or_index, NameOrIndex::Str(id) if dumper.strings[*id as usize] == "x")
        });
        assert!(has_x_edge);

        for e in &dumper.edges {
            assert_eq!(e.to_node_offset % NODE_FIELD_COUNT, 0);
            assert!((e.to_node_offset / NODE_FIELD_COUNT) < dumper.nodes.len() as u32);
        }
    }

    #[test]
    fn edge_count_field_matches_total_emitted_edges() {
        let mut rt = Runtime::new(GcConfig::default());
        let ctx = rt.new_context();
        let shape = rt.new_shape(None);
        let a = rt.new_object(shape);
        rt.release_cell(shape);
        rt.registry().header(a).inc_ref_count();
        context::set_global_object(&mut rt, ctx, Value::Object(a));
        rt.release(Value::Object(a));

        let dumper = build_snapshot(rt.registry(), ctx);
        let total: u32 = dumper.nodes.iter().map(|n| n.edge_count).sum();
        assert_eq!(total as usize, dumper.edges.len());
    }

    #[test]
    fn typed_array_emits_a_plain_named_property_edge_to_its_buffer() {
        let mut rt = Runtime::new(GcConfig::default());
        let ctx = rt.new_context();
        let shape = rt.new_shape(None);
        let buffer = rt.new_object(shape);
        let view = rt.new_object(shape);
        rt.release_cell(shape);
        rt.registry().header(buffer).inc_ref_count();
        rt.registry_mut().with_data_mut(view, |d| {
            let CellData::JsObject(obj) = d else { unreachable!() };
            obj.class = ObjectClassData::TypedArray { buffer };
        });
        rt.registry().header(view).inc_ref_count();
        context::set_global_object(&mut rt, ctx, Value::Object(view));
        rt.release(Value::Object(view));

        let dumper = build_snapshot(rt.registry(), ctx);
        let buffer_idx = dumper.node_index[&buffer];
        let has_typed_array_edge = dumper.edges.iter().any(|e| {
            matches!(e.edge_type, EdgeType::Property)
                && matches!(&e.name_or_index, NameOrIndex::Str(id) if dumper.strings[*id as usize] == "typed_array")
                && e.to_node_offset == buffer_idx * NODE_FIELD_COUNT
        });
        assert!(has_typed_array_edge);
    }
}
