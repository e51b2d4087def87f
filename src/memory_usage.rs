//! Memory-usage reporting (spec §4.9): a point-in-time summary of
//! outstanding allocator bytes and a per-class cell histogram, plus a
//! fixed plaintext table formatter for dumping it to a log or console.
//!
//! This piggybacks on the heap-snapshot dumper's own node classification
//! (`snapshot::classify_cell`) for the histogram rather than re-deriving
//! per-kind sizes a second way — the two reports should never disagree
//! about what a cell is called or how large it is.

use std::io::{self, Write};

use rustc_hash::FxHashMap;

use crate::allocator::MallocCounters;
use crate::object::ListId;
use crate::runtime::Runtime;
use crate::snapshot;

/// One row of the per-class histogram: how many live cells classify to
/// this display name, and how many bytes of `self_size` they account for.
#[derive(Debug, Clone)]
pub struct ClassHistogramEntry {
    /// The class/display name these cells were classified under (the
    /// same name a heap snapshot would show for them).
    pub class_name: String,
    /// Number of live cells in this class.
    pub count: u64,
    /// Total `self_size` across those cells.
    pub bytes: u64,
}

/// A snapshot of memory usage at the moment [`compute_memory_usage`] was
/// called: allocator-facade counters, live cell counts by kind, and a
/// per-class histogram.
#[derive(Debug, Clone)]
pub struct MemoryUsageReport {
    /// Allocator-facade counters as of this call.
    pub allocator: MallocCounters,
    /// Live `JS_OBJECT` cells.
    pub object_count: u64,
    /// Live `FUNCTION_BYTECODE` cells.
    pub function_bytecode_count: u64,
    /// Live `VAR_REF` cells.
    pub var_ref_count: u64,
    /// Live `ASYNC_FUNCTION` cells.
    pub async_function_count: u64,
    /// Live `SHAPE` cells.
    pub shape_count: u64,
    /// Live `CONTEXT` cells.
    pub context_count: u64,
    /// Per-class-name histogram, sorted by descending byte total.
    pub class_histogram: Vec<ClassHistogramEntry>,
}

/// `compute_memory_usage(rt) -> Report`: walk every live cell once,
/// tallying counts by kind and a per-class byte histogram, and pair that
/// with the allocator facade's own running counters.
pub fn compute_memory_usage(rt: &Runtime) -> MemoryUsageReport {
    use crate::object::Kind;

    let registry = rt.registry();
    let mut object_count = 0u64;
    let mut function_bytecode_count = 0u64;
    let mut var_ref_count = 0u64;
    let mut async_function_count = 0u64;
    let mut shape_count = 0u64;
    let mut context_count = 0u64;

    let mut histogram: FxHashMap<String, (u64, u64)> = FxHashMap::default();

    for id in registry.list_ids(ListId::Live) {
        match registry.header(id).kind() {
            Kind::JsObject => object_count += 1,
            Kind::FunctionBytecode => function_bytecode_count += 1,
            Kind::VarRef => var_ref_count += 1,
            Kind::AsyncFunction => async_function_count += 1,
            Kind::Shape => shape_count += 1,
            Kind::Context => context_count += 1,
        }
        let (node_type, name, size) = snapshot::classify_cell(registry, id);
        let label = if name.is_empty() {
            node_type.as_str().to_string()
        } else {
            name
        };
        let entry = histogram.entry(label).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += size as u64;
    }

    let mut class_histogram: Vec<ClassHistogramEntry> = histogram
        .into_iter()
        .map(|(class_name, (count, bytes))| ClassHistogramEntry {
            class_name,
            count,
            bytes,
        })
        .collect();
    class_histogram.sort_by(|a, b| {
        b.bytes
            .cmp(&a.bytes)
            .then_with(|| a.class_name.cmp(&b.class_name))
    });

    MemoryUsageReport {
        allocator: rt.allocator_counters(),
        object_count,
        function_bytecode_count,
        var_ref_count,
        async_function_count,
        shape_count,
        context_count,
        class_histogram,
    }
}

/// `dump_memory_usage(out, report)`: render a fixed plaintext table.
///
/// Format is deliberately simple column-aligned text rather than a
/// structured encoding — this report is for a human reading a log, not a
/// tool parsing a wire format (that's what the heap snapshot is for).
pub fn dump_memory_usage(out: &mut dyn Write, report: &MemoryUsageReport) -> io::Result<()> {
    writeln!(out, "Memory usage")?;
    writeln!(out, "------------")?;
    writeln!(
        out,
        "malloc: {} allocations, {} bytes{}",
        report.allocator.malloc_count,
        report.allocator.malloc_size,
        match report.allocator.malloc_limit {
            Some(limit) => format!(" (limit {limit})"),
            None => String::new(),
        }
    )?;
    writeln!(out)?;
    writeln!(out, "Cells by kind")?;
    writeln!(out, "  JS_OBJECT           {:>10}", report.object_count)?;
    writeln!(out, "  FUNCTION_BYTECODE   {:>10}", report.function_bytecode_count)?;
    writeln!(out, "  VAR_REF             {:>10}", report.var_ref_count)?;
    writeln!(out, "  ASYNC_FUNCTION      {:>10}", report.async_function_count)?;
    writeln!(out, "  SHAPE               {:>10}", report.shape_count)?;
    writeln!(out, "  CONTEXT             {:>10}", report.context_count)?;
    writeln!(out)?;
    writeln!(out, "{:<32}{:>10}{:>14}", "Class", "Count", "Bytes")?;
    for entry in &report.class_histogram {
        writeln!(
            out,
            "{:<32}{:>10}{:>14}",
            entry.class_name, entry.count, entry.bytes
        )?;
    }
    Ok(())
}
