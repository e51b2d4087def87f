//! End-to-end tests against the public `Runtime` API: cycle reclamation,
//! external-root preservation, automatic GC triggering, and heap-snapshot
//! output. Property slots are wired directly through `Registry` (as a
//! bytecode interpreter embedding this crate would), since shape/property
//! management itself is out of this crate's scope.

use std::rc::Rc;

use embergc::cell_data::{CellData, PropertySlot, ShapeProperty};
use embergc::context;
use embergc::{CellId, GcConfig, Runtime, Threshold, Value};

/// Surfaces `gc_logging` trace output on stderr when this feature is
/// enabled, so a failing scenario test can be re-run with the phase
/// transitions and collection counters visible instead of guessing.
#[cfg(feature = "gc_logging")]
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[cfg(not(feature = "gc_logging"))]
fn init_tracing() {}

fn new_shape(rt: &mut Runtime) -> CellId {
    rt.new_shape(None)
}

fn named_shape(rt: &mut Runtime, atoms: &[&str]) -> CellId {
    let shape = rt.new_shape(None);
    rt.registry_mut().with_data_mut(shape, |data| {
        let CellData::Shape(s) = data else { unreachable!() };
        for atom in atoms {
            s.properties.push(ShapeProperty { atom: Rc::from(*atom) });
        }
        s.hashed = true;
    });
    shape
}

fn push_property(rt: &mut Runtime, obj: CellId, value: Value) {
    rt.retain(&value);
    rt.registry_mut().with_data_mut(obj, |data| {
        let CellData::JsObject(o) = data else { unreachable!() };
        o.properties.push(PropertySlot::Value(value));
    });
}

#[test]
fn self_referential_object_survives_release_until_a_collection_runs() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    let shape = new_shape(&mut rt);
    let a = rt.new_object(shape);
    rt.release_cell(shape);

    push_property(&mut rt, a, Value::Object(a));
    rt.release(Value::Object(a));

    // The self-cycle keeps it alive; only `run_gc` can find it.
    assert!(!rt.is_empty());
    assert!(rt.is_live(a));

    rt.run_gc();
    assert!(rt.is_empty());
    assert_eq!(rt.stats().collections, 1);
}

#[test]
fn two_cycle_survives_while_externally_rooted_then_collects_together() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    let shape_a = new_shape(&mut rt);
    let shape_b = new_shape(&mut rt);
    let a = rt.new_object(shape_a);
    let b = rt.new_object(shape_b);
    rt.release_cell(shape_a);
    rt.release_cell(shape_b);

    push_property(&mut rt, a, Value::Object(b));
    push_property(&mut rt, b, Value::Object(a));

    // `a` is still held by its creator; the cycle alone keeps `b` alive.
    rt.run_gc();
    assert!(!rt.is_empty());

    rt.release(Value::Object(a));
    rt.run_gc();
    assert!(rt.is_empty());
}

#[test]
fn leaf_reachable_only_through_a_dead_cycle_is_reclaimed_too() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    let shape_a = new_shape(&mut rt);
    let shape_b = new_shape(&mut rt);
    let a = rt.new_object(shape_a);
    let b = rt.new_object(shape_b);
    let leaf_shape = new_shape(&mut rt);
    let leaf = rt.new_object(leaf_shape);
    rt.release_cell(shape_a);
    rt.release_cell(shape_b);
    rt.release_cell(leaf_shape);

    push_property(&mut rt, a, Value::Object(b));
    push_property(&mut rt, b, Value::Object(a));
    push_property(&mut rt, a, Value::Object(leaf));
    rt.release(Value::Object(leaf));

    rt.release(Value::Object(a));
    rt.release(Value::Object(b));

    rt.run_gc();
    assert!(rt.is_empty());
}

#[test]
fn disabled_threshold_requires_a_manual_collection() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default().with_gc_threshold(Threshold::Disabled));
    let shape = new_shape(&mut rt);
    for _ in 0..50 {
        let a = rt.new_object(shape);
        let b = rt.new_object(shape);
        push_property(&mut rt, a, Value::Object(b));
        push_property(&mut rt, b, Value::Object(a));
        rt.release(Value::Object(a));
        rt.release(Value::Object(b));
    }
    rt.release_cell(shape);
    assert_eq!(rt.stats().collections, 0);
    rt.run_gc();
    assert!(rt.is_empty());
}

#[test]
fn low_threshold_reclaims_garbage_automatically_before_it_piles_up() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default().with_gc_threshold(Threshold::Bytes(1024)));
    let shape = new_shape(&mut rt);
    for _ in 0..100 {
        let a = rt.new_object(shape);
        let b = rt.new_object(shape);
        push_property(&mut rt, a, Value::Object(b));
        push_property(&mut rt, b, Value::Object(a));
        rt.release(Value::Object(a));
        rt.release(Value::Object(b));
    }
    rt.release_cell(shape);
    assert!(rt.stats().collections >= 1);
    rt.run_gc();
    assert!(rt.is_empty());
}

#[test]
fn two_consecutive_collections_with_no_new_garbage_reclaim_nothing_the_second_time() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    let shape_a = new_shape(&mut rt);
    let shape_b = new_shape(&mut rt);
    let a = rt.new_object(shape_a);
    let b = rt.new_object(shape_b);
    rt.release_cell(shape_a);
    rt.release_cell(shape_b);
    push_property(&mut rt, a, Value::Object(b));
    push_property(&mut rt, b, Value::Object(a));
    rt.release(Value::Object(a));
    rt.release(Value::Object(b));

    rt.run_gc();
    assert!(rt.is_empty());
    let collections_after_first = rt.stats().collections;

    rt.run_gc();
    assert!(rt.is_empty());
    assert_eq!(rt.stats().collections, collections_after_first + 1);
    assert_eq!(rt.stats().last_reclaimed, 0);
}

#[test]
fn is_live_is_false_for_an_id_that_was_never_allocated() {
    init_tracing();
    let rt = Runtime::new(GcConfig::default());
    assert!(!rt.is_live(CellId(12345)));
}

#[test]
fn releasing_a_context_root_collects_everything_it_transitively_held() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    let ctx_a = rt.new_context();
    let ctx_b = rt.new_context();
    assert_ne!(ctx_a, ctx_b);
    assert_eq!(rt.contexts(), &[ctx_a, ctx_b]);
    assert!(rt.is_live(ctx_a));

    rt.release_context_root(ctx_a);
    assert!(!rt.is_live(ctx_a));
    assert_eq!(rt.contexts(), &[ctx_b]);

    rt.release_context_root(ctx_b);
    assert!(rt.is_empty());
}

#[test]
fn heap_snapshot_of_a_global_with_one_nested_object_names_its_property() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    let ctx = rt.new_context();

    let x_shape = named_shape(&mut rt, &["n"]);
    let x = rt.new_object(x_shape);
    rt.release_cell(x_shape);
    push_property(&mut rt, x, Value::Int(42));

    let global_shape = named_shape(&mut rt, &["x"]);
    let global = rt.new_object(global_shape);
    rt.release_cell(global_shape);
    push_property(&mut rt, global, Value::Object(x));
    rt.release(Value::Object(x));

    context::set_global_object(&mut rt, ctx, Value::Object(global));
    rt.release(Value::Object(global));

    let path = rt.dump_objects(ctx).expect("snapshot write should succeed");
    let contents = std::fs::read_to_string(&path).expect("snapshot file should be readable");
    std::fs::remove_file(&path).ok();

    assert!(contents.contains("\"node_count\""));
    assert!(contents.contains("\"edge_count\""));
    assert!(contents.contains("\"x\""));
    assert!(contents.contains("\"n\""));

    rt.release_context_root(ctx);
    assert!(rt.is_empty());
}

#[test]
fn memory_usage_report_reflects_live_object_and_shape_counts() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    let shape = new_shape(&mut rt);
    let a = rt.new_object(shape);
    let b = rt.new_object(shape);
    rt.release_cell(shape);

    let report = rt.compute_memory_usage();
    assert_eq!(report.object_count, 2);
    assert_eq!(report.shape_count, 1);

    let mut buf = Vec::new();
    rt.dump_memory_usage(&mut buf, &report).unwrap();
    let text = String::from_utf8(buf).unwrap();
    assert!(text.contains("Memory usage"));

    rt.release(Value::Object(a));
    rt.release(Value::Object(b));
    assert!(rt.is_empty());
}

#[test]
fn memory_limit_is_reflected_in_the_usage_report() {
    init_tracing();
    let mut rt = Runtime::new(GcConfig::default());
    rt.set_memory_limit(4096);
    let report = rt.compute_memory_usage();
    assert_eq!(report.allocator.malloc_limit, Some(4096));
}
