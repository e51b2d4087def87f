//! # Managed-heap subsystem for an embedded dynamic-language runtime
//!
//! A [`Runtime`] owns a cell registry holding the six GC-managed cell
//! kinds (`JS_OBJECT`, `FUNCTION_BYTECODE`, `VAR_REF`, `ASYNC_FUNCTION`,
//! `SHAPE`, `CONTEXT`), a hybrid reference-counted / cycle-collecting
//! reclaimer, and a heap-snapshot dumper compatible with browser
//! heap-profiler tooling.
//!
//! ## Design
//!
//! - **Reference counting** (`refcount.rs`): every cell's strong count
//!   drops to zero the instant its last reference goes away, and is
//!   reclaimed synchronously through a drain loop.
//! - **Cycle collection** (`collector.rs`): a trial-deletion pass over
//!   the live set finds and frees reference cycles no root reaches.
//! - **Heap snapshots** (`snapshot.rs`): a two-phase graph walk emits a
//!   `.heapsnapshot` file in the same node/edge/string schema a browser
//!   devtools heap profiler consumes.
//! - **Memory usage** (`memory_usage.rs`): a point-in-time allocator and
//!   per-class cell census, reusing the snapshot dumper's own
//!   classification so the two reports never disagree.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod allocator;
pub mod cell_data;
pub mod collector;
pub mod config;
pub mod context;
pub mod error;
pub mod memory_usage;
pub mod object;
pub mod refcount;
pub mod registry;
pub mod runtime;
pub mod snapshot;
pub mod visitor;
pub mod weak_ref;

pub use allocator::{AllocatorFacade, MallocCounters, RawAllocator, SystemAllocator};
pub use cell_data::{CellData, ContextData, ObjectData};
pub use collector::{Collector, GcStats};
pub use config::{GcConfig, Threshold};
pub use error::{GcError, GcResult};
pub use memory_usage::{ClassHistogramEntry, MemoryUsageReport};
pub use object::{CellId, Header, Kind, ListId, Value};
pub use registry::Registry;
pub use runtime::Runtime;
pub use snapshot::{EdgeType, NodeType};
pub use weak_ref::{RecordId, WeakTable};
