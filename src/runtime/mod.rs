//! Observation runtime: call-graph profiler, allocation tracer and the session
//! tying both to a single call.

pub mod alloctrace;
pub mod callgraph;
pub mod session;

pub use alloctrace::{TracingAllocator, tracer_installed};
pub use callgraph::{AllocationRecord, CallGraph, CallGraphLayer, TimeRecord, TimeStats};
pub use session::{MemoryStats, ProfileSession, RawStatistics};
