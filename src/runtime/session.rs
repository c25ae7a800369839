//! One observation session around a single call.

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;

use std::sync::{Arc, Mutex, PoisonError};

use super::alloctrace::{self, MAX_SITES, TracerGuard};
use super::callgraph::{AllocationRecord, CallGraph, CallGraphLayer, TimeStats};

/// Per-site allocation totals collected by the tracer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub records: Vec<AllocationRecord>,
}

impl MemoryStats {
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.bytes).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawStatistics {
    pub time: TimeStats,
    pub memory: Option<MemoryStats>,
}

/// Installs the call-graph profiler as this thread's dispatcher and, when asked
/// for, starts the allocation tracer. Both are torn down when the session is
/// finished or dropped, whatever way the observed call returns.
pub struct ProfileSession {
    graph: Arc<Mutex<CallGraph>>,
    tracer: Option<TracerGuard>,
    dispatch: DefaultGuard,
}

impl ProfileSession {
    pub fn start(trace_memory: bool) -> Self {
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        let subscriber =
            tracing_subscriber::registry().with(CallGraphLayer::new(Arc::clone(&graph)));
        let dispatch = tracing::subscriber::set_default(subscriber);
        let tracer = trace_memory.then(alloctrace::start);
        Self {
            graph,
            tracer,
            dispatch,
        }
    }

    /// Runs `call` inside the root span `<source>:0(<function>)`.
    pub fn invoke<T>(&self, source: &str, function: &str, call: impl FnOnce() -> T) -> T {
        let (span, _entered);
        {
            let _pause = alloctrace::pause();
            span = tracing::info_span!("invoke", source = %source, function = %function);
            _entered = span.enter();
        }
        call()
    }

    /// Snapshot memory first, then stop the tracer and the profiler.
    pub fn finish(self) -> RawStatistics {
        let ProfileSession {
            graph,
            tracer,
            dispatch,
        } = self;
        let allocations = tracer.as_ref().map(TracerGuard::snapshot);
        drop(tracer);
        drop(dispatch);

        let graph = graph.lock().unwrap_or_else(PoisonError::into_inner);
        let overflowed = graph.overflowed_sites();
        if overflowed > 0 && allocations.is_some() {
            tracing::warn!(
                overflowed,
                capacity = MAX_SITES,
                "too many call sites for the allocation tracer; their allocations are reported as ~:0"
            );
        }
        RawStatistics {
            time: graph.time_stats(),
            memory: allocations.map(|a| MemoryStats {
                records: graph.allocation_records(&a),
            }),
        }
    }
}
