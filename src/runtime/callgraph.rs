//! Call-graph time profiler built on `tracing` spans.
//!
//! Every span call site becomes a profiler site. Entering a span pushes a
//! frame; exiting it charges the elapsed time to the site (cumulative) and the
//! elapsed time minus children to the site (self). Recursive entries count as
//! calls but not as primitive calls, and only the outermost one contributes
//! cumulative time.

use tracing::callsite::Identifier;
use tracing::field::{Field, Visit};
use tracing::span;
use tracing::{Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::alloctrace::{self, SiteAllocation, MAX_SITES};

/// Span field naming the code unit a root span stands for.
pub const SOURCE_FIELD: &str = "source";
/// Span field overriding the function name of a root span.
pub const FUNCTION_FIELD: &str = "function";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteMeta {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl SiteMeta {
    fn untracked() -> Self {
        Self {
            file: "~".to_string(),
            line: 0,
            function: "<untracked>".to_string(),
        }
    }
}

#[derive(Debug)]
struct SiteStats {
    meta: SiteMeta,
    calls: u64,
    primitive_calls: u64,
    active: u32,
    self_time: Duration,
    cumulative_time: Duration,
}

#[derive(Debug)]
struct Frame {
    site: usize,
    start: Instant,
    children: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SiteKey {
    callsite: Identifier,
    source: Option<String>,
    function: Option<String>,
}

#[derive(Debug)]
pub struct CallGraph {
    sites: Vec<SiteStats>,
    index: HashMap<SiteKey, usize>,
    stack: Vec<Frame>,
    total: Duration,
}

impl Default for CallGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl CallGraph {
    pub fn new() -> Self {
        Self {
            sites: vec![SiteStats::new(SiteMeta::untracked())],
            index: HashMap::new(),
            stack: Vec::new(),
            total: Duration::ZERO,
        }
    }

    fn intern(&mut self, metadata: &'static Metadata<'static>, fields: SiteFields) -> usize {
        let key = SiteKey {
            callsite: metadata.callsite(),
            source: fields.source.clone(),
            function: fields.function.clone(),
        };
        if let Some(site) = self.index.get(&key) {
            return *site;
        }
        let meta = match fields.function {
            Some(function) => SiteMeta {
                file: fields.source.unwrap_or_else(|| "~".to_string()),
                line: 0,
                function,
            },
            None => SiteMeta {
                file: metadata.file().unwrap_or("~").to_string(),
                line: metadata.line().unwrap_or(0),
                function: metadata.name().to_string(),
            },
        };
        let site = self.sites.len();
        self.sites.push(SiteStats::new(meta));
        self.index.insert(key, site);
        site
    }

    fn enter(&mut self, site: usize, now: Instant) {
        let Some(stats) = self.sites.get_mut(site) else {
            return;
        };
        stats.calls += 1;
        if stats.active == 0 {
            stats.primitive_calls += 1;
        }
        stats.active += 1;
        self.stack.push(Frame {
            site,
            start: now,
            children: Duration::ZERO,
        });
    }

    /// Closes the innermost frame of `site` and returns the site that is
    /// current afterwards.
    fn exit(&mut self, site: usize, now: Instant) -> usize {
        let Some(pos) = self.stack.iter().rposition(|f| f.site == site) else {
            return self.current_site();
        };
        let frame = self.stack.remove(pos);
        let elapsed = now.saturating_duration_since(frame.start);
        if let Some(stats) = self.sites.get_mut(site) {
            stats.self_time += elapsed.saturating_sub(frame.children);
            stats.active = stats.active.saturating_sub(1);
            if stats.active == 0 {
                stats.cumulative_time += elapsed;
            }
        }
        match pos.checked_sub(1).and_then(|p| self.stack.get_mut(p)) {
            Some(parent) => parent.children += elapsed,
            None => self.total += elapsed,
        }
        self.current_site()
    }

    fn current_site(&self) -> usize {
        self.stack.last().map_or(0, |f| f.site)
    }

    pub fn time_stats(&self) -> TimeStats {
        let mut records: Vec<TimeRecord> = self
            .sites
            .iter()
            .filter(|s| s.calls > 0)
            .map(|s| TimeRecord {
                file: s.meta.file.clone(),
                line: s.meta.line,
                function: s.meta.function.clone(),
                calls: s.calls,
                primitive_calls: s.primitive_calls,
                self_time: s.self_time,
                cumulative_time: s.cumulative_time,
            })
            .collect();
        records.sort_by(|a, b| {
            b.cumulative_time
                .cmp(&a.cumulative_time)
                .then_with(|| a.file.cmp(&b.file))
                .then_with(|| a.line.cmp(&b.line))
        });
        TimeStats {
            records,
            total_time: self.total,
        }
    }

    /// Number of sites past the allocation tracer's capacity. Their allocations
    /// are charged to the untracked site.
    pub fn overflowed_sites(&self) -> usize {
        self.sites.len().saturating_sub(MAX_SITES)
    }

    /// Joins allocation counters with the site table.
    pub fn allocation_records(&self, allocations: &[SiteAllocation]) -> Vec<AllocationRecord> {
        allocations
            .iter()
            .map(|a| {
                let meta = if a.site < MAX_SITES {
                    self.sites.get(a.site).map(|s| s.meta.clone())
                } else {
                    None
                }
                .unwrap_or_else(SiteMeta::untracked);
                AllocationRecord {
                    file: meta.file,
                    line: meta.line,
                    bytes: a.bytes,
                    count: a.count,
                }
            })
            .collect()
    }
}

impl SiteStats {
    fn new(meta: SiteMeta) -> Self {
        Self {
            meta,
            calls: 0,
            primitive_calls: 0,
            active: 0,
            self_time: Duration::ZERO,
            cumulative_time: Duration::ZERO,
        }
    }
}

/// Bytes allocated while a given site was the innermost active one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRecord {
    pub file: String,
    pub line: u32,
    pub bytes: u64,
    pub count: u64,
}

impl AllocationRecord {
    /// `<file>:<line>`, the origin of the allocations.
    pub fn location(&self) -> String {
        format!("{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRecord {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub calls: u64,
    pub primitive_calls: u64,
    pub self_time: Duration,
    pub cumulative_time: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeStats {
    pub records: Vec<TimeRecord>,
    pub total_time: Duration,
}

impl TimeStats {
    pub fn total_calls(&self) -> u64 {
        self.records.iter().map(|r| r.calls).sum()
    }

    pub fn primitive_calls(&self) -> u64 {
        self.records.iter().map(|r| r.primitive_calls).sum()
    }

    /// Renders the classic profiler text report. With `strip_dirs` only the
    /// file name of each site is kept.
    pub fn render_report(&self, strip_dirs: bool) -> String {
        let total = self.total_calls();
        let primitive = self.primitive_calls();
        let mut out = String::new();
        if total == primitive {
            out.push_str(&format!(
                "{total:>9} function calls in {:.6} seconds\n\n",
                self.total_time.as_secs_f64()
            ));
        } else {
            out.push_str(&format!(
                "{total:>9} function calls ({primitive} primitive calls) in {:.6} seconds\n\n",
                self.total_time.as_secs_f64()
            ));
        }
        out.push_str("   Ordered by: cumulative time\n\n");
        out.push_str("   ncalls  tottime  percall  cumtime  percall filename:lineno(function)\n");
        for r in &self.records {
            let ncalls = if r.calls == r.primitive_calls {
                r.calls.to_string()
            } else {
                format!("{}/{}", r.calls, r.primitive_calls)
            };
            let file = if strip_dirs {
                Path::new(&r.file)
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or(&r.file)
            } else {
                r.file.as_str()
            };
            let tottime = r.self_time.as_secs_f64();
            let cumtime = r.cumulative_time.as_secs_f64();
            out.push_str(&format!(
                "{ncalls:>9} {tottime:>8.6} {:>8.6} {cumtime:>8.6} {:>8.6} {file}:{}({})\n",
                tottime / r.calls.max(1) as f64,
                cumtime / r.primitive_calls.max(1) as f64,
                r.line,
                r.function,
            ));
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
struct SiteId(usize);

#[derive(Debug, Default)]
struct SiteFields {
    source: Option<String>,
    function: Option<String>,
}

impl Visit for SiteFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            SOURCE_FIELD => self.source = Some(value.to_string()),
            FUNCTION_FIELD => self.function = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            SOURCE_FIELD => self.source = Some(format!("{value:?}")),
            FUNCTION_FIELD => self.function = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

/// Feeds span lifecycle events into a shared [`CallGraph`] and keeps the
/// allocation tracer pointed at the innermost active site.
#[derive(Debug, Clone)]
pub struct CallGraphLayer {
    graph: Arc<Mutex<CallGraph>>,
}

impl CallGraphLayer {
    pub fn new(graph: Arc<Mutex<CallGraph>>) -> Self {
        Self { graph }
    }

    fn lock(&self) -> MutexGuard<'_, CallGraph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn site_of<S>(id: &span::Id, ctx: &Context<'_, S>) -> Option<usize>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let span = ctx.span(id)?;
    let site = span.extensions().get::<SiteId>().map(|s| s.0);
    site
}

impl<S> Layer<S> for CallGraphLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let _pause = alloctrace::pause();
        let mut fields = SiteFields::default();
        attrs.record(&mut fields);
        let site = self.lock().intern(attrs.metadata(), fields);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SiteId(site));
        }
    }

    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        let _pause = alloctrace::pause();
        let Some(site) = site_of(id, &ctx) else {
            return;
        };
        self.lock().enter(site, Instant::now());
        alloctrace::set_current_site(site);
    }

    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        let now = Instant::now();
        let _pause = alloctrace::pause();
        let Some(site) = site_of(id, &ctx) else {
            return;
        };
        let current = self.lock().exit(site, now);
        alloctrace::set_current_site(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn profiled<F: FnOnce()>(f: F) -> TimeStats {
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        let subscriber =
            tracing_subscriber::registry().with(CallGraphLayer::new(Arc::clone(&graph)));
        tracing::subscriber::with_default(subscriber, f);
        let stats = graph.lock().expect("graph").time_stats();
        stats
    }

    #[tracing::instrument]
    fn leaf(n: u64) -> u64 {
        n * 2
    }

    #[tracing::instrument]
    fn recurse(depth: u32) -> u32 {
        if depth == 0 { 0 } else { 1 + recurse(depth - 1) }
    }

    #[test]
    fn counts_calls_per_site() {
        let stats = profiled(|| {
            let span = tracing::info_span!("invoke", source = "demo", function = "outer");
            let _entered = span.enter();
            for i in 0..5 {
                leaf(i);
            }
        });
        let root = stats
            .records
            .iter()
            .find(|r| r.function == "outer")
            .expect("root row");
        assert_eq!(root.file, "demo");
        assert_eq!(root.line, 0);
        assert_eq!(root.calls, 1);

        let leaf_row = stats
            .records
            .iter()
            .find(|r| r.function == "leaf")
            .expect("leaf row");
        assert_eq!(leaf_row.calls, 5);
        assert_eq!(leaf_row.primitive_calls, 5);
        assert!(root.cumulative_time >= leaf_row.cumulative_time);
        assert_eq!(stats.total_calls(), 6);
    }

    #[test]
    fn recursion_counts_primitive_calls_once() {
        let stats = profiled(|| {
            recurse(3);
        });
        let row = stats
            .records
            .iter()
            .find(|r| r.function == "recurse")
            .expect("recurse row");
        assert_eq!(row.calls, 4);
        assert_eq!(row.primitive_calls, 1);
        let report = stats.render_report(true);
        assert!(report.contains("4/1"));
        assert!(report.contains("4 function calls (1 primitive calls)"));
    }

    #[test]
    fn report_strips_directories() {
        let stats = profiled(|| {
            leaf(1);
        });
        let stripped = stats.render_report(true);
        let row = stripped
            .lines()
            .find(|l| l.ends_with("(leaf)"))
            .expect("leaf line");
        assert!(!row.contains('/'));
        assert!(row.contains("callgraph.rs:"));
        assert!(stripped.contains("ncalls  tottime  percall  cumtime  percall"));
    }

    #[test]
    fn sites_past_tracer_capacity_are_counted() {
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        let subscriber =
            tracing_subscriber::registry().with(CallGraphLayer::new(Arc::clone(&graph)));
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..MAX_SITES + 3 {
                let span = tracing::info_span!("invoke", source = "many", function = %i);
                let _entered = span.enter();
            }
        });
        let graph = graph.lock().expect("graph");
        assert_eq!(graph.overflowed_sites(), 4);
        assert_eq!(graph.time_stats().records.len(), MAX_SITES + 3);
    }
}
