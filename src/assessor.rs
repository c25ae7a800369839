//! The profiling driver: one call, observed, normalized and charted.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::runtime::{ProfileSession, tracer_installed};
use crate::{
    Callable, ChartBuilder, ChartStyle, Figure, Kwargs, MetricTable, PerfError, PerfResult,
    memory_table, render_html, require_directory, time_table, write_text,
};

pub const DEFAULT_SOURCE: &str = "<callable>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Memory,
    Time,
}

impl MetricKind {
    pub fn chart_name(self) -> &'static str {
        match self {
            MetricKind::Memory => "memory_evaluation",
            MetricKind::Time => "time_evaluation",
        }
    }
}

/// What one profiling run produced, per metric kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub function: String,
    pub charts: Vec<ChartSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSummary {
    pub name: String,
    pub rows: usize,
    pub metrics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

pub struct Assessor<C> {
    callable: C,
    n_field: usize,
    kwargs: Kwargs,
    source: String,
    function: String,
    builder: ChartBuilder,
    tables: BTreeMap<MetricKind, MetricTable>,
    charts: BTreeMap<MetricKind, Figure>,
}

impl<C: Callable> Assessor<C> {
    pub fn new(callable: C, n_field: usize, kwargs: Kwargs) -> Self {
        Self {
            callable,
            n_field,
            kwargs,
            source: DEFAULT_SOURCE.to_string(),
            function: "main".to_string(),
            builder: ChartBuilder::default(),
            tables: BTreeMap::new(),
            charts: BTreeMap::new(),
        }
    }

    pub fn with_style(mut self, style: ChartStyle) -> Self {
        self.builder = ChartBuilder::new(style);
        self
    }

    /// Names the root span `<source>:0(<function>)`.
    pub fn with_source(mut self, source: impl Into<String>, function: impl Into<String>) -> Self {
        self.source = source.into();
        self.function = function.into();
        self
    }

    /// Calls the target once and keeps one table and one chart per enabled
    /// metric kind.
    pub fn launch_profiling(&mut self, do_memory: bool, do_time: bool) -> PerfResult<()> {
        if !do_memory && !do_time {
            return Err(PerfError::ConfigurationConflict(
                "at least one of memory or time profiling must be enabled".to_string(),
            ));
        }
        if do_memory && !tracer_installed() {
            tracing::warn!(
                "allocation tracer is not the global allocator; memory statistics will be empty"
            );
        }
        if do_memory && !self.callable.allocations_traceable() {
            tracing::warn!(
                function = %self.function,
                "target allocates outside the host allocator; the memory chart only shows host-side allocations"
            );
        }

        self.tables.clear();
        self.charts.clear();

        let session = ProfileSession::start(do_memory);
        let outcome = session.invoke(&self.source, &self.function, || {
            self.callable.call(&self.kwargs)
        });
        let stats = session.finish();

        if let Err(err) = outcome {
            return Err(PerfError::Invocation {
                function: self.function.clone(),
                message: err.to_string(),
            });
        }
        tracing::debug!(
            function = %self.function,
            calls = stats.time.total_calls(),
            seconds = stats.time.total_time.as_secs_f64(),
            "profiled call"
        );

        if do_memory {
            let memory = stats.memory.unwrap_or_default();
            tracing::debug!(bytes = memory.total_bytes(), "allocations traced");
            self.insert(MetricKind::Memory, memory_table(&memory, self.n_field)?);
        }
        if do_time {
            let report = stats.time.render_report(true);
            self.insert(MetricKind::Time, time_table(&report)?);
        }
        Ok(())
    }

    fn insert(&mut self, kind: MetricKind, table: MetricTable) {
        let figure = self.builder.build(kind.chart_name(), &table);
        self.charts.insert(kind, figure);
        self.tables.insert(kind, table);
    }
}

impl<C> Assessor<C> {
    pub fn charts(&self) -> &BTreeMap<MetricKind, Figure> {
        &self.charts
    }

    pub fn tables(&self) -> &BTreeMap<MetricKind, MetricTable> {
        &self.tables
    }

    /// Writes `<name>.html` for every chart into `dir` and returns the paths.
    pub fn write_html(&self, dir: &Path) -> PerfResult<Vec<PathBuf>> {
        let dir = require_directory(dir)?;
        let mut written = Vec::with_capacity(self.charts.len());
        for figure in self.charts.values() {
            let path = dir.join(format!("{}.html", figure.name));
            write_text(&path, &render_html(figure)?)?;
            tracing::info!(chart = %figure.name, path = %path.display(), "wrote chart");
            written.push(path);
        }
        Ok(written)
    }

    pub fn summary(&self, written: &[PathBuf]) -> AssessmentSummary {
        let charts = self
            .charts
            .iter()
            .map(|(kind, figure)| ChartSummary {
                name: figure.name.clone(),
                rows: figure.row_count(),
                metrics: self
                    .tables
                    .get(kind)
                    .map(|t| t.metric_headers().to_vec())
                    .unwrap_or_default(),
                path: written
                    .iter()
                    .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(figure.name.as_str()))
                    .map(|p| p.display().to_string()),
            })
            .collect();
        AssessmentSummary {
            function: self.function.clone(),
            charts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CallResult, testor};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn temp_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("perfassess-assessor-{name}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    fn sample_kwargs() -> Kwargs {
        let mut kwargs = Kwargs::new();
        kwargs.insert("value".to_string(), serde_json::json!(vec![0; 1000]));
        kwargs
    }

    #[test]
    fn both_modes_disabled_never_calls_the_target() {
        let calls = AtomicUsize::new(0);
        let target = |_: &Kwargs| -> CallResult {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        let mut assessor = Assessor::new(target, 0, Kwargs::new());
        assert!(matches!(
            assessor.launch_profiling(false, false),
            Err(PerfError::ConfigurationConflict(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(assessor.charts().is_empty());
    }

    #[test]
    fn target_is_called_once_and_both_charts_exist() {
        let mut assessor = Assessor::new(testor, 1, sample_kwargs()).with_source("sample", "testor");
        assessor.launch_profiling(true, true).expect("profiling");

        let names: Vec<&str> = assessor.charts().values().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["memory_evaluation", "time_evaluation"]);
        for (kind, table) in assessor.tables() {
            assert!(table.row_count() >= 1, "{kind:?} has no rows");
            assert!(table.rows().iter().flatten().all(|v| *v >= 0.0));
        }
        for figure in assessor.charts().values() {
            assert!(figure.trace.y.windows(2).all(|w| w[0] >= w[1]));
        }

        let time = &assessor.tables()[&MetricKind::Time];
        assert!(time.labels().iter().any(|l| l == "sample:0(testor)"));
        assert!(assessor.charts()[&MetricKind::Time].dropdown.is_some());
        assert!(assessor.charts()[&MetricKind::Memory].dropdown.is_none());
    }

    #[test]
    fn time_only_run_skips_memory() {
        let mut assessor = Assessor::new(testor, 0, sample_kwargs());
        assessor.launch_profiling(false, true).expect("profiling");
        assert_eq!(assessor.charts().len(), 1);
        assert!(assessor.charts().contains_key(&MetricKind::Time));
    }

    #[test]
    fn failing_target_builds_no_chart() {
        let mut assessor = Assessor::new(testor, 0, Kwargs::new()).with_source("sample", "testor");
        let err = assessor.launch_profiling(true, true).expect_err("missing value");
        assert!(matches!(err, PerfError::Invocation { ref function, .. } if function == "testor"));
        assert!(assessor.charts().is_empty());
        assert!(assessor.tables().is_empty());
    }

    #[test]
    fn write_html_validates_directory_and_writes_each_chart() {
        let mut assessor = Assessor::new(testor, 1, sample_kwargs());
        assessor.launch_profiling(true, true).expect("profiling");

        let dir = temp_dir("write");
        let written = assessor.write_html(&dir).expect("write");
        assert_eq!(written.len(), 2);
        let mut files: Vec<String> = std::fs::read_dir(&dir)
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, ["memory_evaluation.html", "time_evaluation.html"]);

        assert!(matches!(
            assessor.write_html(&dir.join("nope")),
            Err(PerfError::FileMissing(_))
        ));
        let file = dir.join("existing_file.txt");
        std::fs::write(&file, "x").expect("write file");
        assert!(matches!(
            assessor.write_html(&file),
            Err(PerfError::BadShape(_))
        ));

        let summary = assessor.summary(&written);
        assert_eq!(summary.charts.len(), 2);
        assert!(summary.charts.iter().all(|c| c.path.is_some()));
        assert_eq!(summary.charts[1].metrics.len(), 5);
    }

    #[tracing::instrument]
    fn count_ncalls(n: u64) -> u64 {
        (0..n).sum()
    }

    #[test]
    fn instrumented_sites_named_like_the_header_stay_rows() {
        let target = |_: &Kwargs| -> CallResult {
            std::hint::black_box(count_ncalls(10));
            Ok(())
        };
        let mut assessor = Assessor::new(target, 0, Kwargs::new()).with_source("demo", "main");
        assessor.launch_profiling(false, true).expect("profiling");

        let time = &assessor.tables()[&MetricKind::Time];
        assert_eq!(time.headers()[0], "ncalls");
        assert_eq!(time.axis_header(), "function");
        assert!(time.labels().iter().any(|l| l == "demo:0(main)"));
        assert!(time.labels().iter().any(|l| l.ends_with("(count_ncalls)")));
        assert_eq!(
            assessor.charts()[&MetricKind::Time].layout.xaxis.title,
            "Tested function (function)"
        );
    }
}
