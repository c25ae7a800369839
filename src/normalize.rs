//! Raw statistics → metric tables.

use serde::{Deserialize, Serialize};

use std::collections::HashMap;

use crate::{MemoryStats, PerfError, PerfResult};

pub const MEMORY_HEADERS: [&str; 2] = ["size (Mib)", "function"];

const TIME_HEADER: [&str; 6] = [
    "ncalls",
    "tottime",
    "percall",
    "cumtime",
    "percall",
    "filename:lineno(function)",
];
const TIME_AXIS_HEADER: &str = "function";
const TIME_UNIT_SUFFIX: &str = " (s)";
const TIME_NUMERIC_FIELDS: usize = 5;

/// Labels × numeric columns. The last header names the row axis and has no
/// column of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTable {
    labels: Vec<String>,
    headers: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl MetricTable {
    pub fn new(labels: Vec<String>, headers: Vec<String>, rows: Vec<Vec<f64>>) -> PerfResult<Self> {
        if headers.len() < 2 {
            return Err(PerfError::Parse(format!(
                "a metric table needs at least one metric and a row axis header, got {headers:?}"
            )));
        }
        if labels.len() != rows.len() {
            return Err(PerfError::Parse(format!(
                "{} labels for {} rows",
                labels.len(),
                rows.len()
            )));
        }
        let width = headers.len() - 1;
        if let Some(bad) = rows.iter().position(|r| r.len() != width) {
            return Err(PerfError::Parse(format!(
                "row {bad} has {} values, expected {width}",
                rows[bad].len()
            )));
        }
        Ok(Self {
            labels,
            headers,
            rows,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len() - 1
    }

    /// Headers of the numeric columns.
    pub fn metric_headers(&self) -> &[String] {
        &self.headers[..self.column_count()]
    }

    pub fn axis_header(&self) -> &str {
        &self.headers[self.headers.len() - 1]
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows.iter().map(|r| r[index]).collect()
    }
}

/// Keeps the last `n_field` `/`-separated segments of `label`. Zero keeps the
/// whole label.
pub fn truncate_label(label: &str, n_field: usize) -> String {
    if n_field == 0 {
        return label.to_string();
    }
    let segments: Vec<&str> = label.split('/').collect();
    if segments.len() <= n_field {
        return label.to_string();
    }
    segments[segments.len() - n_field..].join("/")
}

/// One row per (truncated) allocation site, sized in units of 1024 bytes.
pub fn memory_table(stats: &MemoryStats, n_field: usize) -> PerfResult<MetricTable> {
    let mut labels: Vec<String> = Vec::new();
    let mut bytes: Vec<u64> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in &stats.records {
        let key = truncate_label(&record.location(), n_field);
        match index.get(&key) {
            Some(&i) => bytes[i] = bytes[i].saturating_add(record.bytes),
            None => {
                index.insert(key.clone(), labels.len());
                labels.push(key);
                bytes.push(record.bytes);
            }
        }
    }

    let rows = bytes.into_iter().map(|b| vec![b as f64 / 1024.0]).collect();
    MetricTable::new(
        labels,
        MEMORY_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
    )
}

/// Parses a textual time report.
///
/// Everything before the first `ncalls tottime percall cumtime percall ...`
/// line is preamble; every line after it is a row. Rows still carrying a `/`
/// (recursive call counts, undecorated paths) are left out. The row axis is
/// named `function`.
pub fn time_table(report: &str) -> PerfResult<MetricTable> {
    let mut headers: Option<Vec<String>> = None;
    let mut labels = Vec::new();
    let mut rows = Vec::new();

    for line in report.trim().lines() {
        if headers.is_none() {
            if is_time_header(line) {
                headers = Some(time_headers());
            }
            continue;
        }
        if line.contains('/') || line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= TIME_NUMERIC_FIELDS {
            return Err(PerfError::Parse(format!("truncated report row {line:?}")));
        }
        let row = fields[..TIME_NUMERIC_FIELDS]
            .iter()
            .map(|f| {
                f.parse::<f64>()
                    .map_err(|e| PerfError::Parse(format!("bad value {f:?} in row {line:?}: {e}")))
            })
            .collect::<PerfResult<Vec<f64>>>()?;
        labels.push(fields[TIME_NUMERIC_FIELDS..].join(" "));
        rows.push(row);
    }

    let Some(headers) = headers else {
        return Err(PerfError::Parse(
            "time report has no `ncalls tottime percall cumtime percall` header".to_string(),
        ));
    };
    MetricTable::new(labels, headers, rows)
}

fn is_time_header(line: &str) -> bool {
    line.split_whitespace().eq(TIME_HEADER.iter().copied())
}

fn time_headers() -> Vec<String> {
    TIME_HEADER[..TIME_NUMERIC_FIELDS]
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i > 0 {
                format!("{h}{TIME_UNIT_SUFFIX}")
            } else {
                h.to_string()
            }
        })
        .chain(std::iter::once(TIME_AXIS_HEADER.to_string()))
        .collect()
}
