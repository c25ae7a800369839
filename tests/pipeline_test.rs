use perfassess::runtime::TracingAllocator;
use perfassess::{Assessor, CallResult, Kwargs, MetricKind, PerfError, testor};
use uuid::Uuid;

use std::path::PathBuf;

#[global_allocator]
static ALLOCATOR: TracingAllocator = TracingAllocator::new(std::alloc::System);

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("perfassess-pipeline-{name}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

fn summing_kwargs() -> Kwargs {
    let mut kwargs = Kwargs::new();
    kwargs.insert("value".to_string(), serde_json::json!(vec![0; 1000]));
    kwargs
}

#[test]
fn sum_of_a_list_yields_time_and_memory_charts() {
    let mut assessor = Assessor::new(testor, 1, summing_kwargs()).with_source("sum", "testor");
    assessor.launch_profiling(true, true).expect("profiling");

    let mut names: Vec<&str> = assessor.charts().values().map(|f| f.name.as_str()).collect();
    names.sort();
    assert_eq!(names, ["memory_evaluation", "time_evaluation"]);
    for figure in assessor.charts().values() {
        assert!(figure.row_count() >= 1, "{} is empty", figure.name);
        assert!(figure.trace.y.iter().all(|v| *v >= 0.0));
        assert!(figure.trace.y.windows(2).all(|w| w[0] >= w[1]));
    }

    let memory = &assessor.tables()[&MetricKind::Memory];
    assert!(memory.labels().iter().all(|l| !l.contains('/')));
    assert!(memory.rows().iter().flatten().sum::<f64>() > 0.0);
}

#[test]
fn charts_are_written_into_an_existing_directory() {
    let mut assessor = Assessor::new(testor, 1, summing_kwargs());
    assessor.launch_profiling(true, true).expect("profiling");

    let dir = temp_dir("write");
    let written = assessor.write_html(&dir).expect("write charts");
    assert_eq!(written.len(), 2);

    let mut files: Vec<String> = std::fs::read_dir(&dir)
        .expect("read dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, ["memory_evaluation.html", "time_evaluation.html"]);

    let html = std::fs::read_to_string(dir.join("time_evaluation.html")).expect("read chart");
    assert!(html.contains("<select"));
    assert!(html.contains("figure-data"));
}

#[test]
fn output_must_be_an_existing_directory() {
    let mut assessor = Assessor::new(testor, 1, summing_kwargs());
    assessor.launch_profiling(true, true).expect("profiling");

    let dir = temp_dir("shape");
    assert!(matches!(
        assessor.write_html(&dir.join("missing")),
        Err(PerfError::FileMissing(_))
    ));

    let file = dir.join("existing_file.txt");
    std::fs::write(&file, "x").expect("write file");
    assert!(matches!(
        assessor.write_html(&file),
        Err(PerfError::BadShape(_))
    ));
}

#[test]
fn closures_can_be_assessed_directly() {
    let target = |kwargs: &Kwargs| -> CallResult {
        let n = kwargs.get("n").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
        let squares: Vec<u64> = (0..n as u64).map(|i| i * i).collect();
        std::hint::black_box(squares);
        Ok(())
    };
    let mut assessor = Assessor::new(target, 0, Kwargs::new()).with_source("inline", "squares");
    assessor.launch_profiling(true, false).expect("profiling");

    assert_eq!(assessor.charts().len(), 1);
    let memory = &assessor.tables()[&MetricKind::Memory];
    assert!(memory.labels().iter().any(|l| l == "inline:0"));
}
