use perfassess::runtime::TracingAllocator;
use perfassess::{
    Assessor, Callable, InvocationTarget, Kwargs, MetricKind, ModuleRegistry, PerfError,
    package_init_file_name, resolve,
};
use uuid::Uuid;

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

#[global_allocator]
static ALLOCATOR: TracingAllocator = TracingAllocator::new(std::alloc::System);

/// Builds `demos/sum-plugin` once, in its own target directory so the outer
/// build lock is not contended.
fn sum_plugin() -> &'static Path {
    static BUILT: OnceLock<PathBuf> = OnceLock::new();
    BUILT.get_or_init(|| {
        let root = Path::new(env!("CARGO_MANIFEST_DIR"));
        let target_dir = root.join("target").join("sum-plugin");
        let status = Command::new(env!("CARGO"))
            .args(["build", "--quiet", "-p", "sum-plugin", "--manifest-path"])
            .arg(root.join("Cargo.toml"))
            .env("CARGO_TARGET_DIR", &target_dir)
            .status()
            .expect("run cargo");
        assert!(status.success(), "building sum-plugin failed");
        target_dir
            .join("debug")
            .join(format!("{DLL_PREFIX}sum_plugin.{DLL_EXTENSION}"))
    })
}

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("perfassess-loader-{name}-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}

/// Copies the plugin to `dst`, giving the loader a distinct file to open.
fn place(dst: PathBuf) -> PathBuf {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::copy(sum_plugin(), &dst).expect("copy plugin");
    dst
}

fn lib(name: &str) -> String {
    format!("{DLL_PREFIX}{name}.{DLL_EXTENSION}")
}

fn target(
    script: PathBuf,
    package: Option<PathBuf>,
    subpackage: Option<PathBuf>,
    function: &str,
) -> InvocationTarget {
    InvocationTarget {
        script,
        package,
        subpackage,
        function: function.to_string(),
        kwargs: Kwargs::new(),
    }
}

fn values(len: usize) -> Kwargs {
    let mut kwargs = Kwargs::new();
    kwargs.insert("value".to_string(), serde_json::json!(vec![0; len]));
    kwargs
}

#[test]
fn standalone_script_resolves_and_runs() {
    let dir = temp_dir("standalone");
    let script = place(dir.join(lib("sum_plugin")));

    let mut registry = ModuleRegistry::new();
    let resolved = resolve(&target(script, None, None, "testor"), &mut registry).expect("resolve");
    assert_eq!(resolved.module, "sum_plugin");
    assert_eq!(resolved.function.name(), "testor");
    assert!(registry.contains("sum_plugin"));
    assert!(resolved.function.allocations_traceable());

    assert!(resolved.function.call(&values(10)).is_ok());
    assert!(resolved.function.call(&Kwargs::new()).is_err());
}

#[test]
fn package_script_is_registered_under_its_path() {
    let dir = temp_dir("package");
    let init = place(dir.join("pkg").join(package_init_file_name()));
    let script = place(dir.join("pkg").join("ops").join(lib("script")));

    let mut registry = ModuleRegistry::new();
    let resolved =
        resolve(&target(script, Some(init), None, "testor"), &mut registry).expect("resolve");
    assert_eq!(resolved.module, "pkg::ops::script");
    assert_eq!(registry.names().collect::<Vec<_>>(), ["pkg", "pkg::ops::script"]);
    assert!(resolved.function.call(&values(10)).is_ok());
}

#[test]
fn subpackage_script_is_registered_under_the_subpackage() {
    let dir = temp_dir("subpackage");
    let init = place(dir.join("pkg").join(package_init_file_name()));
    let sub_init = place(dir.join("pkg").join("sub").join(package_init_file_name()));
    let script = place(dir.join("pkg").join("sub").join(lib("sum")));

    let mut registry = ModuleRegistry::new();
    let resolved = resolve(
        &target(script, Some(init), Some(sub_init), "testor"),
        &mut registry,
    )
    .expect("resolve");
    assert_eq!(resolved.module, "pkg::sub::sum");
    assert_eq!(
        registry.names().collect::<Vec<_>>(),
        ["pkg", "pkg::sub", "pkg::sub::sum"]
    );
    assert!(resolved.function.call(&values(10)).is_ok());
}

#[test]
fn missing_function_is_a_name_resolution_error() {
    let dir = temp_dir("missing");
    let script = place(dir.join(lib("sum_plugin")));

    let mut registry = ModuleRegistry::new();
    let err = resolve(&target(script.clone(), None, None, "absent"), &mut registry)
        .expect_err("no such symbol");
    match err {
        PerfError::NameResolution { function, script: path } => {
            assert_eq!(function, "absent");
            assert_eq!(path, script);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn plugin_allocations_reach_the_memory_chart() {
    let dir = temp_dir("memory");
    let script = place(dir.join(lib("sum_plugin")));

    let mut registry = ModuleRegistry::new();
    let resolved = resolve(&target(script, None, None, "testor"), &mut registry).expect("resolve");

    // The JSON payload is a few hundred KiB; parsing it into values and
    // shifting them inside the plugin takes several MiB.
    let mut assessor = Assessor::new(resolved.function, 0, values(200_000))
        .with_source(resolved.module, "testor");
    assessor.launch_profiling(true, false).expect("profiling");

    let memory = &assessor.tables()[&MetricKind::Memory];
    assert!(memory.labels().iter().any(|l| l == "sum_plugin:0"));
    let total_kib: f64 = memory.rows().iter().flatten().sum();
    assert!(total_kib > 4096.0, "plugin allocations missing: {total_kib} KiB");
}
