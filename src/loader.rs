//! Target loading: dynamic libraries as modules, packages and subpackages.
//!
//! A script is a dynamic library exporting the entry point as a C-ABI symbol:
//!
//! ```text
//! extern "C" fn(kwargs_json: *const u8, kwargs_len: usize) -> i32
//! ```
//!
//! Keyword arguments are handed over as a UTF-8 JSON object and a non-zero
//! return value marks a failed call. A package initializer is a library named
//! `{DLL_PREFIX}init.{DLL_EXTENSION}`; it is loaded before the script with its
//! symbols made globally visible so the script can bind against them.
//!
//! A library built with its own allocator is invisible to the allocation
//! tracer. To be measured it exports
//!
//! ```text
//! extern "C" fn perfassess_install_allocator(host: *const HostAllocator)
//! ```
//!
//! and forwards its `#[global_allocator]` through the `#[repr(C)]` table it is
//! given (see [`HostAllocator`](crate::runtime::alloctrace::HostAllocator)).
//! The hook is called right after loading. Libraries without it still run,
//! but their allocations are not traced.

use libloading::Library;

use std::collections::BTreeMap;
use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::error::Error;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::runtime::alloctrace::{HOST_ALLOCATOR, HOST_ALLOCATOR_HOOK, InstallAllocator};
use crate::{InvocationTarget, PerfError, PerfResult};

pub type Kwargs = serde_json::Map<String, serde_json::Value>;
pub type CallResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Raw entry point signature exported by target libraries.
pub type EntryPoint = unsafe extern "C" fn(kwargs_json: *const u8, kwargs_len: usize) -> i32;

pub const MODULE_SEPARATOR: &str = "::";

/// Something the driver can call exactly once with keyword arguments.
pub trait Callable {
    fn call(&self, kwargs: &Kwargs) -> CallResult;

    /// Whether allocations made by the call reach the host's global allocator.
    fn allocations_traceable(&self) -> bool {
        true
    }
}

impl<F> Callable for F
where
    F: Fn(&Kwargs) -> CallResult,
{
    fn call(&self, kwargs: &Kwargs) -> CallResult {
        self(kwargs)
    }
}

/// File name every package/subpackage initializer must carry on this platform.
pub fn package_init_file_name() -> String {
    format!("{DLL_PREFIX}init.{DLL_EXTENSION}")
}

pub fn script_extension() -> String {
    format!(".{DLL_EXTENSION}")
}

/// Module registry owned by the caller. Keys are `::`-joined module paths.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, LoadedModule>,
}

#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub name: String,
    pub path: PathBuf,
    /// Whether the library accepted the host allocator table.
    pub host_allocator: bool,
    library: Arc<Library>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: LoadedModule) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn get(&self, name: &str) -> Option<&LoadedModule> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// An exported entry point, kept callable for as long as its library lives.
#[derive(Debug, Clone)]
pub struct LibraryFunction {
    name: String,
    entry: EntryPoint,
    host_allocator: bool,
    _library: Arc<Library>,
}

impl LibraryFunction {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Callable for LibraryFunction {
    fn call(&self, kwargs: &Kwargs) -> CallResult {
        let payload = serde_json::to_vec(kwargs)?;
        // SAFETY: the symbol was resolved from a library kept alive by
        // `_library`, and the buffer outlives the call.
        let status = unsafe { (self.entry)(payload.as_ptr(), payload.len()) };
        if status != 0 {
            return Err(format!("{} returned status {status}", self.name).into());
        }
        Ok(())
    }

    fn allocations_traceable(&self) -> bool {
        self.host_allocator
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    /// Module path the script was registered under.
    pub module: String,
    pub function: LibraryFunction,
}

/// Name of the package an initializer belongs to: its parent directory.
pub fn package_name(init: &Path) -> PerfResult<String> {
    init.parent()
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            PerfError::InvalidArgument(format!(
                "cannot derive a package name from \"{}\"",
                init.display()
            ))
        })
}

/// Module name of a library file: its stem without the platform prefix.
pub fn module_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    stem.strip_prefix(DLL_PREFIX)
        .filter(|s| !s.is_empty())
        .unwrap_or(stem)
        .to_string()
}

/// Walks the segments of `path` backward until `package` is met and joins what
/// was seen into a module path. The last segment is taken as a module stem.
/// When `package` never shows up the whole path is used.
pub fn dotted_module_name(path: &Path, package: &str) -> String {
    walk_back(module_stem(path), path.parent(), package)
}

/// Module path of the package a subpackage initializer establishes.
pub fn subpackage_module_name(init: &Path, package: &str) -> PerfResult<String> {
    let sub = package_name(init)?;
    let dir = init.parent().and_then(Path::parent);
    Ok(walk_back(sub, dir, package))
}

fn walk_back(last: String, parent: Option<&Path>, package: &str) -> String {
    let mut segments = vec![last];
    if segments[0] != package {
        let parents: Vec<&str> = parent
            .into_iter()
            .flat_map(Path::components)
            .filter_map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect();
        for segment in parents.into_iter().rev() {
            segments.push(segment.to_string());
            if segment == package {
                break;
            }
        }
    }
    segments.reverse();
    segments.join(MODULE_SEPARATOR)
}

/// Loads the target's library (and initializers) into `registry` and resolves
/// the requested function.
pub fn resolve(target: &InvocationTarget, registry: &mut ModuleRegistry) -> PerfResult<ResolvedTarget> {
    let module = match (&target.package, &target.subpackage) {
        (None, Some(_)) => {
            return Err(PerfError::ConfigurationConflict(
                "if a subpackage is specified, a package must be specified too".to_string(),
            ));
        }
        (None, None) => {
            let name = module_stem(&target.script);
            tracing::debug!(module = %name, "loading standalone script");
            load_into(registry, &name, &target.script, false)?
        }
        (Some(package), None) => {
            let package_name = package_name(package)?;
            tracing::debug!(package = %package_name, "loading package initializer");
            load_into(registry, &package_name, package, true)?;
            let name = dotted_module_name(&target.script, &package_name);
            tracing::debug!(module = %name, "loading package script");
            load_into(registry, &name, &target.script, false)?
        }
        (Some(package), Some(subpackage)) => {
            let package_name = package_name(package)?;
            tracing::debug!(package = %package_name, "loading package initializer");
            load_into(registry, &package_name, package, true)?;
            let sub_name = subpackage_module_name(subpackage, &package_name)?;
            tracing::debug!(subpackage = %sub_name, "loading subpackage initializer");
            load_into(registry, &sub_name, subpackage, true)?;
            let name = format!(
                "{sub_name}{MODULE_SEPARATOR}{}",
                module_stem(&target.script)
            );
            tracing::debug!(module = %name, "loading subpackage script");
            load_into(registry, &name, &target.script, false)?
        }
    };

    let function = lookup(&module, &target.function, &target.script)?;
    Ok(ResolvedTarget {
        module: module.name,
        function,
    })
}

fn load_into(
    registry: &mut ModuleRegistry,
    name: &str,
    path: &Path,
    global: bool,
) -> PerfResult<LoadedModule> {
    if let Some(existing) = registry.get(name)
        && existing.path == path
    {
        return Ok(existing.clone());
    }
    let library = open_library(path, global)?;
    let host_allocator = install_host_allocator(&library);
    tracing::debug!(module = %name, host_allocator, "loaded library");
    let module = LoadedModule {
        name: name.to_string(),
        path: path.to_path_buf(),
        host_allocator,
        library: Arc::new(library),
    };
    registry.insert(module.clone());
    Ok(module)
}

fn install_host_allocator(library: &Library) -> bool {
    // SAFETY: the hook is required to have the `InstallAllocator` ABI.
    let hook = unsafe { library.get::<InstallAllocator>(HOST_ALLOCATOR_HOOK.as_bytes()) };
    match hook {
        Ok(hook) => {
            // SAFETY: the table is a process-lifetime static.
            unsafe { hook(&HOST_ALLOCATOR) };
            true
        }
        Err(_) => false,
    }
}

#[cfg(unix)]
fn open_library(path: &Path, global: bool) -> PerfResult<Library> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_LOCAL, RTLD_NOW};

    let flags = if global {
        RTLD_NOW | RTLD_GLOBAL
    } else {
        RTLD_NOW | RTLD_LOCAL
    };
    // SAFETY: loading runs the library's initializers; executing the target's
    // code is what the caller asked for.
    let library = unsafe { UnixLibrary::open(Some(path), flags) }.map_err(|e| PerfError::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Library::from(library))
}

#[cfg(not(unix))]
fn open_library(path: &Path, _global: bool) -> PerfResult<Library> {
    // SAFETY: see the unix variant.
    unsafe { Library::new(path) }.map_err(|e| PerfError::Load {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn lookup(module: &LoadedModule, function: &str, script: &Path) -> PerfResult<LibraryFunction> {
    // SAFETY: the exported symbol is required to have the `EntryPoint` ABI.
    let entry = unsafe { module.library.get::<EntryPoint>(function.as_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|_| PerfError::NameResolution {
            function: function.to_string(),
            script: script.to_path_buf(),
        })?;
    Ok(LibraryFunction {
        name: function.to_string(),
        entry,
        host_allocator: module.host_allocator,
        _library: Arc::clone(&module.library),
    })
}
