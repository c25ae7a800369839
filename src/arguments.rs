//! Command-line argument validation and keyword-argument loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::{
    Kwargs, PerfError, PerfResult, file_name_is, has_suffix, package_init_file_name,
    require_directory, require_existing, script_extension,
};

pub const ARGUMENT_EXTENSIONS: [&str; 2] = [".yml", ".yaml"];
pub const DEFAULT_FUNCTION: &str = "main";

/// Arguments as given on the command line, before any check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawArguments {
    pub script: PathBuf,
    pub output: PathBuf,
    pub function: Option<String>,
    pub n_field: i64,
    pub package: Option<PathBuf>,
    pub subpackage: Option<PathBuf>,
    pub argument: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckedArguments {
    pub script: PathBuf,
    pub output: PathBuf,
    pub function: String,
    pub n_field: usize,
    pub package: Option<PathBuf>,
    pub subpackage: Option<PathBuf>,
    pub argument: Option<PathBuf>,
}

/// What to load and how to call it. Consumed once by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationTarget {
    pub script: PathBuf,
    pub package: Option<PathBuf>,
    pub subpackage: Option<PathBuf>,
    pub function: String,
    pub kwargs: Kwargs,
}

pub fn check_arguments(raw: RawArguments) -> PerfResult<CheckedArguments> {
    if raw.subpackage.is_some() && raw.package.is_none() {
        return Err(PerfError::ConfigurationConflict(
            "if a subpackage is specified, a package must be specified too".to_string(),
        ));
    }

    require_existing(&raw.script)?;
    let extension = script_extension();
    if !has_suffix(&raw.script, &extension) {
        return Err(PerfError::BadExtension {
            path: raw.script,
            expected: format!("is not a dynamic library, expected a \"{extension}\" file"),
        });
    }

    for init in raw.package.iter().chain(raw.subpackage.iter()) {
        check_package_init(init)?;
    }

    if let Some(argument) = &raw.argument {
        require_existing(argument)?;
        if !ARGUMENT_EXTENSIONS.iter().any(|ext| has_suffix(argument, ext)) {
            return Err(PerfError::BadExtension {
                path: argument.clone(),
                expected: "must be a YAML file (\".yml\" or \".yaml\")".to_string(),
            });
        }
    }

    let output = require_directory(&raw.output)?;

    let n_field = usize::try_from(raw.n_field).map_err(|_| {
        PerfError::ConfigurationConflict(format!(
            "n_field must be positive or zero, got {}",
            raw.n_field
        ))
    })?;

    Ok(CheckedArguments {
        script: raw.script,
        output,
        function: raw
            .function
            .unwrap_or_else(|| DEFAULT_FUNCTION.to_string()),
        n_field,
        package: raw.package,
        subpackage: raw.subpackage,
        argument: raw.argument,
    })
}

fn check_package_init(path: &Path) -> PerfResult<()> {
    require_existing(path)?;
    let init = package_init_file_name();
    if !file_name_is(path, &init) {
        return Err(PerfError::BadExtension {
            path: path.to_path_buf(),
            expected: format!("is not a package initializer, expected a \"{init}\" file"),
        });
    }
    Ok(())
}

/// Parses the YAML argument file. No file, or an empty document, gives no
/// arguments.
pub fn load_arguments(path: Option<&Path>) -> PerfResult<Kwargs> {
    let Some(path) = path else {
        return Ok(Kwargs::new());
    };
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(Kwargs::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(&raw)?;
    match value {
        serde_yaml::Value::Null => Ok(Kwargs::new()),
        serde_yaml::Value::Mapping(_) => {
            let json = serde_json::to_value(&value)?;
            match json {
                serde_json::Value::Object(map) => Ok(map),
                _ => Err(PerfError::InvalidArgument(format!(
                    "argument file \"{}\" must hold a mapping",
                    path.display()
                ))),
            }
        }
        _ => Err(PerfError::InvalidArgument(format!(
            "argument file \"{}\" must hold a mapping of keyword arguments",
            path.display()
        ))),
    }
}

impl CheckedArguments {
    /// Loads the keyword arguments and pairs them with what to call.
    pub fn into_target(self) -> PerfResult<InvocationTarget> {
        let kwargs = load_arguments(self.argument.as_deref())?;
        Ok(InvocationTarget {
            script: self.script,
            package: self.package,
            subpackage: self.subpackage,
            function: self.function,
            kwargs,
        })
    }
}
