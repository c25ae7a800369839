//! Crate-wide error types.

use thiserror::Error;

use std::path::PathBuf;

pub type PerfResult<T> = Result<T, PerfError>;

#[derive(Debug, Error)]
pub enum PerfError {
    #[error("file \"{}\" does not exist", .0.display())]
    FileMissing(PathBuf),

    #[error("file \"{}\" {expected}", path.display())]
    BadExtension { path: PathBuf, expected: String },

    #[error("path \"{}\" is not a directory", .0.display())]
    BadShape(PathBuf),

    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("\"{function}\" is not present inside the given script \"{}\"", script.display())]
    NameResolution { function: String, script: PathBuf },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot load \"{}\": {message}", path.display())]
    Load { path: PathBuf, message: String },

    #[error("invocation of \"{function}\" failed: {message}")]
    Invocation { function: String, message: String },

    #[error("stats parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

