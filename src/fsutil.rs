//! Small filesystem utilities.

use std::path::{Path, PathBuf};

use crate::{PerfError, PerfResult};

/// Fails with `FileMissing` unless `path` exists.
pub fn require_existing(path: &Path) -> PerfResult<()> {
    if !path.exists() {
        return Err(PerfError::FileMissing(path.to_path_buf()));
    }
    Ok(())
}

/// Validates an output directory. Trailing separators are tolerated.
pub fn require_directory(path: &Path) -> PerfResult<PathBuf> {
    let trimmed = trim_trailing_separator(path);
    require_existing(&trimmed)?;
    if !trimmed.is_dir() {
        return Err(PerfError::BadShape(trimmed));
    }
    Ok(trimmed)
}

pub fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.to_str().is_some_and(|s| s.ends_with(suffix))
}

pub fn file_name_is(path: &Path, name: &str) -> bool {
    path.file_name().and_then(|s| s.to_str()) == Some(name)
}

pub fn write_text(path: &Path, value: &str) -> PerfResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, value)?;
    Ok(())
}

fn trim_trailing_separator(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    let trimmed = s.trim_end_matches(std::path::MAIN_SEPARATOR);
    if trimmed.is_empty() {
        return path.to_path_buf();
    }
    PathBuf::from(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("perfassess-fsutil-{name}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn require_directory_accepts_trailing_separator() {
        let dir = temp_dir("trailing");
        let with_sep = format!("{}{}", dir.display(), std::path::MAIN_SEPARATOR);
        let out = require_directory(Path::new(&with_sep)).expect("directory");
        assert_eq!(out, dir);
    }

    #[test]
    fn require_directory_rejects_missing_and_files() {
        let dir = temp_dir("shape");
        let missing = dir.join("nope");
        assert!(matches!(
            require_directory(&missing),
            Err(PerfError::FileMissing(_))
        ));

        let file = dir.join("existing_file.txt");
        std::fs::write(&file, "x").expect("write file");
        assert!(matches!(
            require_directory(&file),
            Err(PerfError::BadShape(_))
        ));
    }

    #[test]
    fn suffix_and_name_checks() {
        assert!(has_suffix(Path::new("args.yml"), ".yml"));
        assert!(!has_suffix(Path::new("args.yaml"), ".yml"));
        assert!(file_name_is(Path::new("pkg/libinit.so"), "libinit.so"));
        assert!(!file_name_is(Path::new("pkg/libinit.so.1"), "libinit.so"));
    }
}
