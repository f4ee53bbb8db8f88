use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub mod descriptor;
pub mod patterns;
pub mod suite;

pub use descriptor::{instance_output_dir, BenchmarkDescriptor, PropertyEntry};
pub use patterns::{parse_pattern_list, read_pattern_list, PathSet, PatternResolver};
pub use suite::{flatten_instances, load_task_set, parse_task_set, TaskSet};

pub const DEFAULT_CORPUS_ROOT: &str = "sv-benchmarks";

pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

/// Leading `..` components of a relative path are kept, since there is no
/// directory left to fold them into.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_fold = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_fold {
                    out.pop();
                } else if !matches!(
                    out.components().next_back(),
                    Some(Component::RootDir | Component::Prefix(_))
                ) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn file_name_str(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}
