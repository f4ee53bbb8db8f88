use crate::{normalize_path, DEFAULT_CORPUS_ROOT};
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub type PathSet = BTreeSet<PathBuf>;

pub fn parse_pattern_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

pub fn read_pattern_list(path: &Path) -> Result<Vec<String>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read pattern list {}", path.display()))?;
    Ok(parse_pattern_list(&data))
}

/// Patterns resolve relative to the directory of the list file that declared
/// them. Exclude patterns that already start with `corpus_root` resolve from
/// `working_dir` instead, so one corpus can exclude entries of another.
#[derive(Debug, Clone)]
pub struct PatternResolver {
    pub working_dir: PathBuf,
    pub corpus_root: String,
}

impl Default for PatternResolver {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::new(),
            corpus_root: DEFAULT_CORPUS_ROOT.to_string(),
        }
    }
}

impl PatternResolver {
    pub fn new(working_dir: impl Into<PathBuf>, corpus_root: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            corpus_root: corpus_root.into(),
        }
    }

    pub fn apply_includes_file(&self, acc: &mut PathSet, list_file: &Path) -> Result<()> {
        let patterns = read_pattern_list(&self.working_dir.join(list_file))?;
        self.include(acc, list_file, &patterns)
    }

    pub fn apply_excludes_file(&self, acc: &mut PathSet, list_file: &Path) -> Result<()> {
        let patterns = read_pattern_list(&self.working_dir.join(list_file))?;
        self.exclude(acc, list_file, &patterns)
    }

    pub fn include(&self, acc: &mut PathSet, list_file: &Path, patterns: &[String]) -> Result<()> {
        let base = self.declaring_dir(list_file);
        for pattern in patterns {
            acc.extend(expand(&base.join(pattern))?);
        }
        Ok(())
    }

    pub fn exclude(&self, acc: &mut PathSet, list_file: &Path, patterns: &[String]) -> Result<()> {
        let base = self.declaring_dir(list_file);
        for pattern in patterns {
            let full = if pattern.starts_with(&self.corpus_root) {
                self.working_dir.join(pattern)
            } else {
                base.join(pattern)
            };
            for path in expand(&full)? {
                acc.remove(&path);
            }
        }
        Ok(())
    }

    fn declaring_dir(&self, list_file: &Path) -> PathBuf {
        let parent = list_file.parent().unwrap_or_else(|| Path::new(""));
        self.working_dir.join(parent)
    }
}

fn expand(pattern: &Path) -> Result<PathSet> {
    let pattern_str = pattern.to_string_lossy();
    let mut out = PathSet::new();
    let entries =
        glob::glob(&pattern_str).with_context(|| format!("invalid glob pattern {}", pattern_str))?;
    for entry in entries {
        match entry {
            Ok(path) => {
                out.insert(normalize_path(&path));
            }
            Err(e) => warn!("skipping unreadable glob entry {}: {}", e.path().display(), e),
        }
    }
    Ok(out)
}
