use crate::patterns::{PathSet, PatternResolver};
use anyhow::{anyhow, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub type TaskSet = BTreeMap<String, PathSet>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskDecl {
    name: String,
    includes: Vec<PathBuf>,
    excludes: Vec<PathBuf>,
}

pub fn load_task_set(path: &Path, resolver: &PatternResolver) -> Result<TaskSet> {
    let full = resolver.working_dir.join(path);
    let xml = fs::read_to_string(&full)
        .with_context(|| format!("read suite definition {}", full.display()))?;
    parse_task_set(&xml, resolver).with_context(|| format!("suite definition {}", full.display()))
}

/// Per task, every includes file is unioned in declaration order before any
/// excludes file is subtracted, also in declaration order.
pub fn parse_task_set(xml: &str, resolver: &PatternResolver) -> Result<TaskSet> {
    let mut tasks = TaskSet::new();
    for decl in parse_task_decls(xml)? {
        let mut set = PathSet::new();
        for list_file in &decl.includes {
            resolver.apply_includes_file(&mut set, list_file)?;
        }
        for list_file in &decl.excludes {
            resolver.apply_excludes_file(&mut set, list_file)?;
        }
        debug!(task = %decl.name, instances = set.len(), "resolved task");
        tasks.insert(decl.name, set);
    }
    Ok(tasks)
}

fn parse_task_decls(xml: &str) -> Result<Vec<TaskDecl>> {
    // Suite files usually carry a DOCTYPE line, which roxmltree refuses by default.
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    };
    let doc = roxmltree::Document::parse_with_options(xml, options)
        .context("malformed suite definition")?;
    let mut decls = Vec::new();
    for node in doc.root_element().children().filter(|n| n.is_element()) {
        let tag = node.tag_name().name();
        if tag != "tasks" && tag != "task" {
            continue;
        }
        let name = node
            .attribute("name")
            .ok_or_else(|| anyhow!("<{}> element without a name attribute", tag))?
            .to_string();
        let mut decl = TaskDecl {
            name,
            includes: Vec::new(),
            excludes: Vec::new(),
        };
        for child in node.children().filter(|n| n.is_element()) {
            let list_file = child.text().map(str::trim).unwrap_or("");
            let target = match child.tag_name().name() {
                "includesfile" => &mut decl.includes,
                "excludesfile" => &mut decl.excludes,
                _ => continue,
            };
            if list_file.is_empty() {
                return Err(anyhow!(
                    "empty <{}> in task {}",
                    child.tag_name().name(),
                    decl.name
                ));
            }
            target.push(PathBuf::from(list_file));
        }
        decls.push(decl);
    }
    Ok(decls)
}

/// An instance listed by several tasks appears once, at its first position.
pub fn flatten_instances(tasks: &TaskSet) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for set in tasks.values() {
        for path in set {
            if seen.insert(path.clone()) {
                out.push(path.clone());
            }
        }
    }
    out
}
