use crate::file_name_str;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum InputFiles {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PropertyEntry {
    pub property_file: String,
    #[serde(default)]
    pub expected_verdict: Option<bool>,
    #[serde(default)]
    pub subproperty: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkDescriptor {
    input_files: InputFiles,
    #[serde(default)]
    pub properties: Vec<PropertyEntry>,
}

impl BenchmarkDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("read benchmark descriptor {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("benchmark descriptor {}", path.display()))
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        let descriptor: Self = serde_yaml::from_str(yaml)?;
        if let InputFiles::Many(files) = &descriptor.input_files {
            if files.is_empty() {
                return Err(anyhow!("input_files is empty"));
            }
        }
        Ok(descriptor)
    }

    pub fn input_file(&self) -> &str {
        match &self.input_files {
            InputFiles::One(file) => file,
            InputFiles::Many(files) => files.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Compares file names only; directories are ignored on both sides.
    pub fn declares_property(&self, property: &Path) -> bool {
        let wanted = file_name_str(property);
        self.properties
            .iter()
            .any(|p| file_name_str(Path::new(&p.property_file)) == wanted)
    }

    pub fn resolve_input(&self, descriptor_path: &Path) -> PathBuf {
        descriptor_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(self.input_file())
    }
}

pub fn instance_output_dir(root: &Path, input_file: &Path) -> PathBuf {
    let dir_name = input_file
        .parent()
        .map(file_name_str)
        .unwrap_or_default();
    root.join(dir_name).join(file_name_str(input_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = "\
format_version: '2.0'
input_files: 'array-1.i'
properties:
  - property_file: ../properties/unreach-call.prp
    expected_verdict: true
  - property_file: ../properties/coverage-error-call.prp
options:
  language: C
  data_model: ILP32
";

    #[test]
    fn property_match_uses_file_name_only() {
        let d = BenchmarkDescriptor::parse(DESCRIPTOR).unwrap();
        assert!(d.declares_property(Path::new(
            "/elsewhere/sv-benchmarks/c/properties/coverage-error-call.prp"
        )));
        assert!(d.declares_property(Path::new("coverage-error-call.prp")));
        assert!(!d.declares_property(Path::new("properties/coverage-branches.prp")));
    }

    #[test]
    fn input_resolves_next_to_descriptor() {
        let d = BenchmarkDescriptor::parse(DESCRIPTOR).unwrap();
        assert_eq!(
            d.resolve_input(Path::new("sv-benchmarks/c/array-examples/array-1.yml")),
            PathBuf::from("sv-benchmarks/c/array-examples/array-1.i")
        );
    }

    #[test]
    fn input_files_accepts_a_list() {
        let d = BenchmarkDescriptor::parse("input_files: [main.c, lib.c]\nproperties: []\n").unwrap();
        assert_eq!(d.input_file(), "main.c");
        assert!(BenchmarkDescriptor::parse("input_files: []\n").is_err());
    }

    #[test]
    fn descriptor_without_input_files_is_rejected() {
        assert!(BenchmarkDescriptor::parse("properties: []\n").is_err());
    }

    #[test]
    fn output_dir_uses_parent_and_file_names() {
        assert_eq!(
            instance_output_dir(
                Path::new("wasp-out"),
                Path::new("sv-benchmarks/c/array-examples/array-1.i")
            ),
            PathBuf::from("wasp-out/array-examples/array-1.i")
        );
    }
}
