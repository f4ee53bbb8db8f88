use anyhow::{bail, Context, Result};
use bench_core::{ensure_dir, file_name_str, instance_output_dir, BenchmarkDescriptor, TaskSet};
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_VALIDATOR: &str = "test-suite-validator/bin/testcov";
pub const DEFAULT_VALIDATION_OUTPUT_ROOT: &str = "val-out";
pub const TEST_SUITE_DIR: &str = "test-suite";
pub const TEST_SUITE_ARCHIVE: &str = "test-suite.zip";

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub command: Vec<String>,
    pub artifacts_dir: PathBuf,
    pub property: PathBuf,
    pub memlimit: String,
    pub timelimit_per_run: u64,
    pub output_root: PathBuf,
    pub working_dir: PathBuf,
}

impl ValidatorConfig {
    pub fn new(artifacts_dir: impl Into<PathBuf>, property: impl Into<PathBuf>) -> Self {
        Self {
            command: vec![DEFAULT_VALIDATOR.to_string()],
            artifacts_dir: artifacts_dir.into(),
            property: property.into(),
            memlimit: "6GB".to_string(),
            timelimit_per_run: 50,
            output_root: PathBuf::from(DEFAULT_VALIDATION_OUTPUT_ROOT),
            working_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationSummary {
    pub validated: usize,
    pub skipped: usize,
    pub missing_artifacts: usize,
}

enum ValidationOutcome {
    Validated,
    PropertyNotDeclared,
    NoArtifacts,
}

/// Validates every instance of every task, one at a time. A validator that
/// exits unsuccessfully stops the whole run.
pub fn validate_tasks(tasks: &TaskSet, config: &ValidatorConfig) -> Result<ValidationSummary> {
    info!("Starting Test-Comp validation");
    info!("property={}", config.property.display());
    let mut summary = ValidationSummary::default();
    for (name, instances) in tasks {
        info!("Validating \"{}\"", name);
        for instance in instances {
            match validate_instance(instance, config)? {
                ValidationOutcome::Validated => summary.validated += 1,
                ValidationOutcome::PropertyNotDeclared => summary.skipped += 1,
                ValidationOutcome::NoArtifacts => summary.missing_artifacts += 1,
            }
        }
    }
    Ok(summary)
}

fn validate_instance(descriptor_path: &Path, config: &ValidatorConfig) -> Result<ValidationOutcome> {
    let descriptor = BenchmarkDescriptor::load(descriptor_path)?;
    if !descriptor.declares_property(&config.property) {
        return Ok(ValidationOutcome::PropertyNotDeclared);
    }
    let input_file = descriptor.resolve_input(descriptor_path);
    let suite_dir = instance_output_dir(&config.artifacts_dir, &input_file).join(TEST_SUITE_DIR);
    if !suite_dir.is_dir() {
        debug!("no test suite at {}", suite_dir.display());
        return Ok(ValidationOutcome::NoArtifacts);
    }

    let archive = suite_dir.join(TEST_SUITE_ARCHIVE);
    let packed = package_test_suite(&suite_dir, &archive)?;
    debug!("packed {} test cases into {}", packed, archive.display());

    let output_dir = config.output_root.join(relative_components(descriptor_path));
    ensure_dir(&output_dir)?;
    run_validator(config, &input_file, &archive, &output_dir)?;

    let aux = config
        .working_dir
        .join(format!("instrumented_{}.gcov", file_name_str(&input_file)));
    if aux.exists() {
        fs::remove_file(&aux).with_context(|| format!("remove {}", aux.display()))?;
    }
    Ok(ValidationOutcome::Validated)
}

fn package_test_suite(suite_dir: &Path, archive: &Path) -> Result<usize> {
    let mut cases = Vec::new();
    for entry in WalkDir::new(suite_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        let is_xml = entry.path().extension().and_then(|e| e.to_str()) == Some("xml");
        if entry.file_type().is_file() && is_xml {
            cases.push(entry.into_path());
        }
    }

    let file =
        File::create(archive).with_context(|| format!("create archive {}", archive.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for case in &cases {
        zip.start_file(
            format!("{}/{}", TEST_SUITE_DIR, file_name_str(case)),
            options,
        )?;
        let mut src = File::open(case).with_context(|| format!("open {}", case.display()))?;
        io::copy(&mut src, &mut zip)?;
    }
    zip.finish()?;
    Ok(cases.len())
}

fn run_validator(
    config: &ValidatorConfig,
    input_file: &Path,
    archive: &Path,
    output_dir: &Path,
) -> Result<()> {
    let Some((program, leading)) = config.command.split_first() else {
        bail!("validator command is empty");
    };
    let status = Command::new(program)
        .args(leading)
        .arg(input_file)
        .arg("--no-plots")
        .arg("--no-isolation")
        .arg("--memlimit")
        .arg(&config.memlimit)
        .arg("--timelimit-per-run")
        .arg(config.timelimit_per_run.to_string())
        .arg("--test-suite")
        .arg(archive)
        .arg("--output")
        .arg(output_dir)
        .status()
        .with_context(|| format!("launch validator {}", program))?;
    if !status.success() {
        bail!(
            "validator failed on {} ({})",
            input_file.display(),
            status
        );
    }
    Ok(())
}

fn relative_components(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_core::PathSet;
    use std::io::Read;
    use tempfile::TempDir;

    const PROPERTY: &str = "coverage-error-call.prp";

    /// Records its arguments into the output directory; fails for `fail.c`.
    const FAKE_VALIDATOR: &str = r#"#!/bin/sh
input="$1"
shift
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  echo "$1" >> "$VALIDATOR_LOG"
  shift
done
case "$input" in
  *fail.c) exit 4 ;;
esac
echo "$input" > "$out/validated"
"#;

    struct Fixture {
        tmp: TempDir,
        config: ValidatorConfig,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let script = root.join("fake-validator.sh");
        fs::write(&script, FAKE_VALIDATOR).unwrap();
        let mut config = ValidatorConfig::new(root.join("artifacts"), PROPERTY);
        config.command = vec![
            "env".to_string(),
            format!("VALIDATOR_LOG={}", root.join("args.log").display()),
            "sh".to_string(),
            script.display().to_string(),
        ];
        config.output_root = root.join("val-out");
        config.working_dir = root.to_path_buf();
        Fixture { tmp, config }
    }

    fn descriptor(root: &Path, name: &str, property: &str) -> PathBuf {
        let dir = root.join("corpus/loops");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.yml", name));
        fs::write(
            &path,
            format!(
                "input_files: {}.c\nproperties:\n  - property_file: ../properties/{}\n",
                name, property
            ),
        )
        .unwrap();
        path
    }

    fn artifacts(root: &Path, name: &str, files: &[&str]) -> PathBuf {
        let dir = root.join(format!("artifacts/loops/{}.c/test-suite", name));
        fs::create_dir_all(&dir).unwrap();
        for f in files {
            fs::write(dir.join(f), format!("<{}/>", f)).unwrap();
        }
        dir
    }

    fn tasks(entries: &[(&str, Vec<PathBuf>)]) -> TaskSet {
        entries
            .iter()
            .map(|(name, paths)| (name.to_string(), paths.iter().cloned().collect::<PathSet>()))
            .collect()
    }

    #[test]
    fn packages_xml_cases_and_invokes_validator() {
        let fx = fixture();
        let root = fx.tmp.path();
        let bench = descriptor(root, "a", PROPERTY);
        let suite = artifacts(root, "a", &["metadata.xml", "testcase-1.xml", "notes.txt"]);
        fs::write(root.join("instrumented_a.c.gcov"), "").unwrap();

        let summary = validate_tasks(&tasks(&[("T", vec![bench.clone()])]), &fx.config).unwrap();
        assert_eq!(summary.validated, 1);

        let mut zip = zip::ZipArchive::new(File::open(suite.join(TEST_SUITE_ARCHIVE)).unwrap())
            .unwrap();
        let mut names: Vec<String> = zip.file_names().map(|n| n.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["test-suite/metadata.xml", "test-suite/testcase-1.xml"]);
        let mut body = String::new();
        zip.by_name("test-suite/metadata.xml")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "<metadata.xml/>");

        let args = fs::read_to_string(root.join("args.log")).unwrap();
        for flag in ["--no-plots", "--no-isolation", "--memlimit", "6GB", "--timelimit-per-run", "50"] {
            assert!(args.lines().any(|l| l == flag), "missing {} in {}", flag, args);
        }
        let out = fx.config.output_root.join(relative_components(&bench));
        assert!(out.join("validated").is_file());
        assert!(!root.join("instrumented_a.c.gcov").exists());
    }

    #[test]
    fn instances_without_property_or_artifacts_are_skipped() {
        let fx = fixture();
        let root = fx.tmp.path();
        let other = descriptor(root, "other", "unreach-call.prp");
        artifacts(root, "other", &["metadata.xml"]);
        let bare = descriptor(root, "bare", PROPERTY);

        let summary = validate_tasks(&tasks(&[("T", vec![other, bare])]), &fx.config).unwrap();
        assert_eq!(summary.validated, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.missing_artifacts, 1);
        assert!(!root.join("args.log").exists());
    }

    #[test]
    fn validator_failure_is_fatal() {
        let fx = fixture();
        let root = fx.tmp.path();
        let bench = descriptor(root, "fail", PROPERTY);
        artifacts(root, "fail", &["metadata.xml"]);

        let err = validate_tasks(&tasks(&[("T", vec![bench])]), &fx.config)
            .expect_err("validator exit code must propagate");
        assert!(err.to_string().contains("fail.c"), "{}", err);
    }

    #[test]
    fn relative_components_strip_root() {
        assert_eq!(
            relative_components(Path::new("/abs/./sv/x.yml")),
            PathBuf::from("abs/sv/x.yml")
        );
    }
}
