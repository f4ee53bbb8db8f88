use anyhow::Result;
use bench_core::{ensure_dir, flatten_instances, TaskSet};
use indicatif::ProgressBar;
use std::path::Path;
use tracing::info;

pub mod executor;
pub mod process;
pub mod table;
pub mod validation;

pub use executor::{execute_instances, progress_bar, ExecutionConfig, InstanceFailure, RunSummary};
pub use process::{execute, Cause, ExecutionResult, Invocation, ToolConfig};
pub use table::{ReportRow, ResultTable, TableError, TableMode, REPORT_HEADER};
pub use validation::{validate_tasks, ValidationSummary, ValidatorConfig};

pub const DEFAULT_SUITE: &str = "bench-defs/benchmark-defs/owic.xml";
pub const DEFAULT_RESULTS_DIR: &str = "results";
pub const DEFAULT_BACKEND: &str = "share/backend/wasp-ce.json";
pub const DEFAULT_PROPERTY: &str = "sv-benchmarks/c/properties/coverage-error-call.prp";
pub const DEFAULT_OUTPUT_ROOT: &str = "wasp-out";
pub const REPORT_FILE_NAME: &str = "all.csv";

pub fn run_tasks(
    tasks: &TaskSet,
    results_dir: &Path,
    mode: TableMode,
    config: &ExecutionConfig,
    bar: ProgressBar,
) -> Result<RunSummary> {
    info!("Starting Test-Comp benchmarks");
    info!("property={}, jobs={}", config.property.display(), config.jobs);

    ensure_dir(results_dir)?;
    let instances = flatten_instances(tasks);
    info!(
        "Analysing {} Test-Comp benchmarks from {} tasks",
        instances.len(),
        tasks.len()
    );
    let table = ResultTable::create(&results_dir.join(REPORT_FILE_NAME), &REPORT_HEADER, mode)?;
    execute_instances(&instances, config, table, bar)
}
