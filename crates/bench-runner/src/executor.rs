use crate::process::{self, Cause, Invocation, ToolConfig};
use crate::table::{ReportRow, ResultTable};
use crate::{DEFAULT_BACKEND, DEFAULT_OUTPUT_ROOT, DEFAULT_PROPERTY};
use anyhow::{Context, Result};
use bench_core::{ensure_dir, instance_output_dir, BenchmarkDescriptor};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub jobs: usize,
    pub property: PathBuf,
    pub backend: String,
    pub output_root: PathBuf,
    pub tool: ToolConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            property: PathBuf::from(DEFAULT_PROPERTY),
            backend: DEFAULT_BACKEND.to_string(),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            tool: ToolConfig::default(),
        }
    }
}

pub struct Progress {
    completed: usize,
    total: usize,
    bar: ProgressBar,
}

impl Progress {
    pub fn new(total: usize, bar: ProgressBar) -> Self {
        bar.set_length(total as u64);
        Self {
            completed: 0,
            total,
            bar,
        }
    }

    pub fn advance(&mut self, message: String) -> usize {
        self.completed += 1;
        self.bar.set_position(self.completed as u64);
        self.bar.set_message(message);
        self.completed
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

pub fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{percent:>3}%] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceFailure {
    pub instance: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub report: PathBuf,
    pub started_at: String,
    pub finished_at: String,
    pub total: usize,
    pub progressed: usize,
    pub executed: usize,
    pub skipped: usize,
    pub timed_out: usize,
    /// Finished without a usable report (launch failure, missing or bad report).
    pub inconclusive: usize,
    pub failures: Vec<InstanceFailure>,
}

enum InstanceOutcome {
    Skipped,
    Executed(Cause),
}

/// The only state workers share. One lock covers both fields.
struct Shared {
    progress: Progress,
    table: ResultTable,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn execute_instances(
    instances: &[PathBuf],
    config: &ExecutionConfig,
    table: ResultTable,
    bar: ProgressBar,
) -> Result<RunSummary> {
    let report = table.path().to_path_buf();
    let started_at = Utc::now().to_rfc3339();
    let shared = Mutex::new(Shared {
        progress: Progress::new(instances.len(), bar),
        table,
    });

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.jobs.max(1))
        .build()
        .context("failed to build worker pool")?;
    let outcomes: Vec<(&PathBuf, Result<InstanceOutcome>)> = pool.install(|| {
        instances
            .par_iter()
            .map(|instance| (instance, run_instance(instance, config, &shared)))
            .collect()
    });

    let Shared {
        progress,
        mut table,
    } = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
    progress.finish();
    table.commit()?;

    let mut summary = RunSummary {
        report,
        started_at,
        finished_at: Utc::now().to_rfc3339(),
        total: progress.total(),
        progressed: progress.completed(),
        ..RunSummary::default()
    };
    for (instance, outcome) in outcomes {
        match outcome {
            Ok(InstanceOutcome::Skipped) => summary.skipped += 1,
            Ok(InstanceOutcome::Executed(cause)) => {
                summary.executed += 1;
                match cause {
                    Cause::Completed => {}
                    Cause::TimedOut => summary.timed_out += 1,
                    _ => summary.inconclusive += 1,
                }
            }
            Err(e) => {
                error!("{}: {:#}", instance.display(), e);
                summary.failures.push(InstanceFailure {
                    instance: instance.clone(),
                    message: format!("{:#}", e),
                });
            }
        }
    }
    Ok(summary)
}

fn run_instance(
    descriptor_path: &Path,
    config: &ExecutionConfig,
    shared: &Mutex<Shared>,
) -> Result<InstanceOutcome> {
    lock(shared)
        .progress
        .advance(format!("Running {}", descriptor_path.display()));

    let descriptor = BenchmarkDescriptor::load(descriptor_path)?;
    if !descriptor.declares_property(&config.property) {
        debug!(instance = %descriptor_path.display(), "property not declared, skipping");
        return Ok(InstanceOutcome::Skipped);
    }

    let input_file = descriptor.resolve_input(descriptor_path);
    let output_dir = instance_output_dir(&config.output_root, &input_file);
    ensure_dir(&output_dir)?;
    let result = process::execute(
        &config.tool,
        &Invocation {
            input_file: &input_file,
            output_dir: &output_dir,
            backend: &config.backend,
            property: &config.property,
        },
    );
    let cause = result.cause;
    let row = ReportRow {
        test: input_file,
        answer: result.answer,
        t_backend: result.runtime,
        t_solver: result.solver_time,
        paths: result.paths_explored,
    };
    lock(shared)
        .table
        .add_row(row.into_record())
        .with_context(|| format!("append result for {}", descriptor_path.display()))?;
    Ok(InstanceOutcome::Executed(cause))
}
