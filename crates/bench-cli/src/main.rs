use anyhow::Result;
use bench_core::{load_task_set, PatternResolver, DEFAULT_CORPUS_ROOT};
use bench_runner::validation::DEFAULT_VALIDATOR;
use bench_runner::{
    ExecutionConfig, RunSummary, TableMode, ToolConfig, ValidationSummary, ValidatorConfig,
};
use clap::Parser;
use indicatif::ProgressBar;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bench", version, about = "Test-Comp benchmark runner")]
struct Cli {
    /// Number of jobs to run in parallel
    #[arg(short = 'j', long, default_value_t = 1)]
    jobs: usize,
    /// Suite definition
    #[arg(short = 'c', long, default_value = bench_runner::DEFAULT_SUITE)]
    conf: PathBuf,
    #[arg(long, default_value = bench_runner::DEFAULT_RESULTS_DIR)]
    results: PathBuf,
    #[arg(long, default_value = bench_runner::DEFAULT_BACKEND)]
    backend: String,
    #[arg(long, default_value = bench_runner::DEFAULT_PROPERTY)]
    property: PathBuf,
    /// Directory of generated test suites; switches to validation mode
    #[arg(long)]
    validate: Option<PathBuf>,
    #[arg(long, default_value = bench_runner::process::DEFAULT_TOOL)]
    tool: String,
    /// Per-instance wall-clock limit, in seconds
    #[arg(long, default_value_t = 900)]
    timeout: u64,
    #[arg(long, default_value = bench_runner::DEFAULT_OUTPUT_ROOT)]
    output_root: PathBuf,
    /// Exclude patterns starting with this prefix resolve from the working directory
    #[arg(long, default_value = DEFAULT_CORPUS_ROOT)]
    corpus_root: String,
    #[arg(long, default_value = DEFAULT_VALIDATOR)]
    validator: String,
    /// Keep report rows in memory and write them once at the end
    #[arg(long)]
    buffered: bool,
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let json_mode = cli.json;
    match run_command(cli) {
        Ok(payload) => {
            let failed = payload
                .pointer("/summary/failures")
                .and_then(|v| v.as_array())
                .is_some_and(|f| !f.is_empty());
            if json_mode {
                emit_json(&payload);
            }
            if failed {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(cli: Cli) -> Result<Value> {
    let resolver = PatternResolver::new(PathBuf::new(), cli.corpus_root.clone());
    let tasks = load_task_set(&cli.conf, &resolver)?;

    if let Some(artifacts) = cli.validate {
        let mut config = ValidatorConfig::new(artifacts, cli.property);
        config.command = vec![cli.validator];
        let summary = bench_runner::validate_tasks(&tasks, &config)?;
        if !cli.json {
            print_validation_summary(&summary);
        }
        return Ok(json!({
            "ok": true,
            "command": "validate",
            "summary": summary,
        }));
    }

    let config = ExecutionConfig {
        jobs: cli.jobs.max(1),
        property: cli.property,
        backend: cli.backend,
        output_root: cli.output_root,
        tool: ToolConfig {
            command: vec![cli.tool],
            timeout: Duration::from_secs(cli.timeout),
            ..ToolConfig::default()
        },
    };
    let mode = if cli.buffered {
        TableMode::Buffered
    } else {
        TableMode::Direct
    };
    let bar = if cli.json {
        ProgressBar::hidden()
    } else {
        bench_runner::progress_bar()
    };
    let summary = bench_runner::run_tasks(&tasks, &cli.results, mode, &config, bar)?;
    if !cli.json {
        print_run_summary(&summary);
    }
    Ok(json!({
        "ok": summary.failures.is_empty(),
        "command": "run",
        "summary": summary,
    }))
}

fn print_run_summary(summary: &RunSummary) {
    println!("report: {}", summary.report.display());
    println!(
        "instances: {} executed: {} skipped: {} timeouts: {} inconclusive: {}",
        summary.total, summary.executed, summary.skipped, summary.timed_out, summary.inconclusive
    );
    for failure in &summary.failures {
        eprintln!("failed: {}: {}", failure.instance.display(), failure.message);
    }
}

fn print_validation_summary(summary: &ValidationSummary) {
    println!(
        "validated: {} skipped: {} missing test suites: {}",
        summary.validated, summary.skipped, summary.missing_artifacts
    );
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}
