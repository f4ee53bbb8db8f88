use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const TIMEOUT_ANSWER: &str = "Timeout";
pub const DEFAULT_TOOL: &str = "owic";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);
pub const DEFAULT_MEMORY_LIMIT: u64 = 15 * 1024 * 1024 * 1024;
pub const REPORT_FILE: &str = "report.json";
pub const TARGET_ARCH: &str = "32";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const TERM_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Program followed by any leading arguments; instance flags are appended.
    pub command: Vec<String>,
    pub timeout: Duration,
    pub memory_limit: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: vec![DEFAULT_TOOL.to_string()],
            timeout: DEFAULT_TIMEOUT,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Completed,
    TimedOut,
    LaunchFailed,
    ReportMissing,
    ReportMalformed,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::Completed => "completed",
            Cause::TimedOut => "timed_out",
            Cause::LaunchFailed => "launch_failed",
            Cause::ReportMissing => "report_missing",
            Cause::ReportMalformed => "report_malformed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub answer: String,
    pub runtime: f64,
    pub solver_time: f64,
    pub paths_explored: u64,
    pub cause: Cause,
}

impl ExecutionResult {
    fn inconclusive(cause: Cause, runtime: f64) -> Self {
        Self {
            answer: TIMEOUT_ANSWER.to_string(),
            runtime,
            solver_time: 0.0,
            paths_explored: 0,
            cause,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolReport {
    specification: Value,
    solver_time: f64,
    paths_explored: u64,
}

/// One tool invocation. `backend` is carried for logging only; the tool's
/// command line is fixed.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub input_file: &'a Path,
    pub output_dir: &'a Path,
    pub backend: &'a str,
    pub property: &'a Path,
}

/// Runs the tool once. Never fails: every launch, signal or report problem
/// becomes a `Timeout` result with zeroed solver fields.
pub fn execute(tool: &ToolConfig, inv: &Invocation<'_>) -> ExecutionResult {
    let start = Instant::now();
    let cause_or_report = run_tool(tool, inv);
    let runtime = start.elapsed().as_secs_f64();
    match cause_or_report {
        Ok(report) => ExecutionResult {
            answer: render_answer(&report.specification),
            runtime,
            solver_time: report.solver_time,
            paths_explored: report.paths_explored,
            cause: Cause::Completed,
        },
        Err(cause) => {
            debug!(
                input = %inv.input_file.display(),
                backend = inv.backend,
                cause = cause.as_str(),
                "inconclusive run"
            );
            ExecutionResult::inconclusive(cause, runtime)
        }
    }
}

fn run_tool(tool: &ToolConfig, inv: &Invocation<'_>) -> Result<ToolReport, Cause> {
    let report = inv.output_dir.join(REPORT_FILE);
    if let Err(e) = fs::remove_file(&report) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("could not remove stale {}: {}", report.display(), e);
        }
    }
    let mut cmd = build_command(tool, inv).ok_or(Cause::LaunchFailed)?;
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            debug!("failed to launch {:?}: {}", tool.command, e);
            return Err(Cause::LaunchFailed);
        }
    };
    match wait_with_timeout(&mut child, tool.timeout) {
        Ok(Some(status)) => {
            debug!(input = %inv.input_file.display(), %status, "tool exited");
        }
        Ok(None) => {
            terminate_group(&mut child);
            return Err(Cause::TimedOut);
        }
        Err(e) => {
            warn!("waiting on tool failed: {}", e);
            terminate_group(&mut child);
            return Err(Cause::TimedOut);
        }
    }
    read_report(&report)
}

fn build_command(tool: &ToolConfig, inv: &Invocation<'_>) -> Option<Command> {
    let (program, leading) = tool.command.split_first()?;
    let mut cmd = Command::new(program);
    cmd.args(leading)
        .arg(inv.input_file)
        .arg("--output")
        .arg(inv.output_dir)
        .arg("--test-comp")
        .arg("--property")
        .arg(inv.property)
        .arg("--arch")
        .arg(TARGET_ARCH)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let memory_limit = tool.memory_limit;
    // Runs in the forked child, before exec.
    unsafe {
        cmd.pre_exec(move || limit_child(memory_limit));
    }
    Some(cmd)
}

fn limit_child(memory_limit: u64) -> io::Result<()> {
    unsafe {
        #[allow(clippy::useless_conversion)]
        let v: libc::rlim_t = memory_limit as libc::rlim_t;
        let as_limit = libc::rlimit {
            rlim_cur: v,
            rlim_max: v,
        };
        if libc::setrlimit(libc::RLIMIT_AS, &as_limit) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::setsid() == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// SIGTERM to the child's whole process group, SIGKILL to the group after
/// the grace period or as soon as the leader exits, then reap.
fn terminate_group(child: &mut Child) {
    // setsid made the child a group leader, so its pid is the pgid. The leader
    // is not reaped before the SIGKILL, which keeps the pgid reserved.
    let pgid = child.id() as libc::pid_t;
    signal_group(pgid, libc::SIGTERM);
    let deadline = Instant::now() + TERM_GRACE;
    while Instant::now() < deadline && !leader_exited(pgid) {
        thread::sleep(POLL_INTERVAL);
    }
    signal_group(pgid, libc::SIGKILL);
    let _ = child.kill();
    let _ = child.wait();
}

/// Peeks at the leader's exit status without reaping it.
fn leader_exited(pid: libc::pid_t) -> bool {
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let rc = unsafe {
        libc::waitid(
            libc::P_PID,
            pid as libc::id_t,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if rc != 0 {
        return true;
    }
    siginfo_pid(&info) != 0
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn siginfo_pid(info: &libc::siginfo_t) -> libc::pid_t {
    unsafe { info.si_pid() }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn siginfo_pid(info: &libc::siginfo_t) -> libc::pid_t {
    info.si_pid
}

fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    if unsafe { libc::killpg(pgid, signal) } != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("killpg({}, {}) failed: {}", pgid, signal, err);
        }
    }
}

fn read_report(path: &Path) -> Result<ToolReport, Cause> {
    let bytes = fs::read(path).map_err(|_| Cause::ReportMissing)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        debug!("unparseable report {}: {}", path.display(), e);
        Cause::ReportMalformed
    })
}

fn render_answer(specification: &Value) -> String {
    match specification {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
