/// Execution Engine - Per-Test-Case Process Sandbox
///
/// **Core Responsibility:**
/// Run the prepared program once per test case and capture raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (child process, deadline, memory watch)
/// - Engine does NOT know scoring rules
/// - Engine does NOT evaluate correctness
/// - Engine returns raw outcomes for the Evaluator to classify
///
/// The black-box process abstraction is deliberate: a stronger isolation
/// backend (cgroup-limited container, jail) can replace the spawn path
/// without changing the sandbox contract.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::monitor::{self, MemoryReport, MemoryWatch};

/// Fixed ceiling for the build phase. Generous on purpose: compilers are
/// slow, submissions are small.
pub const BUILD_TIME_LIMIT: Duration = Duration::from_secs(30);

/// Raw result of one sandboxed test-case run.
/// Produced by the engine, consumed by the Evaluator.
#[derive(Debug, Clone, Default)]
pub struct CaseOutcome {
    pub stdout: String,
    pub stderr: String,
    /// Seconds. For a timed-out run this is the configured limit: there is
    /// no more precise number at the point of cancellation.
    pub time: f64,
    /// Peak resident memory the monitor observed, in megabytes.
    pub memory_mb: u64,
    pub timed_out: bool,
    pub memory_exceeded: bool,
    /// The runner itself failed: launch error, broken pipe, reap failure.
    pub runner_fault: bool,
}

impl CaseOutcome {
    fn fault() -> Self {
        Self {
            runner_fault: true,
            ..Self::default()
        }
    }
}

/// Output of the build phase.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub success: bool,
    pub stderr: String,
}

enum WaitOutcome {
    Completed(std::io::Result<(Vec<u8>, Vec<u8>)>),
    TimedOut,
    MemoryTripped,
}

/// Run one test case: spawn the program, feed it the case input, race the
/// deadline and the memory watch against completion, and clean up the
/// process and the monitor on every exit path.
pub async fn run_case(
    command: &[String],
    workdir: &Path,
    input: &str,
    time_limit: f64,
    memory_limit: u64,
) -> CaseOutcome {
    let mut child = match spawn(command, workdir) {
        Ok(child) => child,
        Err(e) => {
            warn!(?command, error = %e, "failed to launch judged process");
            return CaseOutcome::fault();
        }
    };

    let mut watch = match child.id() {
        Some(pid) if memory_limit > 0 => Some(monitor::spawn_monitor(pid, memory_limit)),
        _ => None,
    };

    let start = Instant::now();
    let deadline = Duration::from_secs_f64(time_limit);

    let waited = {
        let io = communicate(&mut child, input.as_bytes());
        tokio::pin!(io);
        tokio::select! {
            result = tokio::time::timeout(deadline, &mut io) => match result {
                Ok(done) => WaitOutcome::Completed(done),
                Err(_) => WaitOutcome::TimedOut,
            },
            _ = wait_tripped(watch.as_mut()) => WaitOutcome::MemoryTripped,
        }
    };

    let elapsed = start.elapsed().as_secs_f64();

    let mut outcome = match waited {
        WaitOutcome::Completed(Ok((stdout, stderr))) => CaseOutcome {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            time: elapsed,
            ..CaseOutcome::default()
        },
        WaitOutcome::Completed(Err(e)) => {
            warn!(error = %e, "process I/O failed mid-run");
            CaseOutcome {
                time: elapsed,
                ..CaseOutcome::fault()
            }
        }
        WaitOutcome::TimedOut => CaseOutcome {
            time: time_limit,
            timed_out: true,
            ..CaseOutcome::default()
        },
        WaitOutcome::MemoryTripped => CaseOutcome {
            time: elapsed,
            memory_exceeded: true,
            ..CaseOutcome::default()
        },
    };

    // Cleanup runs on every branch: the child must not outlive this call,
    // and the monitor's peak is retrieved after its cancellation.
    kill(&mut child).await;
    let report = match watch.take() {
        Some(watch) => watch.finish().await,
        None => MemoryReport::default(),
    };
    outcome.memory_mb = report.peak_mb;
    outcome.memory_exceeded = outcome.memory_exceeded || report.exceeded;

    debug!(
        time = outcome.time,
        memory_mb = outcome.memory_mb,
        timed_out = outcome.timed_out,
        memory_exceeded = outcome.memory_exceeded,
        "case run finished"
    );

    outcome
}

/// Run a compile command under the fixed build ceiling. An I/O error here
/// means the toolchain itself could not be started, which the caller treats
/// as fatal to the whole run.
pub async fn run_build(command: &[String], workdir: &Path) -> std::io::Result<BuildOutput> {
    let (program, args) = split_command(command)?;

    let output = Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(BUILD_TIME_LIMIT, output).await {
        Ok(Ok(output)) => Ok(BuildOutput {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(BuildOutput {
            success: false,
            stderr: format!(
                "compiler did not finish within {} seconds",
                BUILD_TIME_LIMIT.as_secs()
            ),
        }),
    }
}

fn spawn(command: &[String], workdir: &Path) -> std::io::Result<Child> {
    let (program, args) = split_command(command)?;

    Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

fn split_command(command: &[String]) -> std::io::Result<(&String, &[String])> {
    command.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command")
    })
}

/// Feed the input, collect both output streams to EOF, reap the process.
/// Does not enforce any deadline; the caller races this future.
async fn communicate(child: &mut Child, input: &[u8]) -> std::io::Result<(Vec<u8>, Vec<u8>)> {
    if let Some(mut stdin) = child.stdin.take() {
        // A program that exits without reading its input closes the pipe;
        // that is the program's business, not a runner fault.
        let _ = stdin.write_all(input).await;
        let _ = stdin.shutdown().await;
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    match (&mut stdout_pipe, &mut stderr_pipe) {
        (Some(out), Some(err)) => {
            tokio::try_join!(out.read_to_end(&mut stdout), err.read_to_end(&mut stderr))?;
        }
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "child stdio was not piped",
            ));
        }
    }

    child.wait().await?;
    Ok((stdout, stderr))
}

/// Resolves the first time the monitor signals exceedance; pends forever
/// when no monitor is running.
async fn wait_tripped(watch: Option<&mut MemoryWatch>) {
    match watch {
        Some(watch) => watch.exceeded().await,
        None => std::future::pending().await,
    }
}

/// Idempotent kill-and-reap. Safe to call on an already-exited process.
async fn kill(child: &mut Child) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }
    if child.start_kill().is_ok() {
        let _ = child.wait().await;
    }
}
