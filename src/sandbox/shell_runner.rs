use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use super::{Execute, ExecutionResult};

/// Replaces raw sandbox diagnostics in reported errors
pub const UNPERMITTED_SYSCALL: &str = "Unpermitted system call detected";

/// Reported when either output stream grows past the runner's cap
pub const OUTPUT_LIMIT_EXCEEDED: &str = "Output limit exceeded";

/// What the shell prints when a child dies of SIGSYS
const SANDBOX_VIOLATION_MARKER: &str = "Bad system call";

/// Exit statuses of `timeout` when the limit was hit (plain and `-s KILL`)
const TIMEOUT_EXIT_CODES: [i32; 2] = [124, 137];

/// Extra time granted to the wrapper before it is killed from here
const DEFAULT_GRACE: Duration = Duration::from_millis(1000);

/// Bytes kept from each of stdout and stderr
const DEFAULT_OUTPUT_LIMIT: u64 = 16 * 1024 * 1024;

/// `timeout` reads a zero duration as "no limit"
const MIN_TIME_LIMIT: Duration = Duration::from_millis(1);

/// `$1` is the limit in seconds, `$2` the input file, the rest the command.
/// `--foreground` keeps `timeout` and the program in the runner's process
/// group. The trailing `exit` keeps bash from exec-ing into `timeout`, so bash
/// is the one that reports a signal death on stderr.
const WRAPPER_SCRIPT: &str = r#"limit="$1"; input="$2"; shift 2
timeout --foreground -s KILL "$limit" "$@" < "$input"
exit $?"#;

/// Executes artifacts through `bash` and the coreutils `timeout` utility
#[derive(Debug, Clone)]
pub struct ShellRunner {
    interpreter: Option<String>,
    grace: Duration,
    output_limit: u64,
}

impl ShellRunner {
    /// Runs the artifact itself as an executable
    pub fn native() -> Self {
        Self {
            interpreter: None,
            grace: DEFAULT_GRACE,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    /// Runs the artifact as a script of `interpreter`
    pub fn interpreted(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: Some(interpreter.into()),
            ..Self::native()
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_output_limit(mut self, bytes: u64) -> Self {
        self.output_limit = bytes;
        self
    }

    fn command(&self, artifact: &Path, input: &Path, time_limit: Duration) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(WRAPPER_SCRIPT)
            .arg("judge-run")
            .arg(format!("{:.3}", time_limit.as_secs_f64()))
            .arg(input);
        if let Some(interpreter) = &self.interpreter {
            cmd.arg(interpreter);
        }
        cmd.arg(artifact)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        cmd
    }
}

enum Collected {
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    OutputLimitExceeded,
}

enum PipeError {
    Io(std::io::Error),
    Overflow,
}

impl From<std::io::Error> for PipeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Reads at most `limit` bytes, failing as soon as the pipe offers more
async fn read_capped<R: AsyncRead + Unpin>(pipe: Option<R>, limit: u64) -> Result<Vec<u8>, PipeError> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.take(limit + 1).read_to_end(&mut buf).await?;
    }
    if buf.len() as u64 > limit {
        return Err(PipeError::Overflow);
    }
    Ok(buf)
}

/// Waits for the wrapper while draining both pipes under the output cap
async fn collect(child: &mut Child, limit: u64) -> std::io::Result<Collected> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let status = async { Ok::<_, PipeError>(child.wait().await?) };

    match tokio::try_join!(read_capped(stdout, limit), read_capped(stderr, limit), status) {
        Ok((stdout, stderr, status)) => Ok(Collected::Exited {
            status,
            stdout,
            stderr,
        }),
        Err(PipeError::Overflow) => Ok(Collected::OutputLimitExceeded),
        Err(PipeError::Io(e)) => Err(e),
    }
}

#[async_trait]
impl Execute for ShellRunner {
    async fn execute(&self, artifact: &Path, input: &Path, time_limit: Duration) -> ExecutionResult {
        let time_limit = time_limit.max(MIN_TIME_LIMIT);
        let start_time = Instant::now();
        let mut child = match self.command(artifact, input, time_limit).spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("Failed to launch runner for {}: {e}", artifact.display());
                return ExecutionResult::BadExecution {
                    stderr: format!("Failed to launch runner: {e}"),
                    run_time: start_time.elapsed(),
                };
            }
        };
        let pid = child.id();

        let collected = timeout(time_limit + self.grace, collect(&mut child, self.output_limit)).await;
        let result = match collected {
            Ok(Ok(Collected::Exited {
                status,
                stdout,
                stderr,
            })) => classify(
                status.code(),
                String::from_utf8_lossy(&stdout).into_owned(),
                String::from_utf8_lossy(&stderr).into_owned(),
                start_time.elapsed(),
            ),
            Ok(Ok(Collected::OutputLimitExceeded)) => {
                log::warn!("{} exceeded the output limit", artifact.display());
                ExecutionResult::BadExecution {
                    stderr: OUTPUT_LIMIT_EXCEEDED.to_string(),
                    run_time: start_time.elapsed(),
                }
            }
            Ok(Err(e)) => {
                log::error!("Failed to collect output of {}: {e}", artifact.display());
                ExecutionResult::BadExecution {
                    stderr: format!("Failed to collect program output: {e}"),
                    run_time: start_time.elapsed(),
                }
            }
            Err(_) => {
                log::warn!(
                    "Runner for {} outlived its limit, killing it",
                    artifact.display()
                );
                ExecutionResult::TimeLimitExceeded
            }
        };

        if !matches!(result, ExecutionResult::Success { .. }) {
            kill_process_group(pid);
            if let Err(e) = child.start_kill() {
                log::trace!("Runner already exited: {e}");
            }
        }

        result
    }
}

/// Maps the wrapper's exit status to an execution result
pub fn classify(
    code: Option<i32>,
    stdout: String,
    stderr: String,
    run_time: Duration,
) -> ExecutionResult {
    match code {
        Some(0) => ExecutionResult::Success {
            output: stdout,
            run_time,
        },
        Some(code) if TIMEOUT_EXIT_CODES.contains(&code) => ExecutionResult::TimeLimitExceeded,
        _ if stderr.contains(SANDBOX_VIOLATION_MARKER) => ExecutionResult::BadExecution {
            stderr: UNPERMITTED_SYSCALL.to_string(),
            run_time,
        },
        _ => ExecutionResult::BadExecution { stderr, run_time },
    }
}

/// Kills everything left in the group the runner was spawned into
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        log::trace!("Process group {pid} already gone: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUN_TIME: Duration = Duration::from_millis(5);

    #[test]
    fn test_classify_success_keeps_output() {
        assert_eq!(
            classify(Some(0), "42\n".into(), String::new(), RUN_TIME),
            ExecutionResult::Success {
                output: "42\n".into(),
                run_time: RUN_TIME
            }
        );
    }

    #[test]
    fn test_classify_timeouts() {
        for code in TIMEOUT_EXIT_CODES {
            assert_eq!(
                classify(Some(code), String::new(), "Killed".into(), RUN_TIME),
                ExecutionResult::TimeLimitExceeded
            );
        }
    }

    #[test]
    fn test_classify_sandbox_violation_is_normalized() {
        let stderr = "judge-run: line 2: 4242 Bad system call (core dumped) timeout -s KILL ...";
        assert_eq!(
            classify(Some(159), String::new(), stderr.into(), RUN_TIME),
            ExecutionResult::BadExecution {
                stderr: UNPERMITTED_SYSCALL.into(),
                run_time: RUN_TIME
            }
        );
    }

    #[test]
    fn test_classify_plain_failure_keeps_stderr() {
        assert_eq!(
            classify(Some(1), "partial".into(), "segfault".into(), RUN_TIME),
            ExecutionResult::BadExecution {
                stderr: "segfault".into(),
                run_time: RUN_TIME
            }
        );
        assert!(matches!(
            classify(None, String::new(), String::new(), RUN_TIME),
            ExecutionResult::BadExecution { .. }
        ));
    }
}
