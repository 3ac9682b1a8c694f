//! Hosts the coordinator end of the job channel for a single submission.
//!
//! Binds the socket, waits for a worker to connect, submits one source file
//! and prints every status update until the job finishes. Exits with status 0
//! only when every test case passed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use judge::coordinator::{Coordinator, JobSubmission, JobTracker, MemoryJobTracker, TrackedJob};
use judge::job::JobStatus;
use judge::sandbox::Language;

#[derive(Parser, Debug)]
#[command(name = "judge-submit", version = "1.0", about, long_about = None)]
struct SubmitArgs {
    /// Source file to judge
    source: PathBuf,

    /// Problem id
    #[arg(long, short = 'p')]
    problem: String,

    /// Language name [default: guessed from the file extension]
    #[arg(long, short = 'l')]
    language: Option<String>,

    /// Socket to listen on for the worker
    #[arg(long = "socket", short = 's', env = "JUDGE_SOCKET")]
    socket: PathBuf,

    #[arg(long, short = 'u', default_value = "anonymous")]
    username: String,

    /// Per-case time limit in milliseconds, overriding the problem's
    #[arg(long = "time-limit")]
    time_limit: Option<u64>,

    /// How long to wait for a worker to connect, in seconds
    #[arg(long = "wait", default_value_t = 30)]
    wait_secs: u64,
}

/// Prints each transition as it is recorded
struct ConsoleTracker {
    inner: MemoryJobTracker,
}

impl JobTracker for ConsoleTracker {
    fn add_job(&self, job: TrackedJob) {
        println!("job {} accepted at {}", job.id, job.time_initiated);
        self.inner.add_job(job);
    }

    fn update_job(&self, job_id: &str, status: JobStatus) {
        println!("{}", describe(&status));
        self.inner.update_job(job_id, status);
    }

    fn get_job(&self, job_id: &str) -> Option<TrackedJob> {
        self.inner.get_job(job_id)
    }
}

fn describe(status: &JobStatus) -> String {
    match status {
        JobStatus::CompileErr { message } => format!("{}\n{message}", status.label()),
        JobStatus::BadExecution { progress, message } => format!(
            "{} after {}/{} cases: {message}",
            status.label(),
            progress.completed,
            progress.total
        ),
        other => match other.progress() {
            Some(progress) => format!(
                "{} {}/{}",
                other.label(),
                progress.completed,
                progress.total
            ),
            None => other.label().to_string(),
        },
    }
}

fn resolve_language(args: &SubmitArgs) -> anyhow::Result<String> {
    if let Some(language) = &args.language {
        return Ok(language.clone());
    }
    let extension = args
        .source
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| anyhow!("Cannot guess a language for {}", args.source.display()))?;
    Language::from_extension(extension)
        .map(|language| language.as_str().to_string())
        .ok_or_else(|| anyhow!("Unrecognised source extension .{extension}, pass --language"))
}

async fn run(args: SubmitArgs) -> anyhow::Result<JobStatus> {
    let language = resolve_language(&args)?;
    let source = tokio::fs::read_to_string(&args.source)
        .await
        .with_context(|| format!("Failed to read {}", args.source.display()))?;

    let tracker = Arc::new(ConsoleTracker {
        inner: MemoryJobTracker::new(),
    });
    let coordinator = Coordinator::new(tracker);
    let listener = Coordinator::bind(&args.socket)
        .with_context(|| format!("Failed to bind {}", args.socket.display()))?;
    log::info!("Listening for a worker on {}", args.socket.display());

    let token = CancellationToken::new();
    let server = tokio::spawn({
        let coordinator = coordinator.clone();
        let token = token.clone();
        async move { coordinator.serve(listener, token).await }
    });

    let result = async {
        if !coordinator
            .wait_for_worker(Duration::from_secs(args.wait_secs))
            .await
        {
            bail!("No worker connected within {}s", args.wait_secs);
        }

        let assigned = coordinator
            .submit(JobSubmission {
                username: args.username.clone(),
                problem: args.problem.clone(),
                language,
                source,
                time_limit: args.time_limit,
            })
            .await
            .context("Submission was not accepted")?;

        let status = coordinator.wait_for_completion(&assigned.job_id).await?;
        Ok::<_, anyhow::Error>(status)
    }
    .await;

    token.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Coordinator stopped with error: {e}"),
        Err(e) => log::warn!("Coordinator task failed: {e:?}"),
    }
    if let Err(e) = std::fs::remove_file(&args.socket) {
        log::debug!("Could not remove {}: {e}", args.socket.display());
    }

    result
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("warn"));

    match run(SubmitArgs::parse()).await {
        Ok(JobStatus::Completed(_)) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
