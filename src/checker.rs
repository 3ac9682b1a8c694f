use std::time::Duration;

use crate::artifact::Artifact;
use crate::job::{Job, JobStatus, Progress};
use crate::matcher::{OutputMatcher, clean, matches_all};
use crate::problem::{Catalog, Judging, TestCase};
use crate::sandbox::{Execute, ExecutionResult, Toolchains};

/// Pause between receiving a job and reporting that it compiles
pub const DEFAULT_PACING: Duration = Duration::from_millis(250);

/// Drives submissions from receipt to a terminal status
pub struct SolutionChecker {
    toolchains: Toolchains,
    catalog: Catalog,
    pacing: Duration,
}

/// Where a job is in the pipeline.
///
/// `Running` owns the compiled artifact; it is deleted when the stage is
/// dropped, which happens on every transition out of it.
enum Stage<'a> {
    Received,
    Compiling,
    Running {
        artifact: Artifact,
        executer: &'a dyn Execute,
        cases: &'a [TestCase],
        time_limit: Duration,
        progress: Progress,
    },
}

enum Transition<'a> {
    /// Move to the next stage, reporting a status if the stage emits one
    Advance(Stage<'a>, Option<JobStatus>),
    /// Report a terminal status and stop
    Finish(JobStatus),
}

impl SolutionChecker {
    pub fn new(toolchains: Toolchains, catalog: Catalog) -> Self {
        Self {
            toolchains,
            catalog,
            pacing: DEFAULT_PACING,
        }
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Judges one job, handing every status to `emit` in pipeline order.
    ///
    /// Exactly one terminal status is emitted and returned.
    pub async fn process_job(&self, job: &Job, mut emit: impl FnMut(JobStatus) + Send) -> JobStatus {
        log::info!(
            "Processing job {} (problem {}, language {})",
            job.id,
            job.problem,
            job.language
        );

        emit(JobStatus::Started);

        let mut stage = Stage::Received;
        loop {
            match self.advance(stage, job).await {
                Transition::Advance(next, status) => {
                    if let Some(status) = status {
                        emit(status);
                    }
                    stage = next;
                }
                Transition::Finish(status) => {
                    log::info!("Job {} finished: {}", job.id, status.label());
                    emit(status.clone());
                    return status;
                }
            }
        }
    }

    async fn advance<'a>(&'a self, stage: Stage<'a>, job: &Job) -> Transition<'a> {
        match stage {
            Stage::Received => self.receive(job).await,
            Stage::Compiling => self.compile(job).await,
            Stage::Running {
                artifact,
                executer,
                cases,
                time_limit,
                progress,
            } => run_next_case(artifact, executer, cases, time_limit, progress).await,
        }
    }

    async fn receive<'a>(&'a self, job: &Job) -> Transition<'a> {
        if let Some(problem) = self.catalog.get(&job.problem) {
            if let Judging::Answer(answer) = &problem.judging {
                return Transition::Finish(check_word(answer, &job.source));
            }
        }

        if self.toolchains.compiler(&job.language).is_none() {
            return Transition::Finish(JobStatus::BadLanguage);
        }

        tokio::time::sleep(self.pacing).await;
        Transition::Advance(Stage::Compiling, Some(JobStatus::Compiling))
    }

    async fn compile<'a>(&'a self, job: &Job) -> Transition<'a> {
        let Some(compiler) = self.toolchains.compiler(&job.language) else {
            return Transition::Finish(JobStatus::BadLanguage);
        };

        let artifact = match compiler.compile(&job.source).await {
            Ok(artifact) => artifact,
            Err(e) => {
                return Transition::Finish(JobStatus::CompileErr { message: e.message });
            }
        };

        let Some(executer) = self.toolchains.executer(&job.language) else {
            return Transition::Finish(JobStatus::BadLanguage);
        };

        let Some(problem) = self.catalog.get(&job.problem) else {
            return Transition::Finish(JobStatus::BadProblem);
        };

        let cases = problem.test_cases();
        if cases.is_empty() {
            return Transition::Finish(JobStatus::BadProblem);
        }

        // A zero override would disable the runner's timeout
        let time_limit = job
            .time_limit
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(problem.time_limit);
        let progress = Progress::new(cases.len() as u32);

        Transition::Advance(
            Stage::Running {
                artifact,
                executer,
                cases,
                time_limit,
                progress: progress.clone(),
            },
            Some(JobStatus::Running(progress)),
        )
    }
}

async fn run_next_case<'a>(
    artifact: Artifact,
    executer: &'a dyn Execute,
    cases: &'a [TestCase],
    time_limit: Duration,
    mut progress: Progress,
) -> Transition<'a> {
    let case = &cases[progress.completed as usize];
    let result = executer
        .execute(artifact.path(), &case.input, time_limit)
        .await;

    match result {
        ExecutionResult::Success { output, run_time } => {
            progress.run_times.push(run_time.as_micros() as u64);

            if !matches_all(&case.expected, &clean(&output)) {
                return Transition::Finish(JobStatus::WrongAnswer(progress));
            }

            progress.completed += 1;
            if progress.completed == progress.total {
                return Transition::Finish(JobStatus::Completed(progress));
            }

            Transition::Advance(
                Stage::Running {
                    artifact,
                    executer,
                    cases,
                    time_limit,
                    progress: progress.clone(),
                },
                Some(JobStatus::Running(progress)),
            )
        }
        ExecutionResult::BadExecution { stderr, run_time } => {
            progress.run_times.push(run_time.as_micros() as u64);
            Transition::Finish(JobStatus::BadExecution {
                progress,
                message: stderr,
            })
        }
        ExecutionResult::TimeLimitExceeded => {
            Transition::Finish(JobStatus::TimeLimitExceeded(progress))
        }
    }
}

/// Word problems compare the submitted text itself against the answer
fn check_word(answer: &OutputMatcher, submission: &str) -> JobStatus {
    let lines = clean(submission);
    let mut progress = Progress::new(1);

    if let [line] = lines.as_slice() {
        if answer.test(line) {
            progress.completed = 1;
            progress.run_times.push(0);
            return JobStatus::Completed(progress);
        }
    }

    JobStatus::WrongAnswer(progress)
}
