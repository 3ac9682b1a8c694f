//! The coordinator's end of the job channel.
//!
//! The coordinator listens on a Unix socket and accepts worker connections.
//! The most recent worker to complete the handshake receives new jobs. Status
//! updates are handed to a [`JobTracker`], which owns the job records.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::{JobId, JobStatus};
use crate::protocol::{self, CoordinatorMessage, JobRequest, WorkerMessage};

const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no worker is connected")]
    NotConnected,
    #[error("worker disconnected before acknowledging the job")]
    Disconnected,
    #[error("worker did not acknowledge the job in time")]
    TimedOut,
    #[error("unknown job {0}")]
    UnknownJob(JobId),
}

/// What a caller asks the coordinator to judge
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub username: String,
    pub problem: String,
    pub language: String,
    pub source: String,
    pub time_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedJob {
    pub job_id: JobId,
    pub time_initiated: String,
}

/// The coordinator's view of one job
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TrackedJob {
    pub id: JobId,
    pub username: String,
    pub problem: String,
    pub language: String,
    pub time_initiated: String,
    pub status: JobStatus,
}

/// Receives the job record on every transition
pub trait JobTracker: Send + Sync {
    fn add_job(&self, job: TrackedJob);
    fn update_job(&self, job_id: &str, status: JobStatus);
    fn get_job(&self, job_id: &str) -> Option<TrackedJob>;
}

#[derive(Debug, Default)]
pub struct MemoryJobTracker {
    jobs: RwLock<HashMap<JobId, TrackedJob>>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobTracker for MemoryJobTracker {
    fn add_job(&self, job: TrackedJob) {
        self.jobs.write().insert(job.id.clone(), job);
    }

    /// Updates for unknown jobs are ignored
    fn update_job(&self, job_id: &str, status: JobStatus) {
        if let Some(job) = self.jobs.write().get_mut(job_id) {
            job.status = status;
        }
    }

    fn get_job(&self, job_id: &str) -> Option<TrackedJob> {
        self.jobs.read().get(job_id).cloned()
    }
}

struct WorkerSession {
    id: u64,
    name: String,
    outbox: mpsc::UnboundedSender<CoordinatorMessage>,
}

struct PendingJob {
    session: u64,
    submission: JobSubmission,
    reply: oneshot::Sender<AssignedJob>,
}

struct Shared {
    tracker: Arc<dyn JobTracker>,
    worker: Mutex<Option<WorkerSession>>,
    pending: Mutex<HashMap<String, PendingJob>>,
    completions: Mutex<HashMap<JobId, watch::Sender<Option<JobStatus>>>>,
    connected: Notify,
    next_session: AtomicU64,
    ack_timeout: Duration,
}

#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    pub fn new(tracker: Arc<dyn JobTracker>) -> Self {
        Self::with_ack_timeout(tracker, DEFAULT_ACK_TIMEOUT)
    }

    /// Like [`Coordinator::new`], with a custom wait for the worker's job id
    pub fn with_ack_timeout(tracker: Arc<dyn JobTracker>, ack_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tracker,
                worker: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                completions: Mutex::new(HashMap::new()),
                connected: Notify::new(),
                next_session: AtomicU64::new(1),
                ack_timeout,
            }),
        }
    }

    /// Binds the endpoint, replacing a stale socket file left by a previous run
    pub fn bind(path: impl AsRef<Path>) -> io::Result<UnixListener> {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => log::debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        UnixListener::bind(path)
    }

    pub fn tracker(&self) -> &Arc<dyn JobTracker> {
        &self.shared.tracker
    }

    pub fn is_connected(&self) -> bool {
        self.shared.worker.lock().is_some()
    }

    /// Waits until a worker has completed the handshake
    pub async fn wait_for_worker(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let notified = self.shared.connected.notified();
            if self.is_connected() {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.is_connected();
            }
        }
    }

    /// Accepts worker connections until `token` is cancelled
    pub async fn serve(&self, listener: UnixListener, token: CancellationToken) -> io::Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("Coordinator stopped accepting workers");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let coordinator = self.clone();
                    let token = token.clone();
                    tokio::spawn(async move { coordinator.run_session(stream, token).await });
                }
            }
        }
    }

    /// Sends a job to the connected worker and waits for its id.
    ///
    /// Fails immediately when no worker is connected.
    pub async fn submit(&self, submission: JobSubmission) -> Result<AssignedJob, SubmitError> {
        let correlation_id = Uuid::new_v4().to_string();
        let request = CoordinatorMessage::CreateJob(JobRequest {
            correlation_id: correlation_id.clone(),
            username: submission.username.clone(),
            problem: submission.problem.clone(),
            language: submission.language.clone(),
            source: submission.source.clone(),
            time_limit: submission.time_limit,
        });
        let (reply, assigned) = oneshot::channel();

        {
            let worker = self.shared.worker.lock();
            let Some(session) = worker.as_ref() else {
                return Err(SubmitError::NotConnected);
            };

            self.shared.pending.lock().insert(
                correlation_id.clone(),
                PendingJob {
                    session: session.id,
                    submission,
                    reply,
                },
            );

            if session.outbox.send(request).is_err() {
                self.shared.pending.lock().remove(&correlation_id);
                return Err(SubmitError::NotConnected);
            }
        }

        match timeout(self.shared.ack_timeout, assigned).await {
            Ok(Ok(job)) => Ok(job),
            Ok(Err(_)) => Err(SubmitError::Disconnected),
            Err(_) => {
                self.shared.pending.lock().remove(&correlation_id);
                Err(SubmitError::TimedOut)
            }
        }
    }

    /// Resolves with the terminal status once the worker reports completion
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<JobStatus, SubmitError> {
        let receiver = self
            .shared
            .completions
            .lock()
            .get(job_id)
            .map(watch::Sender::subscribe);

        let Some(mut receiver) = receiver else {
            return match self.shared.tracker.get_job(job_id) {
                Some(job) if job.status.is_terminal() => Ok(job.status),
                _ => Err(SubmitError::UnknownJob(job_id.to_string())),
            };
        };

        if receiver.wait_for(Option::is_some).await.is_err() {
            log::debug!("Completion channel for job {job_id} closed");
        }
        let status = receiver.borrow().clone();
        status.ok_or_else(|| SubmitError::UnknownJob(job_id.to_string()))
    }

    async fn run_session(&self, stream: UnixStream, token: CancellationToken) {
        let session = self.shared.next_session.fetch_add(1, Ordering::Relaxed);
        let (outbox, mut requests) = mpsc::unbounded_channel();
        let mut conn = protocol::framed(stream);
        log::debug!("Worker connection {session} accepted");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,

                Some(request) = requests.recv() => {
                    let line = match protocol::encode(&request) {
                        Ok(line) => line,
                        Err(e) => {
                            log::error!("Failed to encode request: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = conn.send(line).await {
                        log::warn!("Failed to send request to worker: {e}");
                        break;
                    }
                }

                frame = conn.next() => match frame {
                    Some(Ok(line)) => match protocol::decode::<WorkerMessage>(&line) {
                        Ok(message) => self.handle_worker_message(session, &outbox, message),
                        Err(e) => log::warn!("Ignoring malformed message from worker: {e}"),
                    },
                    Some(Err(e)) => {
                        log::warn!("Worker connection {session} failed: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }

        self.end_session(session);
    }

    fn handle_worker_message(
        &self,
        session: u64,
        outbox: &mpsc::UnboundedSender<CoordinatorMessage>,
        message: WorkerMessage,
    ) {
        match message {
            WorkerMessage::Hello { worker } => {
                log::info!("Worker {worker} connected");
                *self.shared.worker.lock() = Some(WorkerSession {
                    id: session,
                    name: worker,
                    outbox: outbox.clone(),
                });
                self.shared.connected.notify_waiters();
            }

            WorkerMessage::JobIdAssigned {
                correlation_id,
                job_id,
                time_initiated,
            } => {
                let Some(pending) = self.shared.pending.lock().remove(&correlation_id) else {
                    log::warn!("Job {job_id} was assigned to unknown request {correlation_id}");
                    return;
                };

                let JobSubmission {
                    username,
                    problem,
                    language,
                    ..
                } = pending.submission;
                self.shared.tracker.add_job(TrackedJob {
                    id: job_id.clone(),
                    username,
                    problem,
                    language,
                    time_initiated: time_initiated.clone(),
                    status: JobStatus::Started,
                });
                self.shared
                    .completions
                    .lock()
                    .insert(job_id.clone(), watch::channel(None).0);

                let assigned = AssignedJob {
                    job_id,
                    time_initiated,
                };
                if pending.reply.send(assigned).is_err() {
                    log::debug!("Submitter stopped waiting for request {correlation_id}");
                }
            }

            WorkerMessage::StatusUpdate { job_id, status } => {
                log::debug!("Job {job_id}: {}", status.label());
                self.shared.tracker.update_job(&job_id, status);
            }

            WorkerMessage::JobCompleted { job_id } => {
                let status = self.shared.tracker.get_job(&job_id).map(|job| job.status);
                if let Some(sender) = self.shared.completions.lock().remove(&job_id) {
                    sender.send_replace(status);
                }
                log::info!("Job {job_id} completed");
            }
        }
    }

    fn end_session(&self, session: u64) {
        {
            let mut worker = self.shared.worker.lock();
            if worker.as_ref().is_some_and(|w| w.id == session) {
                if let Some(w) = worker.take() {
                    log::warn!("Worker {} disconnected", w.name);
                }
            }
        }

        // Dropping the reply senders fails the matching `submit` calls
        self.shared
            .pending
            .lock()
            .retain(|_, pending| pending.session != session);
        log::debug!("Worker connection {session} closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Progress;

    fn tracked(id: &str) -> TrackedJob {
        TrackedJob {
            id: id.to_string(),
            username: "bob".to_string(),
            problem: "sum".to_string(),
            language: "c".to_string(),
            time_initiated: crate::create_timestamp(),
            status: JobStatus::Started,
        }
    }

    #[test]
    fn test_memory_tracker_updates_known_jobs_only() {
        let tracker = MemoryJobTracker::new();
        tracker.add_job(tracked("a"));

        tracker.update_job("a", JobStatus::Compiling);
        tracker.update_job("ghost", JobStatus::Compiling);

        assert_eq!(tracker.get_job("a").unwrap().status, JobStatus::Compiling);
        assert!(tracker.get_job("ghost").is_none());
    }

    #[tokio::test]
    async fn test_submit_without_worker_fails_fast() {
        let coordinator = Coordinator::new(Arc::new(MemoryJobTracker::new()));

        let result = coordinator
            .submit(JobSubmission {
                username: "bob".into(),
                problem: "sum".into(),
                language: "c".into(),
                source: String::new(),
                time_limit: None,
            })
            .await;
        assert_eq!(result, Err(SubmitError::NotConnected));
        assert!(!coordinator.wait_for_worker(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_wait_for_completion_of_finished_job() {
        let tracker = Arc::new(MemoryJobTracker::new());
        tracker.add_job(tracked("done"));
        tracker.update_job("done", JobStatus::Completed(Progress::new(0)));
        let coordinator = Coordinator::new(tracker);

        assert_eq!(
            coordinator.wait_for_completion("done").await,
            Ok(JobStatus::Completed(Progress::new(0)))
        );
        assert_eq!(
            coordinator.wait_for_completion("nope").await,
            Err(SubmitError::UnknownJob("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_silent_worker_times_out_submission() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("judge.sock");
        let coordinator = Coordinator::with_ack_timeout(
            Arc::new(MemoryJobTracker::new()),
            Duration::from_millis(100),
        );
        let listener = Coordinator::bind(&socket).unwrap();
        let token = CancellationToken::new();
        tokio::spawn({
            let coordinator = coordinator.clone();
            let token = token.clone();
            async move { coordinator.serve(listener, token).await }
        });

        let mut worker = protocol::connect(&socket).await.unwrap();
        let hello = WorkerMessage::Hello {
            worker: "mute".into(),
        };
        worker.send(protocol::encode(&hello).unwrap()).await.unwrap();
        assert!(coordinator.wait_for_worker(Duration::from_secs(5)).await);

        let result = coordinator
            .submit(JobSubmission {
                username: "bob".into(),
                problem: "sum".into(),
                language: "c".into(),
                source: String::new(),
                time_limit: None,
            })
            .await;
        assert_eq!(result, Err(SubmitError::TimedOut));
        assert!(coordinator.shared.pending.lock().is_empty());

        let request = worker.next().await.unwrap().unwrap();
        assert!(matches!(
            protocol::decode::<CoordinatorMessage>(&request),
            Ok(CoordinatorMessage::CreateJob(_))
        ));
        token.cancel();
    }
}
