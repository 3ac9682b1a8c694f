use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::checker::SolutionChecker;
use crate::config::WorkerConfig;
use crate::create_timestamp;
use crate::job::{Job, JobStatus};
use crate::protocol::{self, Connection, CoordinatorMessage, JobRequest, WorkerMessage};

pub type Outbox = mpsc::UnboundedSender<WorkerMessage>;

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Connects to the coordinator, retrying at a fixed interval, and judges every
/// job it sends. Jobs run concurrently and outlive the connection they arrived
/// on; their messages queue up until the next connection.
pub async fn worker(
    config: Arc<WorkerConfig>,
    checker: Arc<SolutionChecker>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let (outbox, mut pending) = mpsc::unbounded_channel::<WorkerMessage>();
    let mut unsent: Option<String> = None;
    log::info!("Worker {} initialized", config.worker_name);

    loop {
        let connection = tokio::select! {
            _ = token.cancelled() => break,
            res = protocol::connect(&config.socket_path) => res,
        };

        match connection {
            Ok(conn) => {
                log::info!(
                    "Connected to coordinator at {}",
                    config.socket_path.display()
                );
                let end = serve_connection(
                    conn,
                    &config,
                    &checker,
                    &outbox,
                    &mut pending,
                    &mut unsent,
                    &token,
                )
                .await;

                match end {
                    Ok(SessionEnd::Shutdown) => break,
                    Ok(SessionEnd::Disconnected) => log::warn!("Coordinator closed the connection"),
                    Err(e) => log::warn!("Connection to coordinator lost: {e:#}"),
                }
            }
            Err(e) => log::debug!(
                "Coordinator unreachable at {}: {e}",
                config.socket_path.display()
            ),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(config.retry_interval) => {}
        }
    }

    log::info!("Worker {} has shut down gracefully", config.worker_name);
    Ok(())
}

async fn serve_connection(
    mut conn: Connection,
    config: &WorkerConfig,
    checker: &Arc<SolutionChecker>,
    outbox: &Outbox,
    pending: &mut mpsc::UnboundedReceiver<WorkerMessage>,
    unsent: &mut Option<String>,
    token: &CancellationToken,
) -> anyhow::Result<SessionEnd> {
    let hello = WorkerMessage::Hello {
        worker: config.worker_name.clone(),
    };
    conn.send(protocol::encode(&hello)?).await?;

    if let Some(line) = unsent.take() {
        send_line(&mut conn, line, unsent).await?;
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker received shutdown signal, stopping");
                return Ok(SessionEnd::Shutdown);
            }

            Some(message) = pending.recv() => {
                let line = protocol::encode(&message)?;
                send_line(&mut conn, line, unsent).await?;
            }

            frame = conn.next() => match frame {
                Some(Ok(line)) => dispatch(&line, checker, outbox),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(SessionEnd::Disconnected),
            }
        }
    }
}

/// Keeps a line that failed to go out so the next connection can resend it
async fn send_line(
    conn: &mut Connection,
    line: String,
    unsent: &mut Option<String>,
) -> anyhow::Result<()> {
    if let Err(e) = conn.send(line.clone()).await {
        *unsent = Some(line);
        return Err(e.into());
    }
    Ok(())
}

fn dispatch(line: &str, checker: &Arc<SolutionChecker>, outbox: &Outbox) {
    match protocol::decode::<CoordinatorMessage>(line) {
        Ok(CoordinatorMessage::CreateJob(request)) => {
            tokio::spawn(handle_job(request, Arc::clone(checker), outbox.clone()));
        }
        Err(e) => log::warn!("Ignoring malformed message from coordinator: {e}"),
    }
}

/// Assigns an id to the request, reports it, then streams the job's statuses
pub async fn handle_job(request: JobRequest, checker: Arc<SolutionChecker>, outbox: Outbox) {
    let JobRequest {
        correlation_id,
        username,
        problem,
        language,
        source,
        time_limit,
    } = request;

    let job = Job {
        id: Uuid::new_v4().to_string(),
        username,
        problem,
        language,
        source,
        time_limit,
        time_initiated: create_timestamp(),
        status: JobStatus::Started,
    };

    post(
        &outbox,
        WorkerMessage::JobIdAssigned {
            correlation_id,
            job_id: job.id.clone(),
            time_initiated: job.time_initiated.clone(),
        },
    );

    checker
        .process_job(&job, |status| {
            post(
                &outbox,
                WorkerMessage::StatusUpdate {
                    job_id: job.id.clone(),
                    status,
                },
            )
        })
        .await;

    post(
        &outbox,
        WorkerMessage::JobCompleted {
            job_id: job.id.clone(),
        },
    );
}

fn post(outbox: &Outbox, message: WorkerMessage) {
    if outbox.send(message).is_err() {
        log::warn!("Worker outbox closed, dropping message");
    }
}
