//! Messages exchanged between the coordinator and a worker.
//!
//! Each message is one JSON object per line on a Unix domain socket, tagged by
//! its `type` field.

use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::net::UnixStream;
use tokio_util::codec::{Framed, LinesCodec};

use crate::job::{JobId, JobStatus};

/// Source files travel inside a single frame
pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

pub type Connection = Framed<UnixStream, LinesCodec>;

/// Coordinator to worker
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    CreateJob(JobRequest),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Chosen by the coordinator to match the `job_id_assigned` reply
    pub correlation_id: String,
    #[serde(default)]
    pub username: String,
    pub problem: String,
    pub language: String,
    pub source: String,
    /// Milliseconds
    #[serde(default)]
    pub time_limit: Option<u64>,
}

/// Worker to coordinator
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Sent first on every (re)connect
    Hello { worker: String },
    JobIdAssigned {
        correlation_id: String,
        job_id: JobId,
        time_initiated: String,
    },
    StatusUpdate { job_id: JobId, status: JobStatus },
    JobCompleted { job_id: JobId },
}

pub fn framed(stream: UnixStream) -> Connection {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH))
}

pub async fn connect(path: impl AsRef<Path>) -> std::io::Result<Connection> {
    Ok(framed(UnixStream::connect(path).await?))
}

pub fn encode<M: Serialize>(message: &M) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

pub fn decode<M: DeserializeOwned>(line: &str) -> serde_json::Result<M> {
    serde_json::from_str(line)
}
