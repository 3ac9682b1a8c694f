use serde::{Deserialize, Serialize};

pub type JobId = String;

/// Test case progress carried by the running and finished statuses
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
    /// Run time of each executed case in microseconds
    pub run_times: Vec<u64>,
}

impl Progress {
    pub fn new(total: u32) -> Self {
        Self {
            completed: 0,
            total,
            run_times: Vec::with_capacity(total as usize),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Started,
    BadLanguage,
    BadProblem,
    Compiling,
    CompileErr {
        message: String,
    },
    Running(Progress),
    WrongAnswer(Progress),
    TimeLimitExceeded(Progress),
    BadExecution {
        #[serde(flatten)]
        progress: Progress,
        message: String,
    },
    Completed(Progress),
}

impl JobStatus {
    /// Terminal statuses end a job's status stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started | Self::Compiling | Self::Running(_))
    }

    pub fn progress(&self) -> Option<&Progress> {
        match self {
            Self::Running(p)
            | Self::WrongAnswer(p)
            | Self::TimeLimitExceeded(p)
            | Self::Completed(p)
            | Self::BadExecution { progress: p, .. } => Some(p),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::BadLanguage => "Unsupported Language",
            Self::BadProblem => "Unknown Problem",
            Self::Compiling => "Compiling",
            Self::CompileErr { .. } => "Compilation Error",
            Self::Running(_) => "Running",
            Self::WrongAnswer(_) => "Wrong Answer",
            Self::TimeLimitExceeded(_) => "Time Limit Exceeded",
            Self::BadExecution { .. } => "Runtime Error",
            Self::Completed(_) => "Accepted",
        }
    }
}

/// One submission as it moves through the judging pipeline
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub username: String,
    pub problem: String,
    pub language: String,
    pub source: String,
    /// Milliseconds; the problem's own limit applies when absent
    pub time_limit: Option<u64>,
    pub time_initiated: String,
    pub status: JobStatus,
}
