use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

use crate::checker::DEFAULT_PACING;

#[derive(Parser, Debug)]
#[command(name = "judge-worker", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Root working directory; problems are loaded from <ROOT_DIR>/problems
    #[arg(long = "root-dir", short = 'r', env = "ROOT_DIR")]
    pub root_dir: PathBuf,

    /// Directory for scratch source files and binaries [default: <ROOT_DIR>/tmp]
    #[arg(long = "temp-dir", env = "TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Coordinator socket [default: <ROOT_DIR>/judge.sock]
    #[arg(long = "socket", short = 's', env = "JUDGE_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Delay between connection attempts, in milliseconds
    #[arg(long = "retry-ms", default_value_t = 1000)]
    pub retry_ms: u64,

    /// Delay before a received job starts compiling, in milliseconds
    #[arg(long = "pacing-ms", default_value_t = DEFAULT_PACING.as_millis() as u64)]
    pub pacing_ms: u64,

    /// Name reported to the coordinator
    #[arg(long = "name", default_value = "judge-worker")]
    pub name: String,
}

/// Validated worker settings, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub root_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub socket_path: PathBuf,
    pub retry_interval: Duration,
    pub pacing: Duration,
    pub worker_name: String,
}

impl CliArgs {
    /// Resolves defaults and checks that the root directory exists
    pub fn to_config(&self) -> anyhow::Result<WorkerConfig> {
        if !self.root_dir.is_dir() {
            bail!("Root directory {} does not exist", self.root_dir.display());
        }
        let root_dir = self
            .root_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", self.root_dir.display()))?;

        let temp_dir = self
            .temp_dir
            .clone()
            .unwrap_or_else(|| root_dir.join("tmp"));
        std::fs::create_dir_all(&temp_dir)
            .with_context(|| format!("Failed to create temp directory {}", temp_dir.display()))?;

        let socket_path = self
            .socket
            .clone()
            .unwrap_or_else(|| root_dir.join("judge.sock"));

        Ok(WorkerConfig {
            root_dir,
            temp_dir,
            socket_path,
            retry_interval: Duration::from_millis(self.retry_ms),
            pacing: Duration::from_millis(self.pacing_ms),
            worker_name: self.name.clone(),
        })
    }
}

impl WorkerConfig {
    pub fn problems_dir(&self) -> PathBuf {
        self.root_dir.join("problems")
    }

    /// Settings for a worker rooted at `root_dir`, with every other value defaulted
    pub fn with_root(root_dir: impl AsRef<Path>) -> Self {
        let root_dir = root_dir.as_ref().to_path_buf();
        Self {
            temp_dir: root_dir.join("tmp"),
            socket_path: root_dir.join("judge.sock"),
            root_dir,
            retry_interval: Duration::from_millis(1000),
            pacing: DEFAULT_PACING,
            worker_name: "judge-worker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_derive_from_root() {
        let root = tempfile::tempdir().unwrap();
        let cli = CliArgs::parse_from([
            "judge-worker",
            "--root-dir",
            root.path().to_str().unwrap(),
        ]);

        let config = cli.to_config().unwrap();
        let root_dir = root.path().canonicalize().unwrap();
        assert_eq!(config.temp_dir, root_dir.join("tmp"));
        assert!(config.temp_dir.is_dir());
        assert_eq!(config.socket_path, root_dir.join("judge.sock"));
        assert_eq!(config.problems_dir(), root_dir.join("problems"));
        assert_eq!(config.retry_interval, Duration::from_millis(1000));
        assert_eq!(config.pacing, DEFAULT_PACING);
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let cli = CliArgs::parse_from([
            "judge-worker",
            "--root-dir",
            "/definitely/not/a/judge/root",
            "--pacing-ms",
            "0",
        ]);
        assert!(cli.to_config().is_err());
    }
}
