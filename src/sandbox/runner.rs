use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::ExecutionResult;

/// Runs a compiled artifact against one input file under a wall-clock limit.
///
/// Implementations never fail: launch problems are reported as
/// `ExecutionResult::BadExecution` so a job always ends in a status.
#[async_trait]
pub trait Execute: Send + Sync {
    async fn execute(&self, artifact: &Path, input: &Path, time_limit: Duration) -> ExecutionResult;
}
