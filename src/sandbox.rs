mod compile;
mod runner;
mod shell_runner;
mod toolchains;

// Re-export the traits and common types
pub use compile::{Compile, CompileError, NativeCompiler, PassThroughCompiler};
pub use runner::Execute;
pub use shell_runner::{OUTPUT_LIMIT_EXCEEDED, ShellRunner, UNPERMITTED_SYSCALL, classify};
pub use toolchains::{Language, Toolchains};

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifact::ArtifactStore;

/// Syscall filter linked into every natively compiled submission
const FILTER_SOURCE: &str = include_str!("sandbox/filter.c");
const FILTER_FILE_NAME: &str = "syscall-filter.c";

/// Outcome of running one artifact against one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success { output: String, run_time: Duration },
    BadExecution { stderr: String, run_time: Duration },
    TimeLimitExceeded,
}

/// Writes the syscall filter source into the store's root and returns its path.
///
/// The file lives for the whole worker lifetime, so it is not an artifact.
pub fn install_filter(store: &ArtifactStore) -> io::Result<PathBuf> {
    let path = store.root().join(FILTER_FILE_NAME);
    std::fs::write(&path, FILTER_SOURCE)?;
    log::info!("Installed syscall filter at {}", path.display());
    Ok(path)
}
