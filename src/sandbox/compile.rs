use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::artifact::{Artifact, ArtifactStore};

const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Turns submitted source text into something an executer can run
#[async_trait]
pub trait Compile: Send + Sync {
    async fn compile(&self, source: &str) -> Result<Artifact, CompileError>;
}

/// Invokes a system toolchain (gcc, g++) and links the syscall filter into
/// the produced binary, so the sandbox travels with the executable itself.
#[derive(Debug, Clone)]
pub struct NativeCompiler {
    program: String,
    flags: Vec<String>,
    extension: String,
    filter: PathBuf,
    store: ArtifactStore,
}

impl NativeCompiler {
    pub fn new(
        program: impl Into<String>,
        flags: &[&str],
        extension: impl Into<String>,
        filter: impl Into<PathBuf>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            program: program.into(),
            flags: flags.iter().map(|s| s.to_string()).collect(),
            extension: extension.into(),
            filter: filter.into(),
            store,
        }
    }

    pub fn gcc(filter: impl Into<PathBuf>, store: ArtifactStore) -> Self {
        Self::new(
            "gcc",
            &[
                "-Wall",
                "-O2",
                "-std=c99",
                "-Wno-error=implicit-function-declaration",
            ],
            "c",
            filter,
            store,
        )
    }

    pub fn gpp(filter: impl Into<PathBuf>, store: ArtifactStore) -> Self {
        Self::new("g++", &["-w", "-O2"], "cpp", filter, store)
    }
}

#[async_trait]
impl Compile for NativeCompiler {
    async fn compile(&self, source: &str) -> Result<Artifact, CompileError> {
        let source_file = self
            .store
            .create(Some(source.as_bytes()), Some(&self.extension))
            .map_err(|e| CompileError::new(format!("Failed to write source file: {e}")))?;
        let executable = self
            .store
            .create(None, Some("bin"))
            .map_err(|e| CompileError::new(format!("Failed to reserve executable: {e}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.flags)
            .arg(source_file.path())
            .arg(&self.filter)
            .arg("-lseccomp")
            .arg("-o")
            .arg(executable.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = timeout(COMPILE_TIMEOUT, cmd.output()).await;

        // The source is never needed again, whatever the toolchain did
        source_file.delete();

        // On every error branch `executable` is dropped, removing any partial output
        match result {
            Ok(Ok(output)) if output.status.success() => Ok(executable),
            Ok(Ok(output)) => {
                log::debug!("{} exited with {}", self.program, output.status);
                Err(CompileError::new(
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                ))
            }
            Ok(Err(e)) => {
                log::error!("Failed to launch {}: {e}", self.program);
                Err(CompileError::new(format!(
                    "Failed to launch {}: {e}",
                    self.program
                )))
            }
            Err(_) => Err(CompileError::new("Compilation timed out")),
        }
    }
}

/// For interpreted languages the source text itself is the artifact
#[derive(Debug, Clone)]
pub struct PassThroughCompiler {
    extension: String,
    store: ArtifactStore,
}

impl PassThroughCompiler {
    pub fn new(extension: impl Into<String>, store: ArtifactStore) -> Self {
        Self {
            extension: extension.into(),
            store,
        }
    }
}

#[async_trait]
impl Compile for PassThroughCompiler {
    async fn compile(&self, source: &str) -> Result<Artifact, CompileError> {
        self.store
            .create(Some(source.as_bytes()), Some(&self.extension))
            .map_err(|e| CompileError::new(format!("Failed to write source file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_pass_through_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let compiler = PassThroughCompiler::new("py", store);

        let artifact = compiler.compile("print(42)\n").await.unwrap();
        assert_eq!(artifact.path().extension().unwrap(), "py");
        assert_eq!(
            std::fs::read_to_string(artifact.path()).unwrap(),
            "print(42)\n"
        );
    }

    #[tokio::test]
    async fn test_missing_toolchain_is_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let compiler = NativeCompiler::new(
            "definitely-not-a-compiler-on-this-host",
            &[],
            "c",
            dir.path().join("filter.c"),
            store,
        );

        let err = compiler.compile("int main(){}").await.unwrap_err();
        assert!(err.message.contains("Failed to launch"));
        // Neither the source nor the executable is left behind
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_failing_toolchain_reports_stderr_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        // `sh -c` treats the remaining arguments as positional parameters
        let compiler = NativeCompiler::new(
            "sh",
            &["-c", "echo 'syntax error near main' >&2; exit 1", "cc"],
            "c",
            dir.path().join("filter.c"),
            store,
        );

        let err = compiler.compile("int main(){").await.unwrap_err();
        assert_eq!(err.message.trim(), "syntax error near main");
        assert_eq!(entries(dir.path()), 0);
    }
}
