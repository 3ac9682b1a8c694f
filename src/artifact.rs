use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "tmp";

/// Creates uniquely named scratch files under a single root directory.
///
/// Every name carries a fresh v4 UUID, so concurrent jobs can create files in
/// the same directory without coordinating with each other.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// A scratch file owned by one job.
///
/// The file is removed when the handle is dropped, which covers every exit
/// path of the code holding it (early returns, errors and panics included).
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
}

impl ArtifactStore {
    /// Opens a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserves a fresh file name and writes `contents` to it when present.
    ///
    /// Without contents no file is created on disk; the path is handed out for
    /// a producer such as a compiler to fill in.
    pub fn create(&self, contents: Option<&[u8]>, extension: Option<&str>) -> io::Result<Artifact> {
        let file_name = format!(
            "temp-{}.{}",
            Uuid::new_v4(),
            extension.unwrap_or(DEFAULT_EXTENSION)
        );
        let artifact = Artifact {
            path: self.root.join(file_name),
        };

        if let Some(contents) = contents {
            fs::write(&artifact.path, contents)?;
        }

        Ok(artifact)
    }

    /// Removes the artifact's file; a file that is already gone is not an error
    pub fn delete(&self, artifact: Artifact) {
        artifact.delete();
    }
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn delete(self) {
        // Drop does the removal
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed artifact {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Unable to remove artifact {}: {e}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_create_writes_contents_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let artifact = store.create(Some(b"int main(){}"), Some("c")).unwrap();
        assert_eq!(artifact.path().extension().unwrap(), "c");
        assert!(artifact.path().starts_with(dir.path()));
        assert_eq!(fs::read_to_string(artifact.path()).unwrap(), "int main(){}");
    }

    #[test]
    fn test_create_without_contents_reserves_name_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let artifact = store.create(None, None).unwrap();
        assert!(!artifact.path().exists());
        assert_eq!(artifact.path().extension().unwrap(), DEFAULT_EXTENSION);
    }

    #[test]
    fn test_drop_and_delete_remove_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let dropped = store.create(Some(b"x"), None).unwrap();
        let dropped_path = dropped.path().to_path_buf();
        drop(dropped);
        assert!(!dropped_path.exists());

        let deleted = store.create(Some(b"y"), None).unwrap();
        let deleted_path = deleted.path().to_path_buf();
        store.delete(deleted);
        assert!(!deleted_path.exists());
    }

    #[test]
    fn test_delete_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();

        let artifact = store.create(Some(b"z"), None).unwrap();
        fs::remove_file(artifact.path()).unwrap();
        // Must not panic
        store.delete(artifact);
    }

    #[test]
    fn test_concurrent_creation_never_collides() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..1250)
                        .map(|_| store.create(None, None).unwrap().path().to_path_buf())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let paths: HashSet<PathBuf> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(paths.len(), 10_000);
    }
}
