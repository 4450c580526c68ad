use std::path::{Path, PathBuf};

/// A file a runner is asked to produce, removed once the guard is dropped.
///
/// Creating the guard deletes any stale copy left behind by an earlier run so
/// that its content is never mistaken for fresh output.
#[derive(Debug)]
pub struct TemporaryFile {
    path: PathBuf,
}

impl TemporaryFile {
    pub fn new<T: AsRef<Path>>(path: T) -> Self {
        let path = path.as_ref().to_path_buf();
        remove(&path);
        TemporaryFile { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        remove(&self.path);
    }
}

fn remove(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed result file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove result file"),
    }
}
