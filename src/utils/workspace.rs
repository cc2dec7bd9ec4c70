use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;

const UPLOAD_FILE: &str = "upload.saber";
const STAGING_DIR: &str = "staging";

/// Per-request scratch directory under the configured temp root.
///
/// Everything a conversion writes lives below it; dropping the workspace
/// removes the whole tree, on success, on error and while unwinding.
#[derive(Debug)]
pub struct RequestWorkspace {
    dir: TempDir,
}

impl RequestWorkspace {
    pub fn create(temp_root: &Path, request_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(temp_root)?;
        let prefix = format!("saber-{}-", sanitize_prefix(request_id));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(temp_root)?;
        std::fs::create_dir(dir.path().join(STAGING_DIR))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn upload_path(&self) -> PathBuf {
        self.dir.path().join(UPLOAD_FILE)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join(STAGING_DIR)
    }

    pub fn archive_path(&self, saber_name: &str) -> PathBuf {
        self.dir.path().join(format!("{saber_name}.zip"))
    }

    /// Removes the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }

    /// Removes the directory on the blocking pool, for async callers
    /// abandoning a request.
    pub async fn discard(self) {
        match tokio::task::spawn_blocking(move || self.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to remove request workspace: {}", e),
            Err(e) => warn!("Workspace cleanup task failed: {}", e),
        }
    }
}

/// Request ids come from a client header; keep only filename-safe characters.
fn sanitize_prefix(request_id: &str) -> String {
    request_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(64)
        .collect()
}
