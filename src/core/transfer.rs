use crate::core::error::TransferError;
use crate::ports::{SourceBackend, UserInteractionPort};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Moves artifacts between a source backend and local disk, with progress.
pub(crate) struct ArtifactTransfer {
    ui: Arc<dyn UserInteractionPort>,
}

impl ArtifactTransfer {
    pub(crate) fn new(ui: Arc<dyn UserInteractionPort>) -> Self {
        Self { ui }
    }

    /// Downloads `remote_dir/name` into `dest_dir/name`.
    ///
    /// A failed transfer never leaves a truncated file behind.
    pub(crate) async fn retrieve(
        &self,
        backend: &dyn SourceBackend,
        remote_dir: &str,
        name: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| TransferError::LocalFile {
                path: dest_dir.to_path_buf(),
                source: e,
            })?;

        let remote_path = backend.join(remote_dir, name);
        let local_path = dest_dir.join(name);
        let total = match backend.size(&remote_path).await {
            Ok(size) => size,
            Err(e) => {
                debug!("Size of '{}' unavailable: {}", remote_path, e);
                None
            }
        };

        info!(
            "Downloading '{}' from {} to {:?}",
            remote_path,
            backend.kind().label(),
            local_path
        );
        let observer = self.ui.transfer_observer(name, total);
        match backend
            .retrieve(&remote_path, &local_path, Arc::clone(&observer))
            .await
        {
            Ok(bytes) => {
                observer.on_complete();
                debug!("Downloaded {} bytes into {:?}", bytes, local_path);
                Ok(local_path)
            }
            Err(source) => {
                observer.on_complete();
                discard_partial(&local_path).await;
                Err(TransferError::Source {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Uploads `local_path` as `remote_dir/name`, creating missing directories first.
    pub(crate) async fn store(
        &self,
        backend: &dyn SourceBackend,
        local_path: &Path,
        remote_dir: &str,
        name: &str,
    ) -> Result<u64, TransferError> {
        let total = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| TransferError::LocalFile {
                path: local_path.to_path_buf(),
                source: e,
            })?
            .len();

        let to_source = |source| TransferError::Source {
            name: name.to_string(),
            source,
        };
        backend.ensure_dir(remote_dir).await.map_err(to_source)?;

        info!(
            "Uploading {:?} to {} '{}'",
            local_path,
            backend.kind().label(),
            remote_dir
        );
        let observer = self.ui.transfer_observer(name, Some(total));
        let result = backend
            .store(local_path, remote_dir, name, Arc::clone(&observer))
            .await;
        observer.on_complete();
        result.map_err(to_source)
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial download {:?}: {}", path, e),
    }
}
