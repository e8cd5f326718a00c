use crate::core::error::TransferError;
use crate::core::transfer::ArtifactTransfer;
use crate::ports::SourceBackend;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

const DEFAULT_BACKUP_SUBDIR: [&str; 2] = ["temp", "update_backups"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UploadOutcome {
    Uploaded { remote_dir: String, archive_name: String },
    /// The archive could not be stored; it is kept locally for manual copying.
    KeptLocally { archive: PathBuf, reason: String },
}

/// Archives a local backup and stores it next to the release sources.
pub(crate) struct BackupUploader<'a> {
    transfer: &'a ArtifactTransfer,
    staging_dir: PathBuf,
    remote_dir_override: Option<String>,
}

impl<'a> BackupUploader<'a> {
    pub(crate) fn new(
        transfer: &'a ArtifactTransfer,
        staging_dir: PathBuf,
        remote_dir_override: Option<String>,
    ) -> Self {
        Self {
            transfer,
            staging_dir,
            remote_dir_override,
        }
    }

    /// `<grandparent of root>/temp/update_backups` unless configured otherwise.
    pub(crate) fn remote_dir_for(&self, backend: &dyn SourceBackend) -> String {
        if let Some(dir) = &self.remote_dir_override {
            return dir.clone();
        }
        let root = backend.root();
        let base = backend
            .parent(root)
            .and_then(|parent| backend.parent(&parent))
            .unwrap_or_else(|| root.to_string());
        DEFAULT_BACKUP_SUBDIR
            .iter()
            .fold(base, |path, segment| backend.join(&path, segment))
    }

    /// Uploads `backup_dir` as a zip. Local copies are removed only after a successful store.
    pub(crate) async fn upload(
        &self,
        backend: &dyn SourceBackend,
        backup_dir: &Path,
        service_name: &str,
    ) -> Result<UploadOutcome, TransferError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let archive_name = format!("{service_name}_backup_{stamp}.zip");
        let archive = self.staging_dir.join(&archive_name);

        let (src, dest) = (backup_dir.to_path_buf(), archive.clone());
        let archive_for_err = archive.clone();
        tokio::task::spawn_blocking(move || zip_directory(&src, &dest))
            .await
            .map_err(|e| TransferError::Archive {
                path: archive_for_err.clone(),
                details: e.to_string(),
            })?
            .map_err(|e| TransferError::Archive {
                path: archive_for_err,
                details: e.to_string(),
            })?;
        info!("Backup archived to {:?}", archive);

        let remote_dir = self.remote_dir_for(backend);
        if let Err(e) = self
            .transfer
            .store(backend, &archive, &remote_dir, &archive_name)
            .await
        {
            warn!("Backup upload failed: {}", e);
            return Ok(UploadOutcome::KeptLocally {
                archive,
                reason: e.to_string(),
            });
        }

        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!("Could not remove uploaded archive {:?}: {}", archive, e);
        }
        if let Err(e) = tokio::fs::remove_dir_all(backup_dir).await {
            warn!("Could not remove local backup {:?}: {}", backup_dir, e);
        }
        Ok(UploadOutcome::Uploaded {
            remote_dir,
            archive_name,
        })
    }
}

/// Zips `dir` so that entries start with the directory's own name.
pub(crate) fn zip_directory(dir: &Path, archive: &Path) -> io::Result<()> {
    let base = dir.parent().unwrap_or(dir);
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = zip::ZipWriter::new(fs::File::create(archive)?);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .large_file(true);

    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry.path().strip_prefix(base).map_err(io::Error::other)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(io::Error::other)?;
        } else {
            writer.start_file(name, options).map_err(io::Error::other)?;
            let mut file = fs::File::open(entry.path())?;
            io::copy(&mut file, &mut writer)?;
        }
    }
    writer.finish().map_err(io::Error::other)?;
    debug!("Wrote archive {:?}", archive);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tests::mock_providers::{MemoryBackend, ScriptedInteraction};
    use std::io::Read;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn make_backup(root: &Path) -> PathBuf {
        let backup = root.join("iiko_backup_20240101_120000");
        fs::create_dir_all(backup.join("exploded")).unwrap();
        fs::write(backup.join("exploded").join("index.html"), "old").unwrap();
        fs::create_dir_all(backup.join("logs")).unwrap();
        backup
    }

    #[test]
    fn test_zip_keeps_backup_folder_name() {
        let dir = tempdir().unwrap();
        let backup = make_backup(dir.path());
        let archive = dir.path().join("out").join("b.zip");
        zip_directory(&backup, &archive).unwrap();

        let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name("iiko_backup_20240101_120000/exploded/index.html")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "old");
    }

    #[tokio::test]
    async fn test_default_remote_dir_is_next_to_sources() {
        let backend = MemoryBackend::new("/distr/iiko/releases");
        let transfer = ArtifactTransfer::new(Arc::new(ScriptedInteraction::default()));
        let uploader = BackupUploader::new(&transfer, PathBuf::from("."), None);
        assert_eq!(uploader.remote_dir_for(&backend), "/distr/temp/update_backups");

        let custom = BackupUploader::new(&transfer, PathBuf::from("."), Some("/backups".into()));
        assert_eq!(custom.remote_dir_for(&backend), "/backups");
    }

    #[tokio::test]
    async fn test_successful_upload_removes_local_copies() {
        let dir = tempdir().unwrap();
        let backup = make_backup(dir.path());
        let staging = dir.path().join("downloads");
        let backend = MemoryBackend::new("/distr/iiko/releases");
        let transfer = ArtifactTransfer::new(Arc::new(ScriptedInteraction::default()));
        let uploader = BackupUploader::new(&transfer, staging.clone(), None);

        let outcome = uploader.upload(&backend, &backup, "iikoRMS").await.unwrap();
        let (remote_dir, archive_name) = match outcome {
            UploadOutcome::Uploaded { remote_dir, archive_name } => (remote_dir, archive_name),
            other => panic!("expected upload, got {other:?}"),
        };
        assert_eq!(remote_dir, "/distr/temp/update_backups");
        assert!(archive_name.starts_with("iikoRMS_backup_"));
        assert!(backend.has_file(&format!("{remote_dir}/{archive_name}")));
        assert!(!backup.exists());
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_archive_and_backup() {
        let dir = tempdir().unwrap();
        let backup = make_backup(dir.path());
        let staging = dir.path().join("downloads");
        let backend = MemoryBackend::new("/distr/iiko/releases").failing_stores();
        let transfer = ArtifactTransfer::new(Arc::new(ScriptedInteraction::default()));
        let uploader = BackupUploader::new(&transfer, staging, None);

        let outcome = uploader.upload(&backend, &backup, "iikoRMS").await.unwrap();
        let archive = match outcome {
            UploadOutcome::KeptLocally { archive, .. } => archive,
            other => panic!("expected local fallback, got {other:?}"),
        };
        assert!(archive.exists());
        assert!(backup.exists());
    }
}
