use crate::core::error::SourceError;
use crate::core::types::{BackendKind, EntryKind};
use crate::ports::{SourceBackend, TransferObserver};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const CHUNK_SIZE: usize = 1024 * 1024;

/// A mounted network share or local directory used as a release source.
#[derive(Debug)]
pub(crate) struct ShareBackend {
    root: String,
}

impl ShareBackend {
    pub(crate) async fn open(root: &Path) -> Result<Self, SourceError> {
        let root_str = root.display().to_string();
        match tokio::fs::metadata(root).await {
            Ok(meta) if meta.is_dir() => {
                info!("Using share {}", root_str);
                Ok(Self { root: root_str })
            }
            _ => Err(SourceError::RootUnavailable(root_str)),
        }
    }
}

fn io_error(path: &Path, source: io::Error) -> SourceError {
    SourceError::Io {
        path: path.display().to_string(),
        source,
    }
}

async fn copy_chunked(
    from: &Path,
    to: &Path,
    observer: &dyn TransferObserver,
) -> Result<u64, SourceError> {
    let mut src = tokio::fs::File::open(from)
        .await
        .map_err(|e| io_error(from, e))?;
    let mut dst = tokio::fs::File::create(to)
        .await
        .map_err(|e| io_error(to, e))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = src.read(&mut buf).await.map_err(|e| io_error(from, e))?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await.map_err(|e| io_error(to, e))?;
        total += n as u64;
        observer.on_progress(n as u64);
    }
    dst.flush().await.map_err(|e| io_error(to, e))?;
    Ok(total)
}

#[async_trait]
impl SourceBackend for ShareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Share
    }

    fn root(&self) -> &str {
        &self.root
    }

    fn join(&self, base: &str, name: &str) -> String {
        Path::new(base).join(name).display().to_string()
    }

    fn parent(&self, path: &str) -> Option<String> {
        Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.display().to_string())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, SourceError> {
        let dir_path = PathBuf::from(dir);
        let mut entries = tokio::fs::read_dir(&dir_path)
            .await
            .map_err(|e| io_error(&dir_path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&dir_path, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn classify(&self, path: &str) -> Result<EntryKind, SourceError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(EntryKind::Directory),
            Ok(_) => Ok(EntryKind::File),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(EntryKind::Missing),
            Err(e) => Err(io_error(Path::new(path), e)),
        }
    }

    async fn size(&self, path: &str) -> Result<Option<u64>, SourceError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(Path::new(path), e)),
        }
    }

    async fn retrieve(
        &self,
        remote_path: &str,
        dest: &Path,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<u64, SourceError> {
        copy_chunked(Path::new(remote_path), dest, observer.as_ref()).await
    }

    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), SourceError> {
        tokio::fs::create_dir_all(remote_dir)
            .await
            .map_err(|e| io_error(Path::new(remote_dir), e))
    }

    async fn store(
        &self,
        local_path: &Path,
        remote_dir: &str,
        name: &str,
        observer: Arc<dyn TransferObserver>,
    ) -> Result<u64, SourceError> {
        let target = Path::new(remote_dir).join(name);
        copy_chunked(local_path, &target, observer.as_ref()).await
    }

    async fn close(&self) -> Result<(), SourceError> {
        debug!("Share {} released", self.root);
        Ok(())
    }
}
