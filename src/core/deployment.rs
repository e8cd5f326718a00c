use crate::core::error::DeploymentError;
use crate::core::fs_ops::{copy_file_preserving, move_path, remove_path};
use crate::core::transfer::ArtifactTransfer;
use crate::core::types::{EntryKind, ProductType};
use crate::ports::{SourceBackend, UserInteractionPort};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Folders swapped into the server tree from a release archive.
pub(crate) const REPLACED_FOLDERS: [&str; 3] = ["exploded", "tools", "tomcat9"];

/// Where the web application keeps its jars, relative to a server or release root.
pub(crate) const LIBRARY_SUBPATH: [&str; 3] = ["exploded", "WEB-INF", "lib"];

const INSTALLER_STAGING: [&str; 2] = ["exploded", "update"];

/// Installer file name and the staging subfolder it belongs in.
pub(crate) fn installers_for(product: ProductType) -> &'static [(&'static str, &'static str)] {
    match product {
        ProductType::Rms => &[
            ("Setup.Front.exe", "Front"),
            ("Setup.RMS.BackOffice.exe", "BackOffice"),
        ],
        ProductType::Chain => &[("Setup.Chain.BackOffice.exe", "BackOffice")],
    }
}

fn library_dir(root: &Path) -> PathBuf {
    LIBRARY_SUBPATH.iter().fold(root.to_path_buf(), |p, s| p.join(s))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct InstallerReport {
    pub installed: Vec<String>,
    pub missing: Vec<String>,
}

impl InstallerReport {
    pub(crate) fn all_successful(&self) -> bool {
        self.missing.is_empty()
    }
}

pub(crate) struct DeploymentEngine {
    ui: Arc<dyn UserInteractionPort>,
}

impl DeploymentEngine {
    pub(crate) fn new(ui: Arc<dyn UserInteractionPort>) -> Self {
        Self { ui }
    }

    /// Unpacks `archive` into an emptied `extract_dir` and returns the effective release root.
    pub(crate) async fn extract(
        &self,
        archive: &Path,
        extract_dir: &Path,
    ) -> Result<PathBuf, DeploymentError> {
        let archive = archive.to_path_buf();
        let extract_dir = extract_dir.to_path_buf();
        let archive_for_err = archive.clone();

        tokio::task::spawn_blocking(move || {
            if extract_dir.exists() {
                fs::remove_dir_all(&extract_dir).map_err(|e| DeploymentError::Io {
                    path: extract_dir.clone(),
                    source: e,
                })?;
            }
            fs::create_dir_all(&extract_dir).map_err(|e| DeploymentError::Io {
                path: extract_dir.clone(),
                source: e,
            })?;

            let file = fs::File::open(&archive).map_err(|e| DeploymentError::Io {
                path: archive.clone(),
                source: e,
            })?;
            let mut zip = zip::ZipArchive::new(file).map_err(|e| DeploymentError::Extraction {
                archive: archive.clone(),
                details: format!("Failed to open zip: {}", e),
            })?;
            zip.extract(&extract_dir)
                .map_err(|e| DeploymentError::Extraction {
                    archive: archive.clone(),
                    details: format!("Failed to extract zip: {}", e),
                })?;
            info!("Extracted {} entries from {:?}", zip.len(), archive);

            resolve_source_root(&extract_dir)
        })
        .await
        .map_err(|e| DeploymentError::Extraction {
            archive: archive_for_err,
            details: format!("extraction task failed: {}", e),
        })?
    }

    /// Offers the jars that the previous release had and the new one lacks, and
    /// copies the chosen ones into the new release. Returns the copied names.
    pub(crate) async fn migrate_custom_libraries(
        &self,
        backup_dir: &Path,
        source_root: &Path,
    ) -> Vec<String> {
        let old_lib = library_dir(backup_dir);
        let new_lib = library_dir(source_root);

        let (backup, release) = (backup_dir.to_path_buf(), source_root.to_path_buf());
        let diff = tokio::task::spawn_blocking(move || library_diff(&backup, &release))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        let extra = match diff {
            Ok(Some(extra)) => extra,
            Ok(None) => {
                warn!("A library folder is missing, skipping library comparison");
                return Vec::new();
            }
            Err(e) => {
                error!("Library comparison failed: {}", e);
                return Vec::new();
            }
        };
        if extra.is_empty() {
            info!("No custom libraries found");
            return Vec::new();
        }

        let chosen = match self
            .ui
            .multi_select(
                "These libraries exist only in the previous release. Select the ones to carry over:",
                extra.clone(),
            )
            .await
        {
            Ok(indices) => indices,
            Err(e) => {
                warn!("Library selection aborted: {}", e);
                return Vec::new();
            }
        };
        let names: Vec<String> = chosen
            .into_iter()
            .filter_map(|i| extra.get(i).cloned())
            .collect();
        if names.is_empty() {
            return Vec::new();
        }

        tokio::task::spawn_blocking(move || copy_libraries(&old_lib, &new_lib, names))
            .await
            .unwrap_or_else(|e| {
                error!("Library copy task failed: {}", e);
                Vec::new()
            })
    }

    /// Moves each named folder from the release into the server tree, replacing what is there.
    pub(crate) async fn replace_folders(
        &self,
        source_root: &Path,
        server_dir: &Path,
        names: &[&str],
    ) -> Result<(), DeploymentError> {
        let source_root = source_root.to_path_buf();
        let server_dir_owned = server_dir.to_path_buf();
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        tokio::task::spawn_blocking(move || {
            replace_folders_blocking(&source_root, &server_dir_owned, &names)
        })
        .await
        .map_err(|e| DeploymentError::Io {
            path: server_dir.to_path_buf(),
            source: io::Error::other(e),
        })?
    }

    /// Stages the product's installers from the release directory. Absent
    /// installers are reported, never fatal.
    pub(crate) async fn install_auxiliary_binaries(
        &self,
        product: ProductType,
        server_dir: &Path,
        backend: &dyn SourceBackend,
        version_path: &str,
        transfer: &ArtifactTransfer,
    ) -> InstallerReport {
        let staging = INSTALLER_STAGING
            .iter()
            .fold(server_dir.to_path_buf(), |p, s| p.join(s));
        let mut report = InstallerReport::default();

        for (file_name, subfolder) in installers_for(product) {
            let remote = backend.join(version_path, file_name);
            match backend.classify(&remote).await {
                Ok(EntryKind::File) => {}
                Ok(_) => {
                    warn!("Installer '{}' not found on {}", file_name, backend.kind().label());
                    report.missing.push(file_name.to_string());
                    continue;
                }
                Err(e) => {
                    warn!("Could not check installer '{}': {}", file_name, e);
                    report.missing.push(file_name.to_string());
                    continue;
                }
            }

            match transfer
                .retrieve(backend, version_path, file_name, &staging.join(subfolder))
                .await
            {
                Ok(path) => {
                    info!("Installer staged at {:?}", path);
                    report.installed.push(file_name.to_string());
                }
                Err(e) => {
                    warn!("Installer '{}' could not be retrieved: {}", file_name, e);
                    report.missing.push(file_name.to_string());
                }
            }
        }
        report
    }
}

fn copy_libraries(old_lib: &Path, new_lib: &Path, names: Vec<String>) -> Vec<String> {
    let mut copied = Vec::new();
    for name in names {
        match copy_file_preserving(&old_lib.join(&name), &new_lib.join(&name)) {
            Ok(_) => {
                debug!("Carried over library '{}'", name);
                copied.push(name);
            }
            Err(e) => error!("Copying library '{}' failed: {}", name, e),
        }
    }
    copied
}

fn replace_folders_blocking(
    source_root: &Path,
    server_dir: &Path,
    names: &[String],
) -> Result<(), DeploymentError> {
    for name in names {
        let src = source_root.join(name);
        let dest = server_dir.join(name);
        if !src.exists() {
            return Err(DeploymentError::MissingFolder {
                folder: name.clone(),
                path: src,
            });
        }
        if dest.exists() {
            remove_path(&dest).map_err(|e| DeploymentError::Io {
                path: dest.clone(),
                source: e,
            })?;
        }
        move_path(&src, &dest).map_err(|e| DeploymentError::Io {
            path: dest.clone(),
            source: e,
        })?;
        debug!("Deployed '{}'", name);
    }
    Ok(())
}

/// A single top-level directory is the release root; otherwise the extraction directory is.
pub(crate) fn resolve_source_root(extract_dir: &Path) -> Result<PathBuf, DeploymentError> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(extract_dir)
        .and_then(|iter| iter.collect::<io::Result<Vec<_>>>())
        .map_err(|e| DeploymentError::Io {
            path: extract_dir.to_path_buf(),
            source: e,
        })?;

    if let [only] = entries.as_slice() {
        let path = only.path();
        if path.is_dir() {
            info!("Archive wraps its content in '{}'", only.file_name().to_string_lossy());
            return Ok(path);
        }
    }
    Ok(extract_dir.to_path_buf())
}

/// Sorted names in the backup's library folder but not in the new one.
/// `None` when either folder does not exist.
pub(crate) fn library_diff(
    backup_dir: &Path,
    source_root: &Path,
) -> io::Result<Option<Vec<String>>> {
    let old_lib = library_dir(backup_dir);
    let new_lib = library_dir(source_root);
    if !old_lib.is_dir() || !new_lib.is_dir() {
        return Ok(None);
    }
    let names = |dir: &Path| -> io::Result<BTreeSet<String>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect()
    };
    let old = names(&old_lib)?;
    let new = names(&new_lib)?;
    Ok(Some(old.difference(&new).cloned().collect()))
}
