use crate::core::error::BackupError;
use crate::core::fs_ops::move_path;
use crate::core::types::BackupRecord;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Folders relocated before an update, in order.
pub(crate) const BACKUP_FOLDERS: [&str; 4] = ["exploded", "tools", "tomcat9", "logs"];

/// Only the contents of this folder are moved; the folder itself stays for the service.
pub(crate) const LOGS_FOLDER: &str = "logs";

/// Installer copies staged by a previous update. They are not worth keeping in a backup.
pub(crate) const INSTALLER_BYPRODUCTS: [&str; 3] = [
    "exploded/update/Front/Setup.Front.exe",
    "exploded/update/BackOffice/Setup.RMS.BackOffice.exe",
    "exploded/update/BackOffice/Setup.Chain.BackOffice.exe",
];

pub(crate) struct BackupManager;

impl BackupManager {
    /// Moves `folders` of `server_dir` into a fresh `iiko_backup_<timestamp>` under `backup_root`.
    pub(crate) async fn create_backup(
        server_dir: &Path,
        backup_root: &Path,
        folders: &[&str],
    ) -> Result<BackupRecord, BackupError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let target = backup_root.join(format!("iiko_backup_{stamp}"));
        Self::create_backup_in(server_dir, target, folders).await
    }

    pub(crate) async fn create_backup_in(
        server_dir: &Path,
        target: PathBuf,
        folders: &[&str],
    ) -> Result<BackupRecord, BackupError> {
        let server_dir = server_dir.to_path_buf();
        let folders: Vec<String> = folders.iter().map(|f| f.to_string()).collect();
        let target_path = target.clone();
        tokio::task::spawn_blocking(move || backup_blocking(&server_dir, target, &folders))
            .await
            .map_err(|e| BackupError::Prepare {
                path: target_path,
                source: io::Error::other(e),
            })?
    }
}

pub(crate) fn remove_installer_byproducts(server_dir: &Path) {
    for relative in INSTALLER_BYPRODUCTS {
        let path = server_dir.join(relative);
        if !path.exists() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => info!("Removed stale installer {:?}", path),
            Err(e) => warn!("Could not remove stale installer {:?}: {}", path, e),
        }
    }
}

fn backup_blocking(
    server_dir: &Path,
    target: PathBuf,
    folders: &[String],
) -> Result<BackupRecord, BackupError> {
    remove_installer_byproducts(server_dir);

    fs::create_dir_all(&target).map_err(|e| BackupError::Prepare {
        path: target.clone(),
        source: e,
    })?;
    info!("Backing up {:?} into {:?}", server_dir, target);

    let mut record = BackupRecord::new(target);
    for folder in folders {
        let source = server_dir.join(folder);
        if !source.exists() {
            warn!("Folder {:?} not found, nothing to back up", source);
            continue;
        }

        let step = if folder == LOGS_FOLDER {
            relocate_contents(&source, &record.target_dir.join(folder)).map(|()| {
                record.logs_relocated = true;
            })
        } else {
            move_path(&source, &record.target_dir.join(folder)).map(|()| {
                record.record_moved(folder);
            })
        };

        if let Err(e) = step {
            error!("Backup of '{}' failed: {}. Rolling back.", folder, e);
            let restored = roll_back(server_dir, &record);
            return Err(BackupError::RolledBack {
                folder: folder.clone(),
                source: e,
                restored,
            });
        }
        debug!("Backed up '{}'", folder);
    }
    Ok(record)
}

fn relocate_contents(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        move_path(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}

/// Returns the folders put back in place. Log contents are left in the backup.
fn roll_back(server_dir: &Path, record: &BackupRecord) -> Vec<String> {
    let mut restored = Vec::new();
    for folder in record.moved_folders().iter().rev() {
        let from = record.target_dir.join(folder);
        let to = server_dir.join(folder);
        match move_path(&from, &to) {
            Ok(()) => {
                info!("Restored '{}'", folder);
                restored.push(folder.clone());
            }
            Err(e) => error!("Could not restore {:?} to {:?}: {}", from, to, e),
        }
    }
    restored.reverse();
    if !record.logs_relocated {
        // Fails harmlessly when something is still inside.
        let _ = fs::remove_dir(&record.target_dir);
    }
    restored
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn populate_server(server: &Path) {
        for folder in ["exploded", "tools", "tomcat9"] {
            fs::create_dir_all(server.join(folder)).unwrap();
            fs::write(server.join(folder).join("marker.txt"), folder).unwrap();
        }
        fs::create_dir_all(server.join("logs")).unwrap();
        fs::write(server.join("logs").join("startup.log"), "old log").unwrap();
        fs::write(server.join("logs").join("catalina.log"), "old catalina").unwrap();
    }

    #[tokio::test]
    async fn test_full_backup_keeps_empty_logs_folder() {
        let root = tempdir().unwrap();
        let server = root.path().join("Server");
        populate_server(&server);

        let target = root.path().join("backups").join("iiko_backup_test");
        let record = BackupManager::create_backup_in(&server, target.clone(), &BACKUP_FOLDERS)
            .await
            .unwrap();

        assert_eq!(record.moved_folders(), &["exploded", "tools", "tomcat9"]);
        assert!(record.logs_relocated);
        for folder in ["exploded", "tools", "tomcat9"] {
            assert!(!server.join(folder).exists());
            assert!(target.join(folder).join("marker.txt").exists());
        }

        let logs = server.join("logs");
        assert!(logs.is_dir());
        assert_eq!(fs::read_dir(&logs).unwrap().count(), 0);
        assert_eq!(
            fs::read_to_string(target.join("logs").join("startup.log")).unwrap(),
            "old log"
        );
        assert!(target.join("logs").join("catalina.log").exists());
    }

    #[tokio::test]
    async fn test_missing_folder_is_skipped() {
        let root = tempdir().unwrap();
        let server = root.path().join("Server");
        fs::create_dir_all(server.join("exploded")).unwrap();

        let target = root.path().join("backup");
        let record = BackupManager::create_backup_in(&server, target, &BACKUP_FOLDERS)
            .await
            .unwrap();
        assert_eq!(record.moved_folders(), &["exploded"]);
        assert!(!record.logs_relocated);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_completed_moves() {
        let root = tempdir().unwrap();
        let server = root.path().join("Server");
        for folder in ["A", "B", "C"] {
            fs::create_dir_all(server.join(folder)).unwrap();
            fs::write(server.join(folder).join("data.bin"), folder).unwrap();
        }

        // An occupied destination makes the move of C fail.
        let target = root.path().join("backup");
        fs::create_dir_all(target.join("C").join("occupied")).unwrap();

        let result = BackupManager::create_backup_in(&server, target.clone(), &["A", "B", "C"]).await;
        assert_matches!(
            result,
            Err(BackupError::RolledBack { folder, restored, .. })
                if folder == "C" && restored == vec!["A".to_string(), "B".to_string()]
        );

        for folder in ["A", "B", "C"] {
            assert_eq!(
                fs::read_to_string(server.join(folder).join("data.bin")).unwrap(),
                folder
            );
        }
        assert!(!target.join("A").exists());
        assert!(!target.join("B").exists());
        assert!(target.join("C").join("occupied").exists());
    }

    #[tokio::test]
    async fn test_installer_byproducts_removed_before_backup() {
        let root = tempdir().unwrap();
        let server = root.path().join("Server");
        populate_server(&server);
        let staged = server.join("exploded/update/Front/Setup.Front.exe");
        fs::create_dir_all(staged.parent().unwrap()).unwrap();
        fs::write(&staged, b"MZ").unwrap();

        let target = root.path().join("backup");
        BackupManager::create_backup_in(&server, target.clone(), &BACKUP_FOLDERS)
            .await
            .unwrap();

        assert!(target.join("exploded/update/Front").is_dir());
        assert!(!target.join("exploded/update/Front/Setup.Front.exe").exists());
    }
}
