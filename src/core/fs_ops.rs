use std::fs::{self, File, FileTimes};
use std::io;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Rename, falling back to copy-and-delete when source and target are on different volumes.
pub(crate) fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("Cross-device move {:?} -> {:?}, copying", from, to);
            if from.is_dir() {
                copy_tree(from, to)?;
                fs::remove_dir_all(from)
            } else {
                copy_file_preserving(from, to)?;
                fs::remove_file(from)
            }
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_file_preserving(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Copies contents and permissions, then carries over access and modification times.
pub(crate) fn copy_file_preserving(from: &Path, to: &Path) -> io::Result<u64> {
    let copied = fs::copy(from, to)?;
    let metadata = fs::metadata(from)?;
    let mut times = FileTimes::new();
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    File::options().write(true).open(to)?.set_times(times)?;
    Ok(copied)
}

pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
