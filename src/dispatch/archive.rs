use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Moved(PathBuf),
    /// Nothing at the source path any more; treated as already archived.
    AlreadyGone,
}

/// Backup directory for `source`: the parent directory's components in
/// `[start, end)` appended to `backup_root`. Index 0 is the filesystem root,
/// so `/home/u/Nextcloud/Record/Photo/2024/Trip/a.jpg` with `[6, 8]` maps to
/// `<backup_root>/2024/Trip`.
pub fn backup_dir(source: &Path, backup_root: &Path, segments: [usize; 2]) -> PathBuf {
    let [start, end] = segments;
    let mut dir = backup_root.to_path_buf();
    let parent = source.parent().unwrap_or_else(|| Path::new(""));

    for component in parent.components().take(end).skip(start) {
        if let Component::Normal(part) = component {
            dir.push(part);
        }
    }
    dir
}

/// Move `source` into its backup directory. An existing file at the
/// destination is deleted and the move retried once.
pub fn archive_file(
    source: &Path,
    backup_root: &Path,
    segments: [usize; 2],
) -> io::Result<ArchiveOutcome> {
    if !source.exists() {
        debug!("{} already gone, nothing to archive", source.display());
        return Ok(ArchiveOutcome::AlreadyGone);
    }

    let file_name = source.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", source.display()),
        )
    })?;
    let dir = backup_dir(source, backup_root, segments);
    fs::create_dir_all(&dir)?;
    let destination = dir.join(file_name);

    if let Err(e) = move_no_clobber(source, &destination) {
        warn!(
            "Move to {} failed ({}), deleting destination and retrying",
            destination.display(),
            e
        );
        match fs::remove_file(&destination) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", destination.display(), e),
        }
        move_file(source, &destination)?;
    }

    Ok(ArchiveOutcome::Moved(destination))
}

fn move_no_clobber(source: &Path, destination: &Path) -> io::Result<()> {
    if destination.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", destination.display()),
        ));
    }
    move_file(source, destination)
}

/// Rename, falling back to copy + delete when crossing filesystems.
pub fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                "rename {} failed ({}), copying instead",
                source.display(),
                rename_err
            );
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
    }
}
