//! Tar codec for box file transfer.
//!
//! Archives are always uncompressed; the service rejects compressed ones.
//! Everything here is synchronous and touches only the host filesystem,
//! so callers run it on a blocking thread.

use crate::error::{CoreError, Result};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

/// How a downloaded archive is materialised on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Write the first regular file of the archive to the target path.
    File,
    /// Unpack the whole archive below the target directory.
    Directory,
}

/// Where and how a download lands, resolved per call from the local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    /// File or directory extraction.
    pub mode: TargetMode,
    /// Extraction base directory. For file targets this is the parent of `path`.
    pub directory: PathBuf,
    /// The caller-supplied local path.
    pub path: PathBuf,
}

/// Build an uncompressed tar of `source` holding its base name as the only top-level entry.
///
/// This is the only existence check for copy sources. Symlinks are not
/// followed, so a dangling link is archived as a link.
pub fn build_archive(source: &Path) -> Result<Vec<u8>> {
    let metadata = std::fs::symlink_metadata(source).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoreError::SourceNotFound(source.to_path_buf())
        } else {
            CoreError::local_io(source, e)
        }
    })?;

    let name = match source.file_name() {
        Some(name) => PathBuf::from(name),
        None => resolved_base_name(source)?,
    };

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    let appended = if metadata.is_dir() {
        builder.append_dir_all(&name, source)
    } else {
        builder.append_path_with_name(source, &name)
    };
    appended.map_err(|e| CoreError::Archive(format!("failed to add {}: {e}", source.display())))?;

    let bytes = builder
        .into_inner()
        .map_err(|e| CoreError::Archive(format!("failed to finish archive: {e}")))?;
    tracing::debug!(source = %source.display(), size = bytes.len(), "Archive built");
    Ok(bytes)
}

/// Base name for paths like `.` or `..` that carry none of their own.
///
/// The directory they resolve to names the entry; the filesystem root
/// falls back to `.`.
fn resolved_base_name(source: &Path) -> Result<PathBuf> {
    let resolved = std::fs::canonicalize(source).map_err(|e| CoreError::local_io(source, e))?;
    Ok(resolved
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Classify `local_path` as a file or directory target and create what is missing.
///
/// * existing directory: directory target.
/// * existing non-directory: file target, base directory is its parent.
/// * missing path: file target when it has an extension or does not end in
///   a separator, otherwise directory target. The base directory is created.
pub fn resolve_target(local_path: &Path) -> Result<TransferTarget> {
    let target = match std::fs::metadata(local_path) {
        Ok(meta) if meta.is_dir() => TransferTarget {
            mode: TargetMode::Directory,
            directory: local_path.to_path_buf(),
            path: local_path.to_path_buf(),
        },
        Ok(_) => TransferTarget {
            mode: TargetMode::File,
            directory: parent_dir(local_path),
            path: local_path.to_path_buf(),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let target = if local_path.extension().is_some() || !ends_with_separator(local_path) {
                TransferTarget {
                    mode: TargetMode::File,
                    directory: parent_dir(local_path),
                    path: local_path.to_path_buf(),
                }
            } else {
                TransferTarget {
                    mode: TargetMode::Directory,
                    directory: local_path.to_path_buf(),
                    path: local_path.to_path_buf(),
                }
            };
            tracing::debug!(
                path = %local_path.display(),
                mode = ?target.mode,
                directory = %target.directory.display(),
                "Local path missing, creating base directory"
            );
            std::fs::create_dir_all(&target.directory)
                .map_err(|e| CoreError::local_io(&target.directory, e))?;
            target
        }
        Err(e) => return Err(CoreError::local_io(local_path, e)),
    };
    Ok(target)
}

/// Unpack every entry of `archive` below `dir`, keeping relative paths.
pub fn unpack_into_dir(archive: &[u8], dir: &Path) -> Result<()> {
    let mut tar = tar::Archive::new(Cursor::new(archive));
    tar.set_overwrite(true);
    tar.unpack(dir).map_err(|e| {
        CoreError::Archive(format!(
            "failed to extract archive to {}: {e}",
            dir.display()
        ))
    })?;
    tracing::debug!(directory = %dir.display(), "Archive extracted");
    Ok(())
}

/// Write the first regular-file entry of `archive` to `dest`.
///
/// All entries are consumed. Returns the entry's path inside the archive, or
/// `None` when the archive holds no regular file, in which case nothing is
/// written and the call still succeeds.
pub fn unpack_first_file(archive: &[u8], dest: &Path) -> Result<Option<PathBuf>> {
    let written = scan_first_file(archive, |entry_path, entry| {
        let mut file = File::create(dest).map_err(|e| {
            CoreError::Archive(format!("failed to write to {}: {e}", dest.display()))
        })?;
        std::io::copy(entry, &mut file).map_err(|e| {
            CoreError::Archive(format!("failed to write to {}: {e}", dest.display()))
        })?;
        Ok(entry_path)
    })?;

    match written {
        Some(ref entry_path) => tracing::debug!(
            entry = %entry_path.display(),
            dest = %dest.display(),
            "File extracted"
        ),
        None => tracing::warn!(
            dest = %dest.display(),
            "Archive contained no file entry, nothing written"
        ),
    }
    Ok(written)
}

/// Read the first regular-file entry of `archive` into memory.
pub fn read_first_file(archive: &[u8]) -> Result<Option<(PathBuf, Vec<u8>)>> {
    scan_first_file(archive, |entry_path, entry| {
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| CoreError::Archive(format!("failed to read archive entry: {e}")))?;
        Ok((entry_path, contents))
    })
}

/// Hand the first regular-file entry to `on_file` and drain the rest.
///
/// `on_file` runs at most once per call.
fn scan_first_file<T, F>(archive: &[u8], on_file: F) -> Result<Option<T>>
where
    F: FnOnce(PathBuf, &mut dyn Read) -> Result<T>,
{
    let mut tar = tar::Archive::new(Cursor::new(archive));
    let entries = tar
        .entries()
        .map_err(|e| CoreError::Archive(format!("failed to parse tar archive: {e}")))?;

    let mut on_file = Some(on_file);
    let mut found = None;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| CoreError::Archive(format!("failed to parse tar archive: {e}")))?;
        let entry_path = entry
            .path()
            .map(|p| p.into_owned())
            .map_err(|e| CoreError::Archive(format!("invalid entry path: {e}")))?;
        let entry_type = entry.header().entry_type();
        tracing::trace!(entry = %entry_path.display(), kind = ?entry_type, "Tar entry");

        if entry_type.is_file() {
            if let Some(handler) = on_file.take() {
                found = Some(handler(entry_path, &mut entry)?);
                continue;
            }
        }
        tracing::trace!(entry = %entry_path.display(), "Draining tar entry");
    }
    Ok(found)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn ends_with_separator(path: &Path) -> bool {
    path.to_string_lossy()
        .chars()
        .last()
        .is_some_and(std::path::is_separator)
}
