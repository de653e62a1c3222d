//! Copies bills into the GST submitted tree and removes them again.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::error::{CoreError, CoreResult, MirrorOperation};
use super::gst::FolderNames;

/// The path `source` is mirrored to: `<gst_root>/<year>/<submission>/<name>`.
pub fn submitted_destination(
    source: &Path,
    gst_root: &Path,
    names: &FolderNames,
) -> CoreResult<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| CoreError::UnknownFile(source.to_path_buf()))?;
    Ok(names.dir_in(gst_root).join(file_name))
}

/// Copies `source` to an exact `destination`, creating its parent folders.
/// An existing file there is overwritten.
pub fn place_copy(source: &Path, destination: &Path) -> CoreResult<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| CoreError::mirror(MirrorOperation::Copy, parent, e))?;
    }
    fs::copy(source, destination)
        .map_err(|e| CoreError::mirror(MirrorOperation::Copy, destination, e))?;
    tracing::info!("Mirrored {:?} to {:?}", source, destination);
    Ok(())
}

/// Deletes a mirrored copy. A copy that is already gone is not an error.
///
/// Submission and year folders left empty are removed as well, but never the
/// GST root itself or anything outside it.
pub fn delete_from_submitted_tree(mirrored: &Path, gst_root: &Path) -> CoreResult<()> {
    match fs::remove_file(mirrored) {
        Ok(()) => tracing::info!("Removed mirrored copy {:?}", mirrored),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("Mirrored copy {:?} was already gone", mirrored);
        }
        Err(e) => return Err(CoreError::mirror(MirrorOperation::Delete, mirrored, e)),
    }

    let mut dir = mirrored.parent();
    while let Some(current) = dir {
        if current == gst_root || !current.starts_with(gst_root) {
            break;
        }
        // `remove_dir` only succeeds on an empty folder.
        if fs::remove_dir(current).is_err() {
            break;
        }
        tracing::debug!("Removed empty folder {:?}", current);
        dir = current.parent();
    }
    Ok(())
}
