//! Whole-document JSON persistence shared by the configuration and tracking stores.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::core::{CoreError, CoreResult};

/// Reads a JSON document, returning `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> CoreResult<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoreError::persistence(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| CoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Writes a JSON document by replacing the target file in one step.
///
/// The document is written to a temporary file in the same directory and
/// renamed over the target, so readers see either the old or the new
/// document and never a partial one.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| CoreError::persistence(parent, e))?;

    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| CoreError::persistence(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| CoreError::persistence(path, e))?;
    temp.write_all(&json)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| CoreError::persistence(path, e))?;
    temp.persist(path)
        .map_err(|e| CoreError::persistence(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn missing_document_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<BTreeMap<String, u32>> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn write_then_read_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("bills".to_string(), 3u32);

        write_json(&path, &doc).unwrap();
        let back: BTreeMap<String, u32> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn malformed_document_is_reported_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{ not json").unwrap();

        let result: CoreResult<Option<BTreeMap<String, u32>>> = read_json(&path);
        assert!(matches!(result, Err(CoreError::Corrupt { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
