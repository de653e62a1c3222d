use std::path::Path;

/// Extensions of documents that are filed as bills.
const BILL_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "webp", "tif", "tiff", "heic", "xls", "xlsx", "csv", "doc",
    "docx",
];

/// Extensions that are never bills, even though they tend to sit next to them.
/// These skip the content check entirely.
const NON_BILL_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "log", "ini", "db", "lnk", "url", "exe", "dll", "zip", "rar", "7z",
    "tmp", "bak", "ds_store", "crdownload", "part",
];

/// Determines if a file is a billing document we should track.
///
/// Known extensions decide immediately. Files without an extension, or with
/// one we have never seen, are sniffed: PDFs and images count as bills.
pub fn is_bill_file(path: &Path) -> bool {
    if is_hidden(path) {
        return false;
    }

    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        let ext_lower = extension.to_lowercase();

        if BILL_EXTENSIONS.contains(&ext_lower.as_str()) {
            return true;
        }

        if NON_BILL_EXTENSIONS.contains(&ext_lower.as_str()) {
            return false;
        }
    }

    sniff_bill_content(path)
}

/// Returns true for dot-files and dot-directories.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn sniff_bill_content(path: &Path) -> bool {
    match tree_magic_mini::from_filepath(path) {
        Some(mime) => {
            tracing::debug!("Sniffed {} as {}", path.display(), mime);
            mime == "application/pdf" || mime.starts_with("image/")
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn recognises_bill_extensions_case_insensitively() {
        assert!(is_bill_file(Path::new("/bills/INV-001.PDF")));
        assert!(is_bill_file(Path::new("/bills/receipt.jpeg")));
        assert!(is_bill_file(Path::new("/bills/ledger.xlsx")));
    }

    #[test]
    fn rejects_noise_files() {
        assert!(!is_bill_file(Path::new("/bills/notes.txt")));
        assert!(!is_bill_file(Path::new("/bills/.hidden.pdf")));
        assert!(!is_bill_file(Path::new("/bills/download.crdownload")));
    }

    #[test]
    fn plain_text_without_extension_is_not_a_bill() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("README");
        fs::write(&path, "just some text").unwrap();
        assert!(!is_bill_file(&path));
    }
}
