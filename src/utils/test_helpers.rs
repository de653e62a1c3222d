//! Fixtures shared by the unit tests.

use std::sync::Once;

static LOGGING_INIT: Once = Once::new();

/// Routes `tracing` output to the test harness, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn setup_test_logging() {
    LOGGING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Writes a small PDF-looking bill at `root/relative`, creating parents.
#[cfg(test)]
pub fn write_bill(root: &std::path::Path, relative: &str) -> std::path::PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, b"%PDF-1.4 test").unwrap();
    path
}

/// Permission tests cannot fail a read as root (UID 0), e.g. in containers.
#[cfg(test)]
pub fn running_as_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid only reads the process credentials.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
