//! Dependency locator for the external mount utility.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Resolves external binaries to a usable path.
pub trait DependencyLocator: Send + Sync {
    /// Path to `name`, or `None` if it cannot be found.
    fn locate(&self, name: &str) -> Option<PathBuf>;
}

/// Looks binaries up on `PATH`; a name containing a separator is treated as
/// an explicit path and only checked for existence.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhichLocator;

impl DependencyLocator for WhichLocator {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        let explicit = Path::new(name);
        if explicit.components().count() > 1 || explicit.is_absolute() {
            return explicit.is_file().then(|| explicit.to_path_buf());
        }
        match which::which(name) {
            Ok(path) => Some(path),
            Err(error) => {
                debug!(name, error = %error, "dependency not on PATH");
                None
            }
        }
    }
}
