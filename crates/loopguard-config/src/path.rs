//! Path helpers shared by the store and the CLI.

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the home directory.
///
/// Paths without a leading `~`, or systems without a home directory, are
/// returned unchanged.
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Resolve the configured state directory to an absolute-ish path.
pub fn resolve_state_dir(config: &crate::Config) -> PathBuf {
    expand_home(&config.store.state_dir)
}
