//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated state directory per test
//! - A `Config` pointing at it, with a short lock timeout
//!
//! # Usage
//!
//! ```ignore
//! use loopguard_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.state_dir is unique and removed when env is dropped
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with a private state directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated store directory
    pub state_dir: PathBuf,
    /// Config wired to `state_dir`
    pub config: Config,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let state_dir = temp_dir.path().join("state");
        std::fs::create_dir_all(&state_dir)?;

        let mut config = Config::default();
        config.store.state_dir = state_dir.clone();
        // Contended-lock tests should not wait the production timeout.
        config.store.lock_timeout_ms = 200;
        config.store.lock_poll_ms = 10;

        Ok(Self {
            _temp_dir: temp_dir,
            state_dir,
            config,
            test_id,
        })
    }

    /// Write a config file into the environment and return its path
    pub fn write_config(&self, contents: &str) -> anyhow::Result<PathBuf> {
        let path = self.state_dir.join("config.toml");
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// Environment variables that point a spawned CLI at this environment
    pub fn cli_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "LOOPGUARD_STATE_DIR".to_string(),
                self.state_dir.to_string_lossy().into_owned(),
            ),
            (
                "LOOPGUARD_LOCK_TIMEOUT_MS".to_string(),
                self.config.store.lock_timeout_ms.to_string(),
            ),
        ]
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
