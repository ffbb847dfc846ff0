//! Administrative access to stored loop detection data.

use loopguard_config::{log_admin_info, log_admin_warn};

use crate::detector::LoopDetector;
use crate::error::{LoopError, Result};
use crate::model::{LoopDocument, UserLoopData};

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl LoopDetector {
    /// Wipe loop detection data.
    ///
    /// Without arguments every device is cleared; with a device only that
    /// device; with both only that user on that device. A user without a
    /// device is rejected and nothing is changed.
    pub fn clear_data(&self, user_id: Option<&str>, device_id: Option<&str>) -> Result<()> {
        match (non_empty(user_id), non_empty(device_id)) {
            (Some(user), None) => {
                log_admin_warn!("Clearing data of a user on all devices is not supported", user = user);
                Err(LoopError::UserWithoutDevice {
                    user: user.to_string(),
                })
            }
            (None, None) => {
                let keys = self.store().keys()?;
                let empty = LoopDocument::default().encode()?;
                for key in &keys {
                    let mut guard = self.store().lock(key)?;
                    guard.write(&empty)?;
                }
                log_admin_info!("Cleared loop detection data of all devices", devices = keys.len());
                Ok(())
            }
            (None, Some(device)) => {
                self.update_document(device, |doc| {
                    *doc = LoopDocument::default();
                    ((), true)
                })?;
                log_admin_info!("Cleared loop detection data", device = device);
                Ok(())
            }
            (Some(user), Some(device)) => {
                let removed = self.update_document(device, |doc| {
                    let removed = doc.users.remove(user).is_some();
                    (removed, removed)
                })?;
                log_admin_info!(
                    "Cleared loop detection data",
                    device = device,
                    user = user,
                    found = removed
                );
                Ok(())
            }
        }
    }

    /// Stored data of one user on one device, failing on store errors
    pub fn load_cached_data(&self, user_id: &str, device_id: &str) -> Result<Option<UserLoopData>> {
        let mut doc = self.read_document(device_id)?;
        Ok(doc.users.remove(user_id))
    }

    /// Stored data of one user on one device, for diagnostics
    pub fn cached_data(&self, user_id: &str, device_id: &str) -> Option<UserLoopData> {
        match self.load_cached_data(user_id, device_id) {
            Ok(data) => data,
            Err(e) => {
                let error = e.to_string();
                log_admin_warn!("Could not read loop detection data", device = device_id, error = error.as_str());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loopguard_config::testing::TestEnvironment;
    use loopguard_store::{FileStore, SharedStateStore};

    use super::*;
    use crate::context::{CommandCode, ProcessIdentity, RequestContext, RequestIdentity};

    fn seed(detector: &LoopDetector, device: &str, user: &str) {
        let ctx = RequestContext::new(
            &ProcessIdentity::generate(),
            RequestIdentity::new(device, user, CommandCode::Sync),
        );
        assert!(detector.begin_request(&ctx));
    }

    fn detector(env: &TestEnvironment) -> LoopDetector {
        LoopDetector::new(
            Arc::new(FileStore::from_config(&env.config)),
            env.config.detection.clone(),
        )
    }

    #[test]
    fn test_user_without_device_is_rejected() {
        let env = TestEnvironment::new().unwrap();
        let detector = detector(&env);
        seed(&detector, "dev-1", "u");
        let before = detector.cached_data("u", "dev-1");

        let err = detector.clear_data(Some("u"), None).unwrap_err();
        assert!(matches!(err, LoopError::UserWithoutDevice { .. }));
        assert_eq!(detector.cached_data("u", "dev-1"), before);

        // empty device counts as absent
        assert!(detector.clear_data(Some("u"), Some("")).is_err());
    }

    #[test]
    fn test_load_cached_data_reports_lock_timeout() {
        let env = TestEnvironment::new().unwrap();
        let store = Arc::new(FileStore::from_config(&env.config));
        let detector = LoopDetector::new(store.clone(), env.config.detection.clone());
        seed(&detector, "dev-1", "alice");

        let _held = store.lock(&loopguard_store::device_key("dev-1")).unwrap();
        let err = detector.load_cached_data("alice", "dev-1").unwrap_err();
        assert!(matches!(
            err,
            LoopError::Store(loopguard_store::StoreError::LockTimeout { .. })
        ));
        assert!(detector.cached_data("alice", "dev-1").is_none());
    }

    #[test]
    fn test_clear_single_user() {
        let env = TestEnvironment::new().unwrap();
        let detector = detector(&env);
        seed(&detector, "dev-1", "alice");
        seed(&detector, "dev-1", "bob");

        detector.clear_data(Some("alice"), Some("dev-1")).unwrap();
        assert!(detector.cached_data("alice", "dev-1").is_none());
        assert!(detector.cached_data("bob", "dev-1").is_some());
    }

    #[test]
    fn test_clear_device_and_all() {
        let env = TestEnvironment::new().unwrap();
        let detector = detector(&env);
        seed(&detector, "dev-1", "alice");
        seed(&detector, "dev-2", "alice");
        seed(&detector, "dev-3", "alice");

        detector.clear_data(None, Some("dev-1")).unwrap();
        assert!(detector.cached_data("alice", "dev-1").is_none());
        assert!(detector.cached_data("alice", "dev-2").is_some());

        detector.clear_data(None, None).unwrap();
        assert!(detector.cached_data("alice", "dev-2").is_none());
        assert!(detector.cached_data("alice", "dev-3").is_none());
    }
}
