//! Detection of devices bouncing between item sync and folder listing.
//!
//! Some clients answer a failing sync with a folder listing and then retry
//! the same failing sync. No per-folder counter sees this; only the ledger
//! of recent requests does.

use std::collections::BTreeMap;

use loopguard_config::{log_detect_debug, log_detect_info, DetectionConfig};

use crate::context::{CommandCode, RequestContext};
use crate::detector::LoopDetector;
use crate::model::ProcessEntry;

/// Decide from `entries` whether a full hierarchy resync should be forced.
///
/// Only entries started within the lookback window before `request_start`
/// are considered, excluding the requesting second itself.
pub fn hierarchy_resync_indicated(
    entries: &[ProcessEntry],
    own_process: &str,
    request_start: i64,
    settings: &DetectionConfig,
) -> bool {
    let lookback = request_start - settings.resync_lookback_secs;
    let mut failures: BTreeMap<&str, u32> = BTreeMap::new();
    let mut seen_folder_sync = false;

    for entry in entries {
        if entry.started_at <= lookback || entry.started_at >= request_start - 1 {
            continue;
        }

        if entry.command.is_sync_class() {
            for (key, code) in entry.status.iter().flatten() {
                log_detect_debug!("Seen failing sync", key = key.as_str(), code = *code);
                *failures.entry(key.as_str()).or_default() += 1;
            }
        }

        if entry.command != CommandCode::FolderSync || failures.is_empty() || entry.id == own_process {
            continue;
        }
        let Some(status) = entry.hierarchy_status() else {
            continue;
        };
        if status == settings.resync_requested_status {
            log_detect_debug!("Full hierarchy resync already requested, resetting failures");
            failures.clear();
        } else {
            log_detect_debug!("Seen folder listing after failing sync", status = status);
            seen_folder_sync = true;
        }
    }

    let recurring = failures.values().any(|&count| count > 1);
    if seen_folder_sync && recurring {
        log_detect_info!("Potential hierarchy loop, full hierarchy resync indicated");
        return true;
    }
    false
}

impl LoopDetector {
    /// Whether the device should be sent back to a full hierarchy resync
    pub fn should_force_full_resync(&self, ctx: &RequestContext) -> bool {
        let entries = self.ledger_entries(ctx);
        hierarchy_resync_indicated(
            &entries,
            ctx.process().id(),
            ctx.start_time(),
            self.settings(),
        )
    }
}
