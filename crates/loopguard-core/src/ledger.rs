//! Bounded per-user record of recent worker activity.

use loopguard_config::{log_ledger_debug, log_store_warn};

use crate::context::RequestContext;
use crate::detector::LoopDetector;
use crate::model::{ProcessEntry, HIERARCHY_KEY};

/// Replace the entry of `entry.id` in place or append it, then evict the
/// oldest entries beyond `capacity`.
pub(crate) fn upsert(ledger: &mut Vec<ProcessEntry>, entry: &ProcessEntry, capacity: usize) {
    let mut replaced = false;
    ledger.retain_mut(|existing| {
        if existing.id != entry.id {
            return true;
        }
        if replaced {
            // duplicate left by an older writer
            return false;
        }
        *existing = entry.clone();
        replaced = true;
        true
    });
    if !replaced {
        ledger.push(entry.clone());
    }

    let capacity = capacity.max(1);
    if ledger.len() > capacity {
        let excess = ledger.len() - capacity;
        ledger.drain(..excess);
    }
}

impl LoopDetector {
    /// Record the request's entry as soon as the request starts
    pub fn begin_request(&self, ctx: &RequestContext) -> bool {
        self.record_activity(ctx)
    }

    /// Persist the request's current entry into the ledger
    pub fn record_activity(&self, ctx: &RequestContext) -> bool {
        let user_id = ctx.identity.user_id.as_str();
        let capacity = self.settings().ledger_capacity;
        let entry = ctx.entry();

        let result = self.update_document(&ctx.identity.device_id, |doc| {
            let ledger = &mut doc.user_mut(user_id).ledger;
            upsert(ledger, entry, capacity);
            (ledger.len(), true)
        });

        match result {
            Ok(len) => {
                log_ledger_debug!("Process entry recorded", process = entry.id.as_str(), entries = len);
                true
            }
            Err(e) => {
                let error = e.to_string();
                log_store_warn!("Could not record process entry", error = error.as_str());
                false
            }
        }
    }

    /// Note a failure raised while handling the request
    pub fn record_exception(&self, ctx: &mut RequestContext, kind: &str, code: i32) -> bool {
        ctx.entry_mut().record_status(kind, code);
        self.record_activity(ctx)
    }

    /// Note a status returned for a folder, or for the hierarchy when
    /// `folder_id` is `None`
    pub fn record_folder_status(&self, ctx: &mut RequestContext, folder_id: Option<&str>, code: i32) -> bool {
        ctx.entry_mut()
            .record_status(folder_id.unwrap_or(HIERARCHY_KEY), code);
        self.record_activity(ctx)
    }

    /// Ledger of the request's device and user, oldest first
    pub fn ledger_entries(&self, ctx: &RequestContext) -> Vec<ProcessEntry> {
        match self.read_document(&ctx.identity.device_id) {
            Ok(mut doc) => doc
                .users
                .remove(&ctx.identity.user_id)
                .map(|user| user.ledger)
                .unwrap_or_default(),
            Err(e) => {
                let error = e.to_string();
                log_store_warn!("Could not read process ledger", error = error.as_str());
                Vec::new()
            }
        }
    }
}
