//! Tracking of items withheld from replies.
//!
//! A withheld item is remembered together with the checkpoint of the reply
//! it was left out of. Once the device presents a later counter on the same
//! token, the batch was accepted and the item counts as recovered. A new
//! token makes the record obsolete.

use loopguard_config::{log_quarantine_debug, log_store_warn};

use crate::context::{CommandCode, RequestContext};
use crate::detector::LoopDetector;
use crate::telemetry::BROKEN_ITEM_IGNORED;

impl LoopDetector {
    /// Remember that `item_id` was left out of the current reply.
    ///
    /// Returns `false` without touching the store when no checkpoint was
    /// recorded for this request or the folder id is empty.
    pub fn record_withheld(&self, ctx: &RequestContext, folder_id: &str, item_id: &str) -> bool {
        let Some(checkpoint) = ctx.checkpoint().cloned() else {
            return false;
        };
        if folder_id.is_empty() {
            return false;
        }

        let user_id = ctx.identity.user_id.as_str();
        let result = self.update_document(&ctx.identity.device_id, |doc| {
            doc.user_mut(user_id).broken_mut(folder_id).insert(
                item_id.to_string(),
                crate::model::BrokenRecord {
                    token: checkpoint.token,
                    counter: checkpoint.counter,
                },
            );
            ((), true)
        });

        match result {
            Ok(()) => {
                log_quarantine_debug!("Tracking withheld item", folder = folder_id, item = item_id);
                true
            }
            Err(e) => {
                let error = e.to_string();
                log_store_warn!("Could not track withheld item", folder = folder_id, error = error.as_str());
                false
            }
        }
    }

    /// Items of `folder_id` the device has accepted since they were withheld.
    ///
    /// Recovered and obsolete records are removed; the folder's record map
    /// disappears once empty.
    pub fn recover_accepted(&self, ctx: &RequestContext, folder_id: &str) -> Vec<String> {
        let Some(checkpoint) = ctx.checkpoint().cloned() else {
            return Vec::new();
        };
        if folder_id.is_empty() {
            return Vec::new();
        }

        let user_id = ctx.identity.user_id.as_str();
        let result = self.update_document(&ctx.identity.device_id, |doc| {
            let user = doc.user_mut(user_id);
            let Some(records) = user.broken.get_mut(folder_id).filter(|r| !r.is_empty()) else {
                return (Vec::new(), false);
            };

            let mut recovered = Vec::new();
            records.retain(|item_id, record| {
                if record.token != checkpoint.token {
                    log_quarantine_debug!(
                        "Withheld item record is obsolete",
                        folder = folder_id,
                        item = item_id.as_str(),
                        token = record.token.as_str()
                    );
                    return false;
                }
                if record.counter < checkpoint.counter {
                    log_quarantine_debug!(
                        "Withheld item was synchronized",
                        folder = folder_id,
                        item = item_id.as_str()
                    );
                    recovered.push(item_id.clone());
                    return false;
                }
                true
            });

            user.prune_broken(folder_id);
            (recovered, true)
        });

        result.unwrap_or_else(|e| {
            let error = e.to_string();
            log_store_warn!("Could not check withheld items", folder = folder_id, error = error.as_str());
            Vec::new()
        })
    }

    /// Decide whether the next exported item must be left out.
    ///
    /// With `mark_as_ignored == false` this only reports whether a suspect
    /// is pending for this sync request and changes nothing. Otherwise the
    /// candidate is either confirmed as the broken item (returns `true`, the
    /// caller drops it) or recorded as the current best guess.
    pub fn ignore_next(
        &self,
        ctx: &mut RequestContext,
        mark_as_ignored: bool,
        item_id: Option<&str>,
        folder_id: Option<&str>,
    ) -> bool {
        let potential =
            ctx.identity.command == CommandCode::Sync && ctx.pending_broken().is_some();
        let confirmed = matches!(
            (item_id, ctx.pending_broken()),
            (Some(item), Some(pending)) if item == pending
        );

        if !mark_as_ignored {
            return potential;
        }

        let Some(folder_id) = folder_id else {
            // Nothing to attach the decision to.
            if confirmed {
                ctx.take_pending_broken();
                self.announce(BROKEN_ITEM_IGNORED, true);
            }
            return confirmed;
        };

        let user_id = ctx.identity.user_id.clone();
        let result = self.update_document(&ctx.identity.device_id, |doc| {
            let user = doc.user_mut(&user_id);

            if confirmed {
                let item = item_id.unwrap_or_default();
                if let Some(state) = user.folders.get_mut(folder_id) {
                    state.ignored_id = Some(item.to_string());
                }
                if let Some(records) = user.broken.get_mut(folder_id) {
                    if records.remove(item).is_some() {
                        log_quarantine_debug!(
                            "Previously withheld item is still broken, no longer tracked",
                            folder = folder_id,
                            item = item
                        );
                    }
                }
                user.prune_broken(folder_id);
                return ((), true);
            }

            match user.folders.get_mut(folder_id) {
                Some(state) if state.in_loop() => {
                    state.potential_id = item_id.map(str::to_string);
                    if potential {
                        // The expected suspect was not exported; it cannot count
                        // towards the threshold.
                        log_quarantine_debug!(
                            "Suspected item was not the broken one, resetting loop count",
                            folder = folder_id
                        );
                        state.loop_count = Some(1);
                    }
                    log_quarantine_debug!(
                        "Loop mode, potential broken item",
                        folder = folder_id,
                        item = tracing::field::debug(&state.potential_id)
                    );
                    ((), true)
                }
                _ => ((), false),
            }
        });

        match result {
            Ok(()) => {
                if confirmed {
                    ctx.take_pending_broken();
                    self.announce(BROKEN_ITEM_IGNORED, true);
                }
                confirmed
            }
            Err(e) => {
                let error = e.to_string();
                log_store_warn!("Could not record ignore decision", folder = folder_id, error = error.as_str());
                false
            }
        }
    }
}
