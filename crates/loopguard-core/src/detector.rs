//! Per-folder checkpoint state machine.
//!
//! Cases, as reported in debug logs:
//!
//! ```text
//! 1.   counter advanced, or folder seen for the first time
//! 1.1    no loop data                                  -> normal progress
//! 1.2.1  below max_count, no item ignored yet          -> stay in loop mode
//! 1.2.2  max_count reached or an item was ignored      -> loop resolved
//! 2.   same counter, nothing queued before, now queued -> record queue
//! 3.   same counter, queued before                     -> loop
//! 3.1    first repeat                                  -> enter loop mode
//! 3.2    queue drained                                 -> loop resolved
//! 3.3    still repeating                               -> loop_count += 1
//! 3.3.1  loop_count >= threshold with a suspect        -> confirm suspect
//! ```

use std::sync::Arc;

use loopguard_config::{log_detect_debug, log_store_warn, Config, DetectionConfig};
use loopguard_store::{device_key, FileStore, SharedStateStore};

use crate::context::RequestContext;
use crate::error::Result;
use crate::model::{FolderLoopState, LoopDocument};
use crate::telemetry::{TelemetrySink, TracingSink, INCOMING_LOOP, LOOP_DETECTED};

/// Counter value of the first checkpoint of a new token
pub const INITIAL_COUNTER: u64 = 1;

/// Everything `detect` needs to know about the folder being synced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest<'a> {
    pub folder_id: &'a str,
    pub content_type: &'a str,
    pub token: &'a str,
    pub counter: u64,
    /// Maximum number of items this reply may contain
    pub item_cap: u64,
    /// Changes the exporter found for this folder
    pub queued: u64,
}

/// Result of feeding one request into a folder's state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Advance {
    pub state: FolderLoopState,
    pub looping: bool,
    pub confirmed: Option<String>,
}

/// Entry point for all loop detection operations of a worker.
///
/// Holds no per-request state; share one instance across requests and pass
/// each request's [`RequestContext`] to the operations.
pub struct LoopDetector {
    store: Arc<dyn SharedStateStore>,
    sink: Arc<dyn TelemetrySink>,
    settings: DetectionConfig,
}

impl LoopDetector {
    pub fn new(store: Arc<dyn SharedStateStore>, settings: DetectionConfig) -> Self {
        Self {
            store,
            sink: Arc::new(TracingSink),
            settings,
        }
    }

    /// Detector backed by the file store described in `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(FileStore::from_config(config)),
            config.detection.clone(),
        )
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn settings(&self) -> &DetectionConfig {
        &self.settings
    }

    pub(crate) fn store(&self) -> &dyn SharedStateStore {
        self.store.as_ref()
    }

    pub(crate) fn announce(&self, message: &str, is_error: bool) {
        if let Err(e) = self.sink.announce(message, is_error) {
            let error = e.to_string();
            tracing::warn!(error = error.as_str(), "telemetry announcement failed");
        }
    }

    /// Read-modify-write a device document inside its critical section.
    ///
    /// `f` returns its result and whether the document must be written back.
    pub(crate) fn update_document<T>(
        &self,
        device_id: &str,
        f: impl FnOnce(&mut LoopDocument) -> (T, bool),
    ) -> Result<T> {
        let mut guard = self.store.lock(&device_key(device_id))?;
        let bytes = guard.read()?;
        let mut doc = LoopDocument::decode(bytes.as_deref());
        let (value, dirty) = f(&mut doc);
        if dirty {
            guard.write(&doc.encode()?)?;
        }
        Ok(value)
    }

    /// Snapshot of a device document, read under its lock
    pub(crate) fn read_document(&self, device_id: &str) -> Result<LoopDocument> {
        self.update_document(device_id, |doc| (std::mem::take(doc), false))
    }

    /// Classify a sync request as normal or looping.
    ///
    /// Returns `true` when the reply should be built in loop mode. Always
    /// records the request's checkpoint in `ctx` for the quarantine calls
    /// that follow in the same request; may also set the item to withhold.
    pub fn detect(&self, ctx: &mut RequestContext, request: &SyncRequest<'_>) -> bool {
        ctx.set_checkpoint(request.token, request.counter);

        // The device repeats a request we have not answered with any items.
        if request.item_cap == 0 && request.queued > 0 {
            self.announce(INCOMING_LOOP, true);
            return true;
        }

        let user_id = ctx.identity.user_id.clone();
        let threshold = self.settings.confirm_threshold;
        let result = self.update_document(&ctx.identity.device_id, |doc| {
            let user = doc.user_mut(&user_id);
            let current = user.folders.remove(request.folder_id);
            let advance = advance(current, request, threshold);
            user.folders
                .insert(request.folder_id.to_string(), advance.state.clone());
            (advance, true)
        });

        let advance = match result {
            Ok(advance) => advance,
            Err(e) => {
                let error = e.to_string();
                log_store_warn!(
                    "Loop detection skipped",
                    folder = request.folder_id,
                    error = error.as_str()
                );
                return false;
            }
        };

        if advance.state.in_loop() {
            let state = &advance.state;
            log_detect_debug!(
                "Loop data",
                folder = request.folder_id,
                loop_count = state.loop_count.unwrap_or_default(),
                max_count = state.max_count.unwrap_or_default(),
                queued = state.queued,
                ignored = tracing::field::debug(&state.ignored_id)
            );
        }

        if let Some(item_id) = advance.confirmed {
            ctx.set_pending_broken(item_id);
        }

        if advance.looping && ctx.pending_broken().is_none() {
            self.announce(LOOP_DETECTED, true);
        }

        advance.looping
    }
}

/// Feed one request into a folder's state machine.
pub(crate) fn advance(
    current: Option<FolderLoopState>,
    request: &SyncRequest<'_>,
    confirm_threshold: u32,
) -> Advance {
    let folder = request.folder_id;
    let mut looping = false;
    let mut confirmed = None;
    let first_seen = current.is_none();
    let mut state = current.unwrap_or_else(|| {
        FolderLoopState::first_seen(
            request.content_type,
            request.token,
            request.counter,
            request.queued,
        )
    });

    if state.content_type == request.content_type && state.token != request.token {
        log_detect_debug!("Checkpoint token changed", folder = folder);

        // Some devices start a new token after broken items were sent several
        // times; decided on the previous checkpoint before it is replaced.
        let stuck_before_reset = state.queued > 0
            && (state
                .max_count
                .is_some_and(|max| state.counter.saturating_add(1) < max)
                || request.counter == INITIAL_COUNTER);

        if stuck_before_reset {
            log_detect_debug!("Token changed while items were pending, forcing loop mode", folder = folder);
            looping = true;
            state.queued = request.queued;
        } else {
            state.queued = 0;
        }

        state.token = request.token.to_string();
        state.counter = request.counter;
        state.clear_loop();
    }

    if state.token == request.token && state.content_type == request.content_type {
        if first_seen || state.counter < request.counter {
            state.counter = request.counter;
            state.queued = request.queued;

            if let Some(max_count) = state.max_count {
                if state.ignored_id.is_none() && request.counter < max_count {
                    log_detect_debug!("case 1.2.1 detected", folder = folder);
                    looping = true;
                } else {
                    log_detect_debug!("case 1.2.2 detected", folder = folder);
                    state.clear_loop();
                }
            }
        } else if state.counter == request.counter && state.queued == 0 && request.queued > 0 {
            state.queued = request.queued;
        } else if state.counter == request.counter && state.queued > 0 {
            match state.loop_count {
                None => {
                    log_detect_debug!("case 3.1 detected, entering loop mode", folder = folder);
                    state.loop_count = Some(1);
                    state.max_count = Some(
                        request
                            .counter
                            .saturating_add(request.item_cap.min(request.queued)),
                    );
                    looping = true;
                }
                Some(_) if request.queued == 0 => {
                    log_detect_debug!("case 3.2 detected, changes gone", folder = folder);
                    state.queued = 0;
                    state.clear_loop();
                }
                Some(count) => {
                    let count = count + 1;
                    log_detect_debug!("case 3.3 detected, still looping", folder = folder, loop_count = count);
                    state.loop_count = Some(count);
                    if count >= confirm_threshold {
                        if let Some(potential) = &state.potential_id {
                            log_detect_debug!(
                                "case 3.3.1 detected, broken item should be next",
                                folder = folder,
                                item = potential.as_str()
                            );
                            confirmed = Some(potential.clone());
                        }
                    }
                    state.max_count = Some(request.counter.saturating_add(request.queued));
                    looping = true;
                }
            }
        }
    }

    Advance {
        state,
        looping,
        confirmed,
    }
}
