//! Multi-request scenarios against a real file store.
//!
//! Every request gets a fresh `RequestContext`, as it would when served by a
//! different worker.

use std::sync::Arc;

use loopguard_config::testing::TestEnvironment;
use loopguard_core::telemetry::{BROKEN_ITEM_IGNORED, INCOMING_LOOP, LOOP_DETECTED};
use loopguard_core::{
    CommandCode, LoopDetector, ProcessIdentity, RecordingSink, RequestContext, RequestIdentity,
    SyncRequest,
};
use loopguard_store::{device_key, FileStore, SharedStateStore};

const DEVICE: &str = "androidc1234";
const USER: &str = "alice";
const FOLDER: &str = "inbox";

struct Harness {
    _env: TestEnvironment,
    store: Arc<FileStore>,
    detector: LoopDetector,
    sink: Arc<RecordingSink>,
    process: ProcessIdentity,
}

impl Harness {
    fn new() -> Self {
        let env = TestEnvironment::new().unwrap();
        let store = Arc::new(FileStore::from_config(&env.config));
        let sink = Arc::new(RecordingSink::new());
        let detector = LoopDetector::new(store.clone(), env.config.detection.clone())
            .with_sink(sink.clone());
        Self {
            _env: env,
            store,
            detector,
            sink,
            process: ProcessIdentity::generate(),
        }
    }

    fn request(&self, command: CommandCode) -> RequestContext {
        RequestContext::new(&self.process, RequestIdentity::new(DEVICE, USER, command))
    }

    /// One sync request; returns the context for follow-up calls
    fn sync(&self, token: &str, counter: u64, item_cap: u64, queued: u64) -> (RequestContext, bool) {
        let mut ctx = self.request(CommandCode::Sync);
        let looping = self.detector.detect(
            &mut ctx,
            &SyncRequest {
                folder_id: FOLDER,
                content_type: "Email",
                token,
                counter,
                item_cap,
                queued,
            },
        );
        (ctx, looping)
    }

    fn folder(&self) -> loopguard_core::FolderLoopState {
        self.detector.cached_data(USER, DEVICE).unwrap().folders[FOLDER].clone()
    }
}

#[test]
fn test_end_to_end_loop_resolution() {
    let h = Harness::new();

    let (_, looping) = h.sync("A", 1, 5, 5);
    assert!(!looping);
    let state = h.folder();
    assert_eq!((state.token.as_str(), state.counter, state.queued), ("A", 1, 5));

    let (mut ctx, looping) = h.sync("A", 1, 5, 5);
    assert!(looping);
    assert_eq!(h.folder().loop_count, Some(1));
    assert_eq!(h.folder().max_count, Some(6));

    // exporter names its first item as the current suspect
    assert!(!h.detector.ignore_next(&mut ctx, true, Some("item-7"), Some(FOLDER)));
    assert_eq!(h.folder().potential_id.as_deref(), Some("item-7"));

    let (_, looping) = h.sync("A", 1, 5, 5);
    assert!(looping);
    assert_eq!(h.folder().loop_count, Some(2));

    let (ctx, looping) = h.sync("A", 1, 5, 5);
    assert!(looping);
    assert_eq!(h.folder().loop_count, Some(3));
    assert_eq!(ctx.pending_broken(), Some("item-7"));

    let (ctx, looping) = h.sync("A", 2, 5, 4);
    assert!(looping, "below max_count stays in loop mode");
    assert!(ctx.pending_broken().is_none());

    let (_, looping) = h.sync("A", 6, 5, 0);
    assert!(!looping);
    let state = h.folder();
    assert!(state.loop_count.is_none());
    assert!(state.max_count.is_none());
    assert!(state.potential_id.is_none());
    assert!(state.ignored_id.is_none());

    assert!(h.sink.contains(LOOP_DETECTED));
}

/// Drive the folder to a confirmed suspect; returns the confirming request
fn confirm_suspect(h: &Harness, item: &str) -> RequestContext {
    h.sync("A", 1, 5, 5);
    h.sync("A", 1, 5, 5);
    let (mut ctx, _) = h.sync("A", 1, 5, 5);
    assert!(!h.detector.ignore_next(&mut ctx, true, Some(item), Some(FOLDER)));
    let (ctx, looping) = h.sync("A", 1, 5, 5);
    assert!(looping);
    assert_eq!(ctx.pending_broken(), Some(item));
    ctx
}

#[test]
fn test_confirmed_item_is_withheld_then_recovered() {
    let h = Harness::new();
    let mut ctx = confirm_suspect(&h, "item-7");

    assert!(h.detector.ignore_next(&mut ctx, false, Some("item-7"), Some(FOLDER)));
    assert!(h.detector.ignore_next(&mut ctx, true, Some("item-7"), Some(FOLDER)));
    assert!(h.detector.record_withheld(&ctx, FOLDER, "item-7"));
    assert_eq!(h.folder().ignored_id.as_deref(), Some("item-7"));
    assert!(h.sink.contains(BROKEN_ITEM_IGNORED));

    let (ctx, looping) = h.sync("A", 2, 5, 4);
    assert!(!looping, "withholding the broken item resolves the loop");
    assert!(!h.folder().in_loop());
    assert_eq!(h.detector.recover_accepted(&ctx, FOLDER), vec!["item-7".to_string()]);
}

#[test]
fn test_wrong_suspect_resets_loop_count() {
    let h = Harness::new();
    let mut ctx = confirm_suspect(&h, "item-7");

    // export produced another item while the suspect was pending
    assert!(!h.detector.ignore_next(&mut ctx, true, Some("item-1"), Some(FOLDER)));
    let state = h.folder();
    assert_eq!(state.loop_count, Some(1));
    assert_eq!(state.potential_id.as_deref(), Some("item-1"));
    assert!(state.ignored_id.is_none());
    assert_eq!(ctx.pending_broken(), Some("item-7"));
}

#[test]
fn test_peek_never_mutates() {
    let h = Harness::new();
    h.sync("A", 3, 10, 2);
    let (mut ctx, _) = h.sync("A", 3, 10, 2);
    let before = h.detector.cached_data(USER, DEVICE);

    for item in [None, Some("item-1"), Some("item-2")] {
        h.detector.ignore_next(&mut ctx, false, item, Some(FOLDER));
    }
    assert_eq!(h.detector.cached_data(USER, DEVICE), before);
}

#[test]
fn test_recover_accepted_drains_records() {
    let h = Harness::new();
    let (ctx, _) = h.sync("A", 4, 10, 1);
    assert!(h.detector.record_withheld(&ctx, FOLDER, "item-1"));
    assert!(h.detector.record_withheld(&ctx, FOLDER, "item-2"));

    let (ctx, _) = h.sync("A", 5, 10, 0);
    let mut recovered = h.detector.recover_accepted(&ctx, FOLDER);
    recovered.sort();
    assert_eq!(recovered, vec!["item-1".to_string(), "item-2".to_string()]);
    assert!(h.detector.recover_accepted(&ctx, FOLDER).is_empty());
}

#[test]
fn test_incoming_loop_short_circuit() {
    let h = Harness::new();
    let (ctx, looping) = h.sync("A", 1, 0, 3);
    assert!(looping);
    assert!(h.sink.contains(INCOMING_LOOP));
    // nothing persisted, but the checkpoint is known to the request
    assert!(h.detector.cached_data(USER, DEVICE).is_none());
    assert_eq!(ctx.checkpoint().map(|c| c.counter), Some(1));
}

#[test]
fn test_held_lock_degrades_to_defaults() {
    let h = Harness::new();
    let (ctx, _) = h.sync("A", 1, 5, 5);
    assert!(h.detector.record_withheld(&ctx, FOLDER, "item-1"));
    let before = h.detector.cached_data(USER, DEVICE);

    let guard = h.store.lock(&device_key(DEVICE)).unwrap();

    let (mut ctx, looping) = h.sync("A", 1, 5, 5);
    assert!(!looping, "missed detection is preferred over stalling");
    assert!(!h.detector.record_withheld(&ctx, FOLDER, "item-2"));
    assert!(h.detector.recover_accepted(&ctx, FOLDER).is_empty());
    assert!(!h.detector.ignore_next(&mut ctx, true, Some("item-2"), Some(FOLDER)));
    assert!(!h.detector.record_activity(&ctx));
    assert!(!h.detector.should_force_full_resync(&ctx));
    assert!(h.detector.clear_data(None, Some(DEVICE)).is_err());

    drop(guard);
    assert_eq!(h.detector.cached_data(USER, DEVICE), before);
}

#[test]
fn test_ledger_keeps_most_recent_processes() {
    let h = Harness::new();
    for i in 0..12 {
        let process = ProcessIdentity::from_id(format!("worker-{i}"));
        let ctx = RequestContext::new(&process, RequestIdentity::new(DEVICE, USER, CommandCode::Ping));
        assert!(h.detector.begin_request(&ctx));
        // updating the same process does not add an entry
        assert!(h.detector.record_activity(&ctx));
    }

    let ctx = h.request(CommandCode::Sync);
    let entries = h.detector.ledger_entries(&ctx);
    assert_eq!(entries.len(), 10);
    assert_eq!(entries.first().map(|e| e.id.as_str()), Some("worker-2"));
    assert_eq!(entries.last().map(|e| e.id.as_str()), Some("worker-11"));
}

#[test]
fn test_hierarchy_ping_pong_through_ledger() {
    let h = Harness::new();
    let now = chrono::Utc::now().timestamp();
    let record = |id: &str, age: i64, command: CommandCode, folder: Option<&str>, code: i32| {
        let process = ProcessIdentity::from_id(id);
        let mut ctx = RequestContext::started_at(
            &process,
            RequestIdentity::new(DEVICE, USER, command),
            now - age,
        );
        assert!(h.detector.record_folder_status(&mut ctx, folder, code));
    };

    record("w1", 90, CommandCode::Sync, Some(FOLDER), 12);
    record("w2", 60, CommandCode::FolderSync, None, 1);
    record("w3", 30, CommandCode::Sync, Some(FOLDER), 12);

    let ctx = RequestContext::started_at(
        &ProcessIdentity::from_id("w4"),
        RequestIdentity::new(DEVICE, USER, CommandCode::Sync),
        now,
    );
    assert!(h.detector.should_force_full_resync(&ctx));

    // once a resync was requested, the same history no longer qualifies
    record("w2", 60, CommandCode::FolderSync, None, 9);
    assert!(!h.detector.should_force_full_resync(&ctx));
}

#[test]
fn test_clear_data_user_without_device_rejected() {
    let h = Harness::new();
    h.sync("A", 1, 5, 5);
    let before = h.detector.cached_data(USER, DEVICE);
    assert!(h.detector.clear_data(Some(USER), None).is_err());
    assert_eq!(h.detector.cached_data(USER, DEVICE), before);
}
