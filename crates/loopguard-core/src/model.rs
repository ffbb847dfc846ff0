//! Persisted loop detection document.
//!
//! One [`LoopDocument`] exists per device. Every nested level is created on
//! first access with empty defaults, so a missing or partially written
//! document heals itself instead of failing the request.

use std::collections::BTreeMap;

use loopguard_config::log_store_warn;
use serde::{Deserialize, Serialize};

use crate::context::CommandCode;
use crate::error::Result;

/// Status map key used for folder-listing results
pub const HIERARCHY_KEY: &str = "hierarchy";

/// Everything recorded for one device, keyed by user id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDocument {
    pub users: BTreeMap<String, UserLoopData>,
}

impl LoopDocument {
    /// Decode a stored document.
    ///
    /// Undecodable bytes are logged and replaced by an empty document.
    pub fn decode(bytes: Option<&[u8]>) -> Self {
        let Some(bytes) = bytes else {
            return Self::default();
        };
        if bytes.is_empty() {
            return Self::default();
        }
        match serde_json::from_slice(bytes) {
            Ok(doc) => doc,
            Err(e) => {
                let error = e.to_string();
                log_store_warn!("Discarding undecodable loop document", error = error.as_str());
                Self::default()
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Get or create the data of one user
    pub fn user_mut(&mut self, user_id: &str) -> &mut UserLoopData {
        self.users.entry(user_id.to_string()).or_default()
    }

    pub fn user(&self, user_id: &str) -> Option<&UserLoopData> {
        self.users.get(user_id)
    }
}

/// Loop detection data of one user on one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserLoopData {
    /// Checkpoint state machine per folder
    pub folders: BTreeMap<String, FolderLoopState>,
    /// Most recently updated process entries, oldest first
    pub ledger: Vec<ProcessEntry>,
    /// Withheld items per folder, keyed by item id
    pub broken: BTreeMap<String, BTreeMap<String, BrokenRecord>>,
}

impl UserLoopData {
    /// Get or create the withheld-item map of a folder
    pub fn broken_mut(&mut self, folder_id: &str) -> &mut BTreeMap<String, BrokenRecord> {
        self.broken.entry(folder_id.to_string()).or_default()
    }

    /// Drop a folder's withheld-item map once it is empty
    pub fn prune_broken(&mut self, folder_id: &str) {
        if self.broken.get(folder_id).is_some_and(BTreeMap::is_empty) {
            self.broken.remove(folder_id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.ledger.is_empty() && self.broken.is_empty()
    }
}

/// Last observed checkpoint of a folder plus loop resolution progress.
///
/// `loop_count`, `max_count`, `ignored_id` and `potential_id` are only
/// present while a loop is being resolved and are always cleared together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderLoopState {
    pub content_type: String,
    pub token: String,
    pub counter: u64,
    pub queued: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub potential_id: Option<String>,
}

impl FolderLoopState {
    /// State for a folder seen for the first time.
    ///
    /// The state machine treats the request that created it as normal
    /// progress, whatever its counter.
    pub fn first_seen(content_type: &str, token: &str, counter: u64, queued: u64) -> Self {
        Self {
            content_type: content_type.to_string(),
            token: token.to_string(),
            counter,
            queued,
            loop_count: None,
            max_count: None,
            ignored_id: None,
            potential_id: None,
        }
    }

    pub fn in_loop(&self) -> bool {
        self.loop_count.is_some()
    }

    pub fn clear_loop(&mut self) {
        self.loop_count = None;
        self.max_count = None;
        self.ignored_id = None;
        self.potential_id = None;
    }
}

/// Activity summary of one worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub id: String,
    /// Unix seconds
    pub started_at: i64,
    pub command: CommandCode,
    /// Exception kind, folder id or [`HIERARCHY_KEY`] to status code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BTreeMap<String, i32>>,
}

impl ProcessEntry {
    pub fn record_status(&mut self, key: &str, code: i32) {
        self.status
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), code);
    }

    pub fn hierarchy_status(&self) -> Option<i32> {
        self.status.as_ref()?.get(HIERARCHY_KEY).copied()
    }
}

/// Checkpoint observed when an item was withheld from a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenRecord {
    pub token: String,
    pub counter: u64,
}
