//! Identity and per-request state threaded through every operation.
//!
//! Nothing here is global: a [`ProcessIdentity`] is created once when a
//! worker starts, and a fresh [`RequestContext`] is built for every request
//! handled by that worker. Dropping the context discards all request-scoped
//! loop state.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ProcessEntry;

/// Protocol command being served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCode {
    /// Item listing / synchronization
    Sync,
    /// Keep-alive that reports folders with changes
    Ping,
    /// Folder hierarchy listing
    FolderSync,
    Other(u16),
}

impl CommandCode {
    /// Commands whose failures feed the hierarchy resync check
    pub fn is_sync_class(self) -> bool {
        matches!(self, CommandCode::Sync | CommandCode::Ping)
    }
}

/// Identity of one worker process, generated once per process lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    id: String,
}

impl ProcessIdentity {
    pub fn generate() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Who is asking, supplied by the request pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub device_id: String,
    pub user_id: String,
    pub command: CommandCode,
}

impl RequestIdentity {
    pub fn new(device_id: impl Into<String>, user_id: impl Into<String>, command: CommandCode) -> Self {
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            command,
        }
    }
}

/// Checkpoint named by the device in the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub token: String,
    pub counter: u64,
}

/// State owned by a single request's execution
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub identity: RequestIdentity,
    process: ProcessIdentity,
    /// Unix seconds
    started_at: i64,
    checkpoint: Option<Checkpoint>,
    /// Item that loop detection decided to withhold in this request
    pending_broken: Option<String>,
    entry: ProcessEntry,
}

impl RequestContext {
    /// Context for a request starting now
    pub fn new(process: &ProcessIdentity, identity: RequestIdentity) -> Self {
        Self::started_at(process, identity, Utc::now().timestamp())
    }

    /// Context for a request that started at `started_at` (unix seconds)
    pub fn started_at(process: &ProcessIdentity, identity: RequestIdentity, started_at: i64) -> Self {
        let entry = ProcessEntry {
            id: process.id().to_string(),
            started_at,
            command: identity.command,
            status: None,
        };
        Self {
            identity,
            process: process.clone(),
            started_at,
            checkpoint: None,
            pending_broken: None,
            entry,
        }
    }

    pub fn process(&self) -> &ProcessIdentity {
        &self.process
    }

    pub fn start_time(&self) -> i64 {
        self.started_at
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub(crate) fn set_checkpoint(&mut self, token: &str, counter: u64) {
        self.checkpoint = Some(Checkpoint {
            token: token.to_string(),
            counter,
        });
    }

    /// Item id confirmed as broken and awaiting its ignore decision
    pub fn pending_broken(&self) -> Option<&str> {
        self.pending_broken.as_deref()
    }

    pub(crate) fn set_pending_broken(&mut self, item_id: String) {
        self.pending_broken = Some(item_id);
    }

    pub(crate) fn take_pending_broken(&mut self) -> Option<String> {
        self.pending_broken.take()
    }

    /// This request's ledger entry as it will be persisted
    pub fn entry(&self) -> &ProcessEntry {
        &self.entry
    }

    pub(crate) fn entry_mut(&mut self) -> &mut ProcessEntry {
        &mut self.entry
    }
}
