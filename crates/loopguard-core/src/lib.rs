//! # loopguard-core
//!
//! Detects devices that keep re-requesting the same sync checkpoint and
//! isolates the item that makes them fail.
//!
//! Every request is served by an arbitrary worker with no memory of earlier
//! requests. All history lives in one document per device inside a
//! [`SharedStateStore`](loopguard_store::SharedStateStore), read and written
//! under that device's exclusive lock.
//!
//! ## Request flow
//!
//! ```ignore
//! let process = ProcessIdentity::generate(); // once per worker
//! let detector = LoopDetector::from_config(&loopguard_config::config());
//!
//! let mut ctx = RequestContext::new(&process, identity);
//! detector.begin_request(&ctx);
//! let looping = detector.detect(&mut ctx, &request);
//! for item in items {
//!     if detector.ignore_next(&mut ctx, true, Some(item.id()), Some(folder)) {
//!         continue; // withheld
//!     }
//!     // ...
//! }
//! detector.record_activity(&ctx);
//! ```
//!
//! Lock failures never surface on the request path: operations fall back to
//! "no loop", empty lists or `false`.

pub mod admin;
pub mod advisor;
pub mod context;
pub mod detector;
pub mod error;
pub mod ledger;
pub mod model;
pub mod quarantine;
pub mod telemetry;

pub use advisor::hierarchy_resync_indicated;
pub use context::{Checkpoint, CommandCode, ProcessIdentity, RequestContext, RequestIdentity};
pub use detector::{LoopDetector, SyncRequest, INITIAL_COUNTER};
pub use error::{LoopError, Result};
pub use model::{BrokenRecord, FolderLoopState, LoopDocument, ProcessEntry, UserLoopData, HIERARCHY_KEY};
pub use telemetry::{RecordingSink, TelemetrySink, TracingSink};
