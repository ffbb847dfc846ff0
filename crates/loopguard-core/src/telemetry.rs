//! Fire-and-forget announcements about loop handling.

use std::sync::Mutex;

pub const INCOMING_LOOP: &str = "Incoming loop!";
pub const LOOP_DETECTED: &str = "Loop detection";
pub const BROKEN_ITEM_IGNORED: &str = "Broken item ignored";

/// Receiver of loop detection announcements.
///
/// Errors are logged by the caller and never change the outcome of an
/// operation.
pub trait TelemetrySink: Send + Sync {
    fn announce(&self, message: &str, is_error: bool) -> anyhow::Result<()>;
}

/// Sink that turns announcements into tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn announce(&self, message: &str, is_error: bool) -> anyhow::Result<()> {
        if is_error {
            tracing::warn!(announcement = message, "loop detection announcement");
        } else {
            tracing::info!(announcement = message, "loop detection announcement");
        }
        Ok(())
    }
}

/// Sink that keeps every announcement in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<(String, bool)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announcements received so far, oldest first
    pub fn messages(&self) -> Vec<(String, bool)> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contains(&self, message: &str) -> bool {
        self.messages().iter().any(|(m, _)| m == message)
    }
}

impl TelemetrySink for RecordingSink {
    fn announce(&self, message: &str, is_error: bool) -> anyhow::Result<()> {
        self.messages
            .lock()
            .map_err(|_| anyhow::anyhow!("recording sink poisoned"))?
            .push((message.to_string(), is_error));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.announce(LOOP_DETECTED, true).unwrap();
        sink.announce(BROKEN_ITEM_IGNORED, true).unwrap();
        assert_eq!(
            sink.messages(),
            vec![(LOOP_DETECTED.to_string(), true), (BROKEN_ITEM_IGNORED.to_string(), true)]
        );
        assert!(sink.contains(LOOP_DETECTED));
        assert!(!sink.contains(INCOMING_LOOP));
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        assert!(TracingSink.announce(INCOMING_LOOP, true).is_ok());
    }
}
