//! Session aggregation
//!
//! The aggregator is the only owner of report entries. Replay tasks hand
//! entries over through a `RecordSender`; totals are derived from the
//! entries when the report is finalized.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use canreplay_core::{Report, ReportContext, ReportEntry};

/// Accumulates report entries in arrival order
#[derive(Debug, Default)]
pub struct SessionAggregator {
    entries: Vec<ReportEntry>,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn finalize(self, context: ReportContext) -> Report {
        Report::new(self.entries, context)
    }

    /// Run an aggregator as a task fed by a channel
    ///
    /// The task finishes once every `RecordSender` clone has been dropped.
    pub fn spawn() -> (RecordSender, AggregatorHandle) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReportEntry>();
        let task = tokio::spawn(async move {
            let mut aggregator = SessionAggregator::new();
            while let Some(entry) = rx.recv().await {
                aggregator.record(entry);
            }
            debug!(entries = aggregator.len(), "Aggregator drained");
            aggregator
        });
        (RecordSender { tx }, AggregatorHandle { task })
    }
}

/// Cloneable handle used by producers to submit entries
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::UnboundedSender<ReportEntry>,
}

impl RecordSender {
    pub fn record(&self, entry: ReportEntry) {
        if self.tx.send(entry).is_err() {
            warn!("Aggregator closed, dropping report entry");
        }
    }
}

/// Join handle of a spawned aggregator
#[derive(Debug)]
pub struct AggregatorHandle {
    task: JoinHandle<SessionAggregator>,
}

impl AggregatorHandle {
    /// Wait for all senders to drop and return the collected entries
    pub async fn finish(self) -> SessionAggregator {
        match self.task.await {
            Ok(aggregator) => aggregator,
            Err(e) => {
                error!(error = %e, "Aggregator task failed");
                SessionAggregator::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canreplay_core::{EntryOrigin, Frame, RunMode, RunOutcome};

    fn entry(channel: u32, origin: EntryOrigin) -> ReportEntry {
        let frame = Frame::new(0.0, channel, 0x7E8, vec![0x02, 0x7E, 0x00], false).unwrap();
        ReportEntry::from_frame(&frame, 0.0, origin)
    }

    #[tokio::test]
    async fn test_spawned_aggregator_collects_from_many_tasks() {
        let (sender, handle) = SessionAggregator::spawn();
        let mut producers = Vec::new();
        for channel in 0..4u32 {
            let sender = sender.clone();
            producers.push(tokio::spawn(async move {
                for _ in 0..25 {
                    sender.record(entry(channel, EntryOrigin::Sent));
                }
                sender.record(entry(channel, EntryOrigin::Response));
            }));
        }
        drop(sender);
        for p in producers {
            p.await.unwrap();
        }

        let aggregator = handle.finish().await;
        assert_eq!(aggregator.len(), 104);

        let report = aggregator.finalize(ReportContext {
            session_id: "s".to_string(),
            mode: RunMode::Replay,
            outcome: RunOutcome::Finished,
            duration_secs: 0.0,
            rejected_frames: 0,
            knowledge_base: None,
        });
        assert_eq!(report.totals.processed, 104);
        for channel in 0..4u32 {
            let totals = &report.totals.by_channel[&channel];
            assert_eq!(totals.sent, 25);
            assert_eq!(totals.received, 1);
        }
    }
}
