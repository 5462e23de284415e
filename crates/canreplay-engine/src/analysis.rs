//! Offline analysis: classify logged frames without touching a bus

use std::collections::HashSet;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::info;

use canreplay_core::{EntryOrigin, Frame, Report, ReportContext, RunMode, RunOutcome};
use canreplay_diag::is_diagnostic_id;

use crate::aggregator::SessionAggregator;
use crate::config::{AnalysisConfig, ConfigError};
use crate::inspect::FrameInspector;

/// Frame filters applied before classification
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    /// Keep only these IDs; empty keeps all
    pub id_filter: HashSet<u32>,
    pub diagnostic_ids_only: bool,
}

impl AnalysisOptions {
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            id_filter: config.id_set()?,
            diagnostic_ids_only: config.diagnostic_ids_only,
        })
    }

    pub fn accepts(&self, frame: &Frame) -> bool {
        if !self.id_filter.is_empty() && !self.id_filter.contains(&frame.arbitration_id) {
            return false;
        }
        !self.diagnostic_ids_only || is_diagnostic_id(frame.arbitration_id)
    }
}

/// Classify every accepted frame in log order
///
/// Cancellation is checked between frames; a cancelled run still returns
/// the entries recorded so far.
pub fn analyze(
    frames: impl IntoIterator<Item = Frame>,
    options: &AnalysisOptions,
    inspector: &FrameInspector,
    cancel: &CancellationToken,
) -> Report {
    let started = Instant::now();
    let mut aggregator = SessionAggregator::new();
    let mut skipped = 0usize;
    let mut outcome = RunOutcome::Completed;

    for frame in frames {
        if cancel.is_cancelled() {
            outcome = RunOutcome::Cancelled;
            break;
        }
        if !options.accepts(&frame) {
            skipped += 1;
            continue;
        }
        aggregator.record(inspector.inspect(&frame, frame.timestamp_sec, EntryOrigin::Logged));
    }

    let report = aggregator.finalize(ReportContext {
        session_id: uuid::Uuid::new_v4().to_string(),
        mode: RunMode::Analysis,
        outcome,
        duration_secs: started.elapsed().as_secs_f64(),
        rejected_frames: 0,
        knowledge_base: inspector.knowledge_base().map(|kb| kb.summary()),
    });
    info!(
        ?outcome,
        processed = report.totals.processed,
        skipped,
        dids = report.totals.dids,
        dtcs = report.totals.dtcs,
        security_access = report.totals.security_access,
        "Analysis complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use canreplay_core::FindingSource;
    use canreplay_diag::{KbEntry, KnowledgeBase};

    fn frames() -> Vec<Frame> {
        vec![
            Frame::new(0.00, 0, 0x7E0, vec![0x03, 0x22, 0xF1, 0x90, 0, 0, 0, 0], false).unwrap(),
            Frame::new(0.01, 0, 0x0C9, vec![0x03, 0x22, 0x12, 0x34], false).unwrap(),
            Frame::new(0.02, 0, 0x7E8, vec![0x10, 0x14, 0x62, 0xF1, 0x90, 0x57, 0x30, 0x4C], false)
                .unwrap(),
            Frame::new(0.03, 1, 0x7E0, vec![0x02, 0x27, 0x01], false).unwrap(),
        ]
    }

    #[test]
    fn test_heuristic_analysis() {
        let report = analyze(
            frames(),
            &AnalysisOptions::default(),
            &FrameInspector::new(None),
            &CancellationToken::new(),
        );
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.totals.processed, 4);
        // 0x22 on 0x0C9 counts too: the classifier does not look at IDs
        assert_eq!(report.totals.dids, 2);
        assert_eq!(report.totals.security_access, 1);
        assert!(report.knowledge_base.is_none());
        assert_eq!(report.entries[0].timestamp, 0.0);
        assert_eq!(report.totals.by_channel[&1].frames, 1);
    }

    #[test]
    fn test_diagnostic_gate_and_id_filter() {
        let options = AnalysisOptions {
            id_filter: HashSet::new(),
            diagnostic_ids_only: true,
        };
        let report = analyze(frames(), &options, &FrameInspector::new(None), &CancellationToken::new());
        assert_eq!(report.totals.processed, 3);

        let options = AnalysisOptions {
            id_filter: HashSet::from([0x7E8]),
            diagnostic_ids_only: false,
        };
        let report = analyze(frames(), &options, &FrameInspector::new(None), &CancellationToken::new());
        assert_eq!(report.totals.processed, 1);
        // first-frame responses are positive responses (0x62), not requests
        assert_eq!(report.totals.dids, 0);
    }

    #[test]
    fn test_knowledge_base_mode() {
        let mut kb = KnowledgeBase::new();
        kb.insert_did(KbEntry::did(0xF190, "VIN"));
        let inspector = FrameInspector::new(Some(Arc::new(kb)));
        let report = analyze(frames(), &AnalysisOptions::default(), &inspector, &CancellationToken::new());
        assert_eq!(report.totals.dids, 1);
        assert_eq!(report.entries[0].findings[0].source, FindingSource::Database);
        assert_eq!(report.unique_dids.get(&0xF190).map(String::as_str), Some("VIN"));
        assert_eq!(report.knowledge_base.as_ref().map(|s| s.dids), Some(1));
    }

    #[test]
    fn test_cancelled_analysis() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = analyze(frames(), &AnalysisOptions::default(), &FrameInspector::new(None), &cancel);
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert!(report.entries.is_empty());
    }
}
