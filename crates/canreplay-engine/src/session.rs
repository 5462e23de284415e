//! Replay session: one playback run from channel selection to report

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use canreplay_core::{BusSink, Frame, Report, ReportContext, RunMode, RunOutcome};

use crate::aggregator::SessionAggregator;
use crate::config::ReplayConfig;
use crate::inspect::FrameInspector;
use crate::router::{select_channels, ChannelSelection};
use crate::scheduler::{ReplayOptions, ReplayOutcome, ReplayScheduler, ReplayState};

/// A single live playback run
///
/// Owns the cancellation token for the run; consumed by `run`.
pub struct ReplaySession {
    id: String,
    scheduler: ReplayScheduler,
    inspector: Arc<FrameInspector>,
    selection: ChannelSelection,
    cancel: CancellationToken,
}

/// Report plus the scheduler's own per-channel counters
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub report: Report,
    pub outcome: ReplayOutcome,
}

impl ReplaySession {
    pub fn new(sink: Arc<dyn BusSink>, inspector: Arc<FrameInspector>, config: &ReplayConfig) -> Self {
        let scheduler =
            ReplayScheduler::new(sink, ReplayOptions::from(config)).with_inspector(inspector.clone());
        Self {
            id: Uuid::new_v4().to_string(),
            scheduler,
            inspector,
            selection: config.channel,
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token that cancels this run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReplayState> {
        self.scheduler.subscribe_state()
    }

    /// Replay `frames` and build the session report
    pub async fn run(self, frames: &[Frame]) -> SessionResult {
        let channels = select_channels(frames, self.selection);
        info!(
            session_id = %self.id,
            selection = %self.selection,
            channels = channels.len(),
            "Replay session starting"
        );

        let (recorder, aggregator) = SessionAggregator::spawn();
        let scheduler = self.scheduler.clone().with_recorder(recorder);
        let outcome = scheduler.run(channels, self.cancel.clone()).await;
        drop(scheduler);

        let outcome_kind = match outcome.state {
            ReplayState::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::Finished,
        };
        let report = aggregator.finish().await.finalize(ReportContext {
            session_id: self.id,
            mode: RunMode::Replay,
            outcome: outcome_kind,
            duration_secs: outcome.elapsed.as_secs_f64(),
            rejected_frames: 0,
            knowledge_base: self.inspector.knowledge_base().map(|kb| kb.summary()),
        });
        SessionResult { report, outcome }
    }
}
