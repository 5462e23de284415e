//! Timing-faithful, cancellable replay of frames onto a `BusSink`
//!
//! Each channel gets its own send task. Frame `i` is due at
//! `start + (t[i] - t[0]) / speed_factor`; deadlines are absolute, so time
//! spent sending does not accumulate as drift. With response monitoring on,
//! a listener task per channel polls the bus until the senders are done.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use canreplay_core::{BusSink, Direction, EntryOrigin, Frame};

use crate::aggregator::RecordSender;
use crate::config::ReplayConfig;
use crate::inspect::FrameInspector;
use crate::router::ChannelFrames;

/// Replay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReplayState {
    Idle,
    /// Seconds (ticks) left before playback
    CountingDown(u8),
    Running,
    Finished,
    Cancelled,
}

impl ReplayState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }
}

/// Per-channel counters reported by the send and listen tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub sent: usize,
    pub received: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// 1.0 real time, 2.0 twice as fast, 0.0 no delays
    pub speed_factor: f64,
    pub monitor_responses: bool,
    pub poll_timeout: Duration,
    pub countdown: u8,
    pub countdown_tick: Duration,
    pub response_grace: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self::from(&ReplayConfig::default())
    }
}

impl From<&ReplayConfig> for ReplayOptions {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            speed_factor: config.speed_factor,
            monitor_responses: config.monitor_responses,
            poll_timeout: config.poll_timeout(),
            countdown: config.countdown_secs,
            countdown_tick: config.countdown_tick(),
            response_grace: config.response_grace(),
        }
    }
}

impl ReplayOptions {
    /// Scaled delay for a timestamp gap; `None` means send immediately
    fn scaled(&self, gap: f64) -> Option<Duration> {
        if self.speed_factor <= 0.0 || !self.speed_factor.is_finite() || gap <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(gap / self.speed_factor).ok()
    }
}

/// Counters written by a send task as it goes
///
/// Read by the scheduler after the task ends, so frames sent before a task
/// failure still show up in the outcome.
#[derive(Debug, Default)]
struct SendCounters {
    sent: AtomicUsize,
    errors: AtomicUsize,
}

impl SendCounters {
    fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: 0,
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Result of one replay run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub state: ReplayState,
    pub channels: BTreeMap<u32, ChannelStats>,
    pub elapsed: Duration,
}

impl ReplayOutcome {
    pub fn total_sent(&self) -> usize {
        self.channels.values().map(|s| s.sent).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.channels.values().map(|s| s.errors).sum()
    }
}

/// State shared with spawned tasks
#[derive(Clone)]
struct TaskContext {
    sink: Arc<dyn BusSink>,
    inspector: Arc<FrameInspector>,
    recorder: Option<RecordSender>,
    origin: Instant,
}

impl TaskContext {
    fn record(&self, frame: &Frame, origin: EntryOrigin, error: Option<String>) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let timestamp = self.origin.elapsed().as_secs_f64();
        let mut entry = self.inspector.inspect(frame, timestamp, origin);
        entry.error = error;
        recorder.record(entry);
    }
}

/// Drives playback of grouped frames
#[derive(Clone)]
pub struct ReplayScheduler {
    sink: Arc<dyn BusSink>,
    inspector: Arc<FrameInspector>,
    recorder: Option<RecordSender>,
    options: ReplayOptions,
    state: Arc<watch::Sender<ReplayState>>,
}

impl ReplayScheduler {
    pub fn new(sink: Arc<dyn BusSink>, options: ReplayOptions) -> Self {
        let (state, _) = watch::channel(ReplayState::Idle);
        Self {
            sink,
            inspector: Arc::new(FrameInspector::new(None)),
            recorder: None,
            options,
            state: Arc::new(state),
        }
    }

    pub fn with_inspector(mut self, inspector: Arc<FrameInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Send a report entry for every sent, failed and received frame
    pub fn with_recorder(mut self, recorder: RecordSender) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn state(&self) -> ReplayState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReplayState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ReplayState) {
        debug!(?state, "Replay state");
        self.state.send_replace(state);
    }

    /// Replay `channels` until done or `cancel` fires
    ///
    /// All spawned tasks are joined before this returns.
    pub async fn run(&self, channels: Vec<ChannelFrames>, cancel: CancellationToken) -> ReplayOutcome {
        let started = Instant::now();
        let mut stats: BTreeMap<u32, ChannelStats> = channels
            .iter()
            .map(|c| (c.channel, ChannelStats::default()))
            .collect();

        if !self.count_down(&cancel).await {
            info!("Replay cancelled during countdown");
            self.set_state(ReplayState::Cancelled);
            return ReplayOutcome {
                state: ReplayState::Cancelled,
                channels: stats,
                elapsed: started.elapsed(),
            };
        }

        self.set_state(ReplayState::Running);
        let context = TaskContext {
            sink: self.sink.clone(),
            inspector: self.inspector.clone(),
            recorder: self.recorder.clone(),
            origin: Instant::now(),
        };
        info!(
            bus = self.sink.name(),
            channels = channels.len(),
            frames = channels.iter().map(|c| c.frames.len()).sum::<usize>(),
            speed_factor = self.options.speed_factor,
            "Replay started"
        );

        let stop_listening = cancel.child_token();
        let mut listeners = Vec::new();
        if self.options.monitor_responses {
            for group in &channels {
                let task = tokio::spawn(listen(
                    group.channel,
                    context.clone(),
                    self.options.poll_timeout,
                    stop_listening.clone(),
                ));
                listeners.push((group.channel, task));
            }
        }

        let mut senders = Vec::new();
        for group in channels {
            let channel = group.channel;
            let counters = Arc::new(SendCounters::default());
            let task = tokio::spawn(transmit(
                group,
                context.clone(),
                self.options.clone(),
                counters.clone(),
                cancel.clone(),
            ));
            senders.push((channel, counters, task));
        }
        drop(context);

        for (channel, counters, task) in senders {
            if let Err(e) = task.await {
                error!(channel, error = %e, "Send task failed");
            }
            let result = counters.snapshot();
            let entry = stats.entry(channel).or_default();
            entry.sent += result.sent;
            entry.errors += result.errors;
        }

        if !listeners.is_empty() && !self.options.response_grace.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = sleep(self.options.response_grace) => {}
            }
        }
        stop_listening.cancel();

        for (channel, task) in listeners {
            match task.await {
                Ok(received) => stats.entry(channel).or_default().received += received,
                Err(e) => error!(channel, error = %e, "Listener task failed"),
            }
        }

        let state = if cancel.is_cancelled() {
            ReplayState::Cancelled
        } else {
            ReplayState::Finished
        };
        self.set_state(state);

        let outcome = ReplayOutcome {
            state,
            channels: stats,
            elapsed: started.elapsed(),
        };
        info!(
            ?state,
            sent = outcome.total_sent(),
            errors = outcome.total_errors(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Replay complete"
        );
        outcome
    }

    /// Returns false if cancelled before playback
    async fn count_down(&self, cancel: &CancellationToken) -> bool {
        for remaining in (1..=self.options.countdown).rev() {
            self.set_state(ReplayState::CountingDown(remaining));
            info!(remaining, "Replay starting");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = sleep(self.options.countdown_tick) => {}
            }
        }
        !cancel.is_cancelled()
    }
}

async fn transmit(
    group: ChannelFrames,
    context: TaskContext,
    options: ReplayOptions,
    counters: Arc<SendCounters>,
    cancel: CancellationToken,
) {
    let channel = group.channel;
    let mut previous = group.frames.first().map(|f| f.timestamp_sec);
    let mut offset = Duration::ZERO;

    for frame in &group.frames {
        if cancel.is_cancelled() {
            break;
        }
        let gap = previous.map_or(0.0, |p| frame.timestamp_sec - p);
        previous = Some(frame.timestamp_sec);

        if let Some(delay) = options.scaled(gap) {
            offset = offset.saturating_add(delay);
            match context.origin.checked_add(offset) {
                Some(deadline) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sleep_until(deadline) => {}
                },
                None => {
                    // Unreachable deadline: nothing further is ever due
                    warn!(
                        channel,
                        timestamp = frame.timestamp_sec,
                        "Frame deadline out of range, waiting for cancel"
                    );
                    cancel.cancelled().await;
                    break;
                }
            }
        }

        let mut outgoing = frame.clone().with_direction(Direction::Tx);
        outgoing.channel = channel;
        match context.sink.send(channel, &outgoing).await {
            Ok(()) => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                context.record(&outgoing, EntryOrigin::Sent, None);
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel,
                    id = format!("0x{:X}", outgoing.arbitration_id),
                    error = %e,
                    "Send failed"
                );
                context.record(&outgoing, EntryOrigin::SendFailed, Some(e.to_string()));
            }
        }
    }

    let stats = counters.snapshot();
    debug!(channel, sent = stats.sent, errors = stats.errors, "Send task done");
}

async fn listen(
    channel: u32,
    context: TaskContext,
    poll_timeout: Duration,
    stop: CancellationToken,
) -> usize {
    let mut received = 0;
    loop {
        let polled = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            polled = context.sink.recv(channel, poll_timeout) => polled,
        };
        match polled {
            Ok(Some(frame)) => {
                received += 1;
                let mut frame = frame.with_direction(Direction::Rx);
                frame.channel = channel;
                context.record(&frame, EntryOrigin::Response, None);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(channel, error = %e, "Bus handle unusable, stopping listener");
                break;
            }
        }
    }
    debug!(channel, received, "Listener done");
    received
}
