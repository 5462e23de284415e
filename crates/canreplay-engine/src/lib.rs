//! canreplay-engine - Replay and analysis of recorded CAN traffic
//!
//! Groups frames by channel, replays them onto a `BusSink` with the
//! original inter-frame timing (scaled by a speed factor), listens for
//! responses, and aggregates classified frames into a session report.
//! Offline analysis runs the same classification without a bus.

pub mod aggregator;
pub mod analysis;
pub mod config;
pub mod inspect;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use aggregator::{AggregatorHandle, RecordSender, SessionAggregator};
pub use analysis::{analyze, AnalysisOptions};
pub use config::{AppConfig, ConfigError, ReplayConfig, TransportConfig};
pub use inspect::FrameInspector;
pub use router::{group_by_channel, select_channels, ChannelFrames, ChannelSelection};
pub use scheduler::{ChannelStats, ReplayOptions, ReplayOutcome, ReplayScheduler, ReplayState};
pub use session::{ReplaySession, SessionResult};
pub use transport::{create_bus, VirtualBus};
