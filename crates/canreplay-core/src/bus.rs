//! Bus abstraction driven by the replay scheduler

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::models::Frame;

/// A CAN bus endpoint that frames are replayed onto
///
/// Implementations must be safe to call from one sending task and one
/// listening task per channel at the same time.
#[async_trait]
pub trait BusSink: Send + Sync {
    /// Transmit a frame on the given channel
    async fn send(&self, channel: u32, frame: &Frame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for a frame on the given channel
    ///
    /// Returns `Ok(None)` when the timeout elapses without traffic. An `Err`
    /// means the bus handle is no longer usable.
    async fn recv(&self, channel: u32, timeout: Duration) -> Result<Option<Frame>, TransportError>;

    /// Check if the bus is connected
    async fn is_connected(&self) -> bool;

    /// Short human-readable name used in logs
    fn name(&self) -> &str;
}

/// Optional signal decoder (DBC-style) used to annotate frames
pub trait SignalDecoder: Send + Sync {
    /// Decode the frame into a printable signal summary, if the ID is known
    fn decode(&self, frame: &Frame) -> Option<String>;
}
