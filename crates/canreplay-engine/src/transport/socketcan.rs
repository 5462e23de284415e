//! Raw SocketCAN bus: one socket per channel (`<prefix><channel>`)
//!
//! Classic CAN only. Blocking socket calls run on the blocking pool.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as _, Id, Socket, StandardId};
use tracing::{debug, info};

use canreplay_core::{BusSink, Direction, Frame, TransportError, EXTENDED_FLAG};

use crate::config::SocketCanConfig;

pub struct SocketCanBus {
    prefix: String,
    sockets: Mutex<HashMap<u32, Arc<CanSocket>>>,
    connected: AtomicBool,
    opened_at: Instant,
}

impl SocketCanBus {
    pub fn new(config: &SocketCanConfig) -> Result<Self, TransportError> {
        if config.interface_prefix.is_empty() {
            return Err(TransportError::InvalidConfig(
                "interface_prefix must not be empty".to_string(),
            ));
        }
        Ok(Self {
            prefix: config.interface_prefix.clone(),
            sockets: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            opened_at: Instant::now(),
        })
    }

    /// Close all sockets; later sends and receives fail
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.sockets.lock().clear();
    }

    fn interface(&self, channel: u32) -> String {
        format!("{}{}", self.prefix, channel)
    }

    /// Socket for a channel, opened on first use
    fn socket(&self, channel: u32) -> Result<Arc<CanSocket>, TransportError> {
        let mut sockets = self.sockets.lock();
        if let Some(socket) = sockets.get(&channel) {
            return Ok(socket.clone());
        }
        let interface = self.interface(channel);
        let socket = CanSocket::open(&interface).map_err(|e| {
            TransportError::ConnectionFailed(format!(
                "Failed to open raw CAN socket on {}: {}",
                interface, e
            ))
        })?;
        info!(interface = %interface, channel, "Opened CAN socket");
        let socket = Arc::new(socket);
        sockets.insert(channel, socket.clone());
        Ok(socket)
    }
}

fn to_can_frame(frame: &Frame) -> Result<CanFrame, TransportError> {
    if frame.is_fd {
        return Err(TransportError::Unsupported(
            "CAN-FD frames are not supported on raw SocketCAN".to_string(),
        ));
    }
    let id = if frame.is_extended {
        ExtendedId::new(frame.arbitration_id).map(Id::Extended)
    } else {
        u16::try_from(frame.arbitration_id)
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };
    let id = id.ok_or_else(|| {
        TransportError::SendFailed(format!("Invalid CAN ID 0x{:X}", frame.arbitration_id))
    })?;
    CanFrame::new(id, &frame.data)
        .ok_or_else(|| TransportError::SendFailed("Invalid CAN frame payload".to_string()))
}

fn from_can_frame(frame: &CanFrame, channel: u32, timestamp: f64) -> Option<Frame> {
    if matches!(frame, CanFrame::Error(_)) {
        return None;
    }
    let raw_id = if frame.is_extended() {
        frame.raw_id() | EXTENDED_FLAG
    } else {
        frame.raw_id()
    };
    Frame::new(timestamp, channel, raw_id, frame.data().to_vec(), false)
        .ok()
        .map(|f| f.with_direction(Direction::Rx))
}

#[async_trait]
impl BusSink for SocketCanBus {
    async fn send(&self, channel: u32, frame: &Frame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let can_frame = to_can_frame(frame)?;
        let socket = self.socket(channel)?;
        tokio::task::spawn_blocking(move || socket.write_frame(&can_frame))
            .await
            .map_err(|e| TransportError::SendFailed(format!("Send task failed: {}", e)))?
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self, channel: u32, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let socket = self.socket(channel)?;
        let timestamp = self.opened_at.elapsed().as_secs_f64();
        let read = tokio::task::spawn_blocking(move || {
            socket.set_read_timeout(timeout)?;
            socket.read_frame()
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(format!("Receive task failed: {}", e)))?;

        match read {
            Ok(frame) => Ok(from_can_frame(&frame, channel, timestamp)),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => {
                debug!(channel, error = %e, "CAN read failed");
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "socketcan"
    }
}
