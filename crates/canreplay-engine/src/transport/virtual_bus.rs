//! In-process virtual CAN bus
//!
//! Frames sent on a channel are logged and, when they carry a request with
//! a canned response, answered on the same channel like an ECU would.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;

use canreplay_core::{BusSink, Direction, Frame, TransportError};
use canreplay_diag::isotp::{reconstruct, segment, IsoTpKind};

use crate::config::VirtualBusConfig;

const PADDING: u8 = 0xCC;

/// A frame accepted by the virtual bus
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub channel: u32,
    pub frame: Frame,
    pub at: Instant,
}

struct ChannelQueue {
    tx: mpsc::UnboundedSender<Frame>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>>,
}

impl ChannelQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// Virtual bus for tests and hardware-free replay
pub struct VirtualBus {
    latency: Duration,
    connected: AtomicBool,
    queues: Mutex<HashMap<u32, ChannelQueue>>,
    /// Request payload -> response payload
    responses: RwLock<Vec<(Vec<u8>, Vec<u8>)>>,
    failing_ids: RwLock<HashSet<u32>>,
    sent: Mutex<Vec<SentFrame>>,
}

impl VirtualBus {
    pub fn new(config: &VirtualBusConfig) -> Self {
        let responses = if config.simulate_ecu {
            Self::default_responses()
        } else {
            Vec::new()
        };
        Self {
            latency: Duration::from_millis(config.latency_ms),
            connected: AtomicBool::new(true),
            queues: Mutex::new(HashMap::new()),
            responses: RwLock::new(responses),
            failing_ids: RwLock::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Answer `request` (a UDS payload) with `response`
    pub fn add_response(&self, request: Vec<u8>, response: Vec<u8>) {
        self.responses.write().push((request, response));
    }

    /// Queue a frame as if another node had sent it
    pub fn inject(&self, channel: u32, frame: Frame) {
        let tx = self.queue_sender(channel);
        let _ = tx.send(frame);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make every send of `arbitration_id` fail
    pub fn fail_sends_for(&self, arbitration_id: u32) {
        self.failing_ids.write().insert(arbitration_id);
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    fn queue_sender(&self, channel: u32) -> mpsc::UnboundedSender<Frame> {
        self.queues
            .lock()
            .entry(channel)
            .or_insert_with(ChannelQueue::new)
            .tx
            .clone()
    }

    fn queue_receiver(&self, channel: u32) -> Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>> {
        self.queues
            .lock()
            .entry(channel)
            .or_insert_with(ChannelQueue::new)
            .rx
            .clone()
    }

    /// Response frames for a request, if one is configured
    fn respond(&self, frame: &Frame) -> Vec<Frame> {
        let segment = reconstruct(frame);
        if segment.kind != IsoTpKind::SingleFrame {
            return Vec::new();
        }
        let Some(response_id) = response_id(frame.arbitration_id) else {
            return Vec::new();
        };
        let response = self
            .responses
            .read()
            .iter()
            .find(|(request, _)| segment.payload.starts_with(request))
            .map(|(_, response)| response.clone());
        let Some(response) = response.filter(|r| !r.is_empty()) else {
            return Vec::new();
        };

        let raw_id = if frame.is_extended {
            response_id | canreplay_core::EXTENDED_FLAG
        } else {
            response_id
        };
        segment_frames(&response)
            .into_iter()
            .filter_map(|data| {
                Frame::new(frame.timestamp_sec, frame.channel, raw_id, data, false).ok()
            })
            .map(|f| f.with_direction(Direction::Rx))
            .collect()
    }

    fn default_responses() -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            // DiagnosticSessionControl - extended
            (vec![0x10, 0x03], vec![0x50, 0x03, 0x00, 0x19, 0x01, 0xF4]),
            // TesterPresent
            (vec![0x3E, 0x00], vec![0x7E, 0x00]),
            // ReadDataByIdentifier - VIN
            (vec![0x22, 0xF1, 0x90], {
                let mut resp = vec![0x62, 0xF1, 0x90];
                resp.extend_from_slice(b"WVWZZZ1JZXW000001");
                resp
            }),
            // ReadDTCInformation - reportDTCByStatusMask, one DTC (P0101, confirmed)
            (
                vec![0x19, 0x02],
                vec![0x59, 0x02, 0xFF, 0x01, 0x01, 0x08, 0x00],
            ),
            // SecurityAccess - request seed level 1
            (vec![0x27, 0x01], vec![0x67, 0x01, 0x12, 0x34, 0x56, 0x78]),
            // SecurityAccess - send key level 1
            (vec![0x27, 0x02], vec![0x67, 0x02]),
        ]
    }
}

fn segment_frames(payload: &[u8]) -> Vec<Vec<u8>> {
    segment(payload, PADDING)
}

/// Physical response ID for a request ID
fn response_id(request_id: u32) -> Option<u32> {
    match request_id {
        0x7DF => Some(0x7E8),
        0x700..=0x7F7 => Some(request_id + 8),
        id if id > 0x7FF && (id >> 16) & 0xFF == 0xDA => {
            let target = (id >> 8) & 0xFF;
            let source = id & 0xFF;
            Some((id & 0xFFFF_0000) | (source << 8) | target)
        }
        _ => None,
    }
}

#[async_trait]
impl BusSink for VirtualBus {
    async fn send(&self, channel: u32, frame: &Frame) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let rejected = self.failing_ids.read().contains(&frame.arbitration_id);
        if rejected {
            return Err(TransportError::SendFailed(format!(
                "Bus rejected frame 0x{:X}",
                frame.arbitration_id
            )));
        }

        tracing::debug!(
            channel,
            id = format!("0x{:X}", frame.arbitration_id),
            data = %frame.raw_hex(),
            "Virtual send"
        );
        self.sent.lock().push(SentFrame {
            channel,
            frame: frame.clone(),
            at: Instant::now(),
        });

        let responses = self.respond(frame);
        if !responses.is_empty() {
            let tx = self.queue_sender(channel);
            for response in responses {
                let _ = tx.send(response);
            }
        }
        Ok(())
    }

    async fn recv(&self, channel: u32, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        let rx = self.queue_receiver(channel);
        let mut rx = rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(TransportError::ConnectionClosed),
            Err(_) => Ok(None),
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "virtual"
    }
}
