//! ISO-TP (ISO 15765-2) frame classification
//!
//! Each CAN frame is classified on its own from the protocol control
//! information nibble. Multi-frame messages are not reassembled; a first
//! frame only exposes the bytes it carries.

use serde::{Deserialize, Serialize};

use canreplay_core::Frame;

/// ISO-TP frame type from the upper nibble of byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsoTpKind {
    SingleFrame,
    FirstFrame,
    ConsecutiveFrame,
    FlowControl,
    NotIsoTp,
}

/// Payload view of one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoTpSegment {
    pub kind: IsoTpKind,
    pub payload: Vec<u8>,
}

impl IsoTpSegment {
    fn new(kind: IsoTpKind, payload: &[u8]) -> Self {
        Self {
            kind,
            payload: payload.to_vec(),
        }
    }

    fn not_isotp() -> Self {
        Self::new(IsoTpKind::NotIsoTp, &[])
    }

    /// Only single frames and first frames start a UDS message
    pub fn carries_service(&self) -> bool {
        matches!(self.kind, IsoTpKind::SingleFrame | IsoTpKind::FirstFrame)
            && !self.payload.is_empty()
    }
}

/// Classify a raw payload
///
/// A single frame's declared length is clamped to the bytes available.
pub fn reconstruct_bytes(data: &[u8]) -> IsoTpSegment {
    let Some(&pci) = data.first() else {
        return IsoTpSegment::not_isotp();
    };

    match pci >> 4 {
        0x0 if data.len() > 1 => {
            let declared = (pci & 0x0F) as usize;
            let end = (1 + declared).min(data.len());
            IsoTpSegment::new(IsoTpKind::SingleFrame, &data[1..end])
        }
        0x1 if data.len() > 2 => IsoTpSegment::new(IsoTpKind::FirstFrame, &data[2..]),
        0x2 if data.len() > 1 => IsoTpSegment::new(IsoTpKind::ConsecutiveFrame, &data[1..]),
        0x3 => IsoTpSegment::new(IsoTpKind::FlowControl, &data[1..]),
        _ => IsoTpSegment::not_isotp(),
    }
}

/// Classify a frame's payload
pub fn reconstruct(frame: &Frame) -> IsoTpSegment {
    reconstruct_bytes(&frame.data)
}

/// Split a UDS payload into classic-CAN ISO-TP frames
///
/// Short payloads become one single frame; longer ones a first frame
/// followed by consecutive frames with a wrapping sequence number. Every
/// frame is padded to 8 bytes with `padding`.
pub fn segment(payload: &[u8], padding: u8) -> Vec<Vec<u8>> {
    let pad = |mut frame: Vec<u8>| {
        frame.resize(8, padding);
        frame
    };

    if payload.len() <= 7 {
        let mut frame = vec![payload.len() as u8];
        frame.extend_from_slice(payload);
        return vec![pad(frame)];
    }

    let len = payload.len().min(0x0FFF);
    let payload = &payload[..len];
    let mut frames = Vec::new();
    let mut first = vec![0x10 | ((len >> 8) as u8 & 0x0F), (len & 0xFF) as u8];
    first.extend_from_slice(&payload[..6]);
    frames.push(first);

    for (i, chunk) in payload[6..].chunks(7).enumerate() {
        let sequence = ((i + 1) % 16) as u8;
        let mut frame = vec![0x20 | sequence];
        frame.extend_from_slice(chunk);
        frames.push(pad(frame));
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let seg = reconstruct_bytes(&[0x03, 0x22, 0xF1, 0x90, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(seg.kind, IsoTpKind::SingleFrame);
        assert_eq!(seg.payload, vec![0x22, 0xF1, 0x90]);
        assert!(seg.carries_service());
    }

    #[test]
    fn test_single_frame_length_clamped() {
        let seg = reconstruct_bytes(&[0x07, 0x22, 0xF1]);
        assert_eq!(seg.payload, vec![0x22, 0xF1]);
    }

    #[test]
    fn test_first_frame() {
        let seg = reconstruct_bytes(&[0x10, 0x14, 0x62, 0xF1, 0x90, 0x57, 0x30, 0x4C]);
        assert_eq!(seg.kind, IsoTpKind::FirstFrame);
        assert_eq!(seg.payload, vec![0x62, 0xF1, 0x90, 0x57, 0x30, 0x4C]);
    }

    #[test]
    fn test_consecutive_and_flow_control() {
        let seg = reconstruct_bytes(&[0x21, 0x01, 0x02]);
        assert_eq!(seg.kind, IsoTpKind::ConsecutiveFrame);
        assert_eq!(seg.payload, vec![0x01, 0x02]);
        assert!(!seg.carries_service());

        let seg = reconstruct_bytes(&[0x30, 0x00, 0x00]);
        assert_eq!(seg.kind, IsoTpKind::FlowControl);
        assert_eq!(seg.payload, vec![0x00, 0x00]);
    }

    #[test]
    fn test_not_isotp() {
        assert_eq!(reconstruct_bytes(&[]).kind, IsoTpKind::NotIsoTp);
        assert_eq!(reconstruct_bytes(&[0x03]).kind, IsoTpKind::NotIsoTp);
        assert_eq!(reconstruct_bytes(&[0x10, 0x14]).kind, IsoTpKind::NotIsoTp);
        assert_eq!(reconstruct_bytes(&[0x21]).kind, IsoTpKind::NotIsoTp);
        assert_eq!(reconstruct_bytes(&[0x45, 0x01, 0x02]).kind, IsoTpKind::NotIsoTp);
    }

    #[test]
    fn test_segment_multi_frame() {
        let payload: Vec<u8> = (0..20).collect();
        let frames = segment(&payload, 0xCC);
        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..2], &[0x10, 20]);
        assert_eq!(frames[1][0], 0x21);
        assert_eq!(frames[2][0], 0x22);
        assert_eq!(frames[2][..], [0x22, 13, 14, 15, 16, 17, 18, 19]);

        let seg = reconstruct_bytes(&frames[0]);
        assert_eq!(seg.kind, IsoTpKind::FirstFrame);
        assert_eq!(seg.payload, payload[..6].to_vec());
    }

    #[test]
    fn test_segment_single_frame_padded() {
        let frames = segment(&[0x3E, 0x00], 0xCC);
        assert_eq!(frames, vec![vec![0x02, 0x3E, 0x00, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC]]);
    }
}
