//! Normalized CAN / CAN-FD frame records

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Highest 11-bit (standard) arbitration ID
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// 29-bit (extended) arbitration ID mask
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Extended-frame flag carried in raw IDs (SocketCAN `CAN_EFF_FLAG`)
pub const EXTENDED_FLAG: u32 = 0x8000_0000;

/// Payload lengths for CAN-FD DLC values 9..=15
const FD_LENGTHS: [usize; 7] = [12, 16, 20, 24, 32, 48, 64];

/// Map a DLC to a payload length
///
/// DLC 0..=8 map to themselves. On CAN-FD, 9..=15 map to 12, 16, 20, 24,
/// 32, 48 and 64 bytes. Anything else is undefined.
pub fn dlc_to_length(dlc: u8, is_fd: bool) -> Option<usize> {
    match dlc {
        0..=8 => Some(dlc as usize),
        9..=15 if is_fd => Some(FD_LENGTHS[(dlc - 9) as usize]),
        _ => None,
    }
}

/// Map a payload length back to its DLC
pub fn length_to_dlc(len: usize, is_fd: bool) -> Option<u8> {
    match len {
        0..=8 => Some(len as u8),
        _ if is_fd => FD_LENGTHS
            .iter()
            .position(|&l| l == len)
            .map(|i| i as u8 + 9),
        _ => None,
    }
}

/// Split a raw arbitration ID into `(id, is_extended)`
///
/// The extended flag is honoured when present; otherwise any ID above the
/// 11-bit range is treated as extended.
pub fn normalize_id(raw: u32) -> (u32, bool) {
    let id = raw & EXTENDED_ID_MASK;
    if raw & EXTENDED_FLAG != 0 {
        (id, true)
    } else {
        (id, id > MAX_STANDARD_ID)
    }
}

/// Frame direction as recorded in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Rx,
    Tx,
}

/// A frame record as produced by a log source, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Seconds relative to the start of the log
    pub timestamp: f64,
    /// Logical channel index (0-based)
    #[serde(default)]
    pub channel: u32,
    /// Arbitration ID, optionally carrying the extended flag
    pub id: u32,
    /// Payload bytes, hex encoded on the wire
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    /// Declared DLC, if the source records one
    #[serde(default)]
    pub dlc: Option<u8>,
    #[serde(default)]
    pub is_fd: bool,
    #[serde(default)]
    pub direction: Direction,
}

/// A validated CAN / CAN-FD frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp_sec: f64,
    pub channel: u32,
    pub arbitration_id: u32,
    pub is_extended: bool,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub is_fd: bool,
    pub direction: Direction,
}

impl Frame {
    /// Build a frame, validating the payload length for its flavour
    pub fn new(
        timestamp_sec: f64,
        channel: u32,
        raw_id: u32,
        data: impl Into<Vec<u8>>,
        is_fd: bool,
    ) -> Result<Self, FrameError> {
        Self::from_raw(RawFrame {
            timestamp: timestamp_sec,
            channel,
            id: raw_id,
            data: data.into(),
            dlc: None,
            is_fd,
            direction: Direction::Rx,
        })
    }

    /// Validate and normalize a raw record
    pub fn from_raw(raw: RawFrame) -> Result<Self, FrameError> {
        if !raw.timestamp.is_finite() {
            return Err(FrameError::InvalidTimestamp(raw.timestamp));
        }

        match raw.dlc {
            Some(dlc) => {
                let expected = dlc_to_length(dlc, raw.is_fd).ok_or(FrameError::InvalidDlc {
                    dlc,
                    is_fd: raw.is_fd,
                })?;
                if expected != raw.data.len() {
                    return Err(FrameError::LengthMismatch {
                        dlc,
                        expected,
                        actual: raw.data.len(),
                    });
                }
            }
            None => {
                length_to_dlc(raw.data.len(), raw.is_fd).ok_or(FrameError::InvalidLength {
                    len: raw.data.len(),
                    is_fd: raw.is_fd,
                })?;
            }
        }

        let (arbitration_id, is_extended) = normalize_id(raw.id);
        Ok(Self {
            timestamp_sec: raw.timestamp,
            channel: raw.channel,
            arbitration_id,
            is_extended,
            data: raw.data,
            is_fd: raw.is_fd,
            direction: raw.direction,
        })
    }

    /// Set the direction
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// DLC code for the payload length
    pub fn dlc(&self) -> u8 {
        length_to_dlc(self.data.len(), self.is_fd).unwrap_or_default()
    }

    /// Payload as upper-case hex
    pub fn raw_hex(&self) -> String {
        hex::encode_upper(&self.data)
    }
}

/// Hex (de)serialization for payload bytes; whitespace between bytes is accepted
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        hex::decode(compact).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlc_classic_identity() {
        for dlc in 0..=8u8 {
            assert_eq!(dlc_to_length(dlc, false), Some(dlc as usize));
            assert_eq!(dlc_to_length(dlc, true), Some(dlc as usize));
        }
        assert_eq!(dlc_to_length(9, false), None);
        assert_eq!(dlc_to_length(15, false), None);
    }

    #[test]
    fn test_dlc_fd_table() {
        assert_eq!(dlc_to_length(9, true), Some(12));
        assert_eq!(dlc_to_length(13, true), Some(32));
        assert_eq!(dlc_to_length(15, true), Some(64));
        assert_eq!(dlc_to_length(16, true), None);

        assert_eq!(length_to_dlc(48, true), Some(14));
        assert_eq!(length_to_dlc(48, false), None);
        assert_eq!(length_to_dlc(13, true), None);
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id(0x7E0), (0x7E0, false));
        assert_eq!(normalize_id(0x18DA_F110), (0x18DA_F110, true));
        assert_eq!(normalize_id(0x8000_0123), (0x123, true));
    }

    #[test]
    fn test_from_raw_rejects_classic_overlong() {
        let raw = RawFrame {
            timestamp: 0.0,
            channel: 0,
            id: 0x123,
            data: vec![0; 12],
            dlc: None,
            is_fd: false,
            direction: Direction::Rx,
        };
        assert_eq!(
            Frame::from_raw(raw),
            Err(FrameError::InvalidLength { len: 12, is_fd: false })
        );
    }

    #[test]
    fn test_from_raw_checks_declared_dlc() {
        let raw = RawFrame {
            timestamp: 1.5,
            channel: 1,
            id: 0x7E0,
            data: vec![0x02, 0x10, 0x03],
            dlc: Some(8),
            is_fd: false,
            direction: Direction::Tx,
        };
        assert!(matches!(
            Frame::from_raw(raw),
            Err(FrameError::LengthMismatch { expected: 8, actual: 3, .. })
        ));
    }

    #[test]
    fn test_from_raw_fd_frame() {
        let frame = Frame::new(0.25, 0, 0x18DA_F110, vec![0xAA; 16], true).unwrap();
        assert!(frame.is_extended);
        assert_eq!(frame.dlc(), 10);
    }

    #[test]
    fn test_from_raw_rejects_nan_timestamp() {
        let err = Frame::new(f64::NAN, 0, 0x100, vec![], false).unwrap_err();
        assert!(matches!(err, FrameError::InvalidTimestamp(_)));
    }

    #[test]
    fn test_raw_frame_json_with_spaced_hex() {
        let raw: RawFrame =
            serde_json::from_str(r#"{"timestamp":0.1,"id":2016,"data":"03 22 F1 90"}"#).unwrap();
        assert_eq!(raw.data, vec![0x03, 0x22, 0xF1, 0x90]);
        assert_eq!(raw.direction, Direction::Rx);

        let frame = Frame::from_raw(raw).unwrap();
        assert_eq!(frame.raw_hex(), "0322F190");
    }
}
