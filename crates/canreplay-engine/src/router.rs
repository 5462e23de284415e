//! Channel grouping and selection for replay runs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use canreplay_core::Frame;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelSelectionError {
    #[error("Unrecognized channel selection: {0}")]
    Unrecognized(String),

    #[error("Channel numbers for {0} start at 1")]
    ZeroChannel(String),
}

/// Which log channels take part in a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelSelection {
    /// Every channel present in the log, each on its own channel
    #[default]
    Auto,
    /// A single 0-based channel index
    Explicit(u32),
}

impl FromStr for ChannelSelection {
    type Err = ChannelSelectionError;

    /// Accepts "auto" / "Auto-detect", "Vector Ch2", "PCAN Ch1", "Channel 3" (1-based),
    /// "can0", "vcan1", "SocketCAN: can0" (0-based) and bare indices, with an
    /// optional "Virtual: " prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let name = trimmed.strip_prefix("Virtual:").unwrap_or(trimmed).trim();
        if name.is_empty() || strip_prefix_ignore_case(name, "auto").is_some() {
            return Ok(Self::Auto);
        }
        let name = name.strip_prefix("SocketCAN:").unwrap_or(name).trim();

        let one_based = ["Vector Ch", "PCAN Ch", "Channel "]
            .iter()
            .find_map(|prefix| strip_prefix_ignore_case(name, prefix));
        if let Some(number) = one_based {
            let n: u32 = number
                .trim()
                .parse()
                .map_err(|_| ChannelSelectionError::Unrecognized(s.to_string()))?;
            return n
                .checked_sub(1)
                .map(Self::Explicit)
                .ok_or_else(|| ChannelSelectionError::ZeroChannel(s.to_string()));
        }

        let index = strip_prefix_ignore_case(name, "vcan")
            .or_else(|| strip_prefix_ignore_case(name, "can"))
            .unwrap_or(name);
        index
            .parse()
            .map(Self::Explicit)
            .map_err(|_| ChannelSelectionError::Unrecognized(s.to_string()))
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

impl TryFrom<String> for ChannelSelection {
    type Error = ChannelSelectionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelSelection> for String {
    fn from(selection: ChannelSelection) -> Self {
        selection.to_string()
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Explicit(channel) => write!(f, "{}", channel),
        }
    }
}

/// Ordered frames to transmit on one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelFrames {
    pub channel: u32,
    pub frames: Vec<Frame>,
}

/// Group frames by channel, keeping per-channel order
pub fn group_by_channel(frames: &[Frame]) -> BTreeMap<u32, Vec<Frame>> {
    let mut groups: BTreeMap<u32, Vec<Frame>> = BTreeMap::new();
    for frame in frames {
        groups.entry(frame.channel).or_default().push(frame.clone());
    }
    groups
}

/// Pick the channels that take part in a run
///
/// An explicit channel that never occurs in the log receives the whole
/// unfiltered frame list instead of nothing.
pub fn select_channels(frames: &[Frame], selection: ChannelSelection) -> Vec<ChannelFrames> {
    match selection {
        ChannelSelection::Auto => group_by_channel(frames)
            .into_iter()
            .map(|(channel, frames)| ChannelFrames { channel, frames })
            .collect(),
        ChannelSelection::Explicit(channel) => {
            let on_channel: Vec<Frame> = frames
                .iter()
                .filter(|f| f.channel == channel)
                .cloned()
                .collect();
            let frames = if on_channel.is_empty() {
                warn!(
                    channel,
                    frames = frames.len(),
                    "Channel not present in log, replaying all frames on it"
                );
                frames.to_vec()
            } else {
                on_channel
            };
            vec![ChannelFrames { channel, frames }]
        }
    }
}
