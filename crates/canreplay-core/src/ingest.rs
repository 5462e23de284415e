//! Frame ingestion: validate raw log records into `Frame`s

use tracing::debug;

use crate::models::{Frame, RawFrame};

/// Iterator adapter that validates raw records and skips malformed ones
///
/// Rejected records are counted, never fatal.
pub struct Ingestor<I> {
    source: I,
    accepted: usize,
    rejected: usize,
}

impl<I> Ingestor<I>
where
    I: Iterator<Item = RawFrame>,
{
    pub fn new(source: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            source: source.into_iter(),
            accepted: 0,
            rejected: 0,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl<I> Iterator for Ingestor<I>
where
    I: Iterator<Item = RawFrame>,
{
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        for raw in self.source.by_ref() {
            let id = raw.id;
            match Frame::from_raw(raw) {
                Ok(frame) => {
                    self.accepted += 1;
                    return Some(frame);
                }
                Err(e) => {
                    self.rejected += 1;
                    debug!(id = format!("0x{:X}", id), error = %e, "Dropping malformed frame");
                }
            }
        }
        None
    }
}

/// Result of ingesting a whole log
#[derive(Debug, Clone, Default)]
pub struct IngestSummary {
    pub frames: Vec<Frame>,
    pub rejected: usize,
}

/// Validate every record of `source`
pub fn ingest(source: impl IntoIterator<Item = RawFrame>) -> IngestSummary {
    let mut ingestor = Ingestor::new(source);
    let frames: Vec<Frame> = ingestor.by_ref().collect();
    IngestSummary {
        frames,
        rejected: ingestor.rejected(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn raw(timestamp: f64, id: u32, data: Vec<u8>, dlc: Option<u8>) -> RawFrame {
        RawFrame {
            timestamp,
            channel: 0,
            id,
            data,
            dlc,
            is_fd: false,
            direction: Direction::Rx,
        }
    }

    #[test]
    fn test_ingest_counts_rejects() {
        let summary = ingest(vec![
            raw(0.0, 0x7E0, vec![0x02, 0x10, 0x03], None),
            raw(0.1, 0x7E0, vec![0; 9], None),
            raw(0.2, 0x7E8, vec![0; 8], Some(12)),
            raw(0.3, 0x7E8, vec![0x06, 0x50, 0x03], Some(3)),
        ]);
        assert_eq!(summary.frames.len(), 2);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.frames[1].timestamp_sec, 0.3);
    }

    #[test]
    fn test_ingestor_is_lazy() {
        let mut ingestor = Ingestor::new(vec![
            raw(0.0, 0x100, vec![0; 20], None),
            raw(0.1, 0x100, vec![1], None),
        ]);
        let first = ingestor.next().unwrap();
        assert_eq!(first.data, vec![1]);
        assert_eq!(ingestor.accepted(), 1);
        assert_eq!(ingestor.rejected(), 1);
        assert!(ingestor.next().is_none());
    }
}
