//! Per-frame inspection: diagnostic classification plus optional signal decoding

use std::sync::Arc;

use canreplay_core::{DiagnosticFinding, EntryOrigin, Frame, ReportEntry, SignalDecoder};
use canreplay_diag::{classify_frame, KnowledgeBase};

/// Turns frames into annotated report entries
///
/// Shared by the replay send/listen tasks and offline analysis.
#[derive(Clone)]
pub struct FrameInspector {
    knowledge_base: Option<Arc<KnowledgeBase>>,
    decoder: Option<Arc<dyn SignalDecoder>>,
    detect_diagnostics: bool,
}

impl FrameInspector {
    pub fn new(knowledge_base: Option<Arc<KnowledgeBase>>) -> Self {
        Self {
            knowledge_base,
            decoder: None,
            detect_diagnostics: true,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn SignalDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn detect_diagnostics(mut self, enabled: bool) -> Self {
        self.detect_diagnostics = enabled;
        self
    }

    pub fn knowledge_base(&self) -> Option<&KnowledgeBase> {
        self.knowledge_base.as_deref()
    }

    pub fn findings(&self, frame: &Frame) -> Vec<DiagnosticFinding> {
        if !self.detect_diagnostics {
            return Vec::new();
        }
        classify_frame(frame, self.knowledge_base())
    }

    /// Build the report entry for `frame`
    pub fn inspect(&self, frame: &Frame, timestamp: f64, origin: EntryOrigin) -> ReportEntry {
        let decoded = self.decoder.as_ref().and_then(|d| d.decode(frame));
        ReportEntry::from_frame(frame, timestamp, origin)
            .with_findings(self.findings(frame))
            .with_signals(decoded)
    }
}

impl std::fmt::Debug for FrameInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameInspector")
            .field("knowledge_base", &self.knowledge_base.is_some())
            .field("decoder", &self.decoder.is_some())
            .field("detect_diagnostics", &self.detect_diagnostics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RpmDecoder;

    impl SignalDecoder for RpmDecoder {
        fn decode(&self, frame: &Frame) -> Option<String> {
            (frame.arbitration_id == 0x0C9)
                .then(|| format!("EngineSpeed={}", u16::from_be_bytes([frame.data[0], frame.data[1]])))
        }
    }

    #[test]
    fn test_inspect_with_decoder() {
        let inspector = FrameInspector::new(None).with_decoder(Arc::new(RpmDecoder));
        let frame = Frame::new(0.5, 0, 0x0C9, vec![0x03, 0x20], false).unwrap();
        let entry = inspector.inspect(&frame, 0.5, EntryOrigin::Logged);
        assert_eq!(entry.decoded_signals.as_deref(), Some("EngineSpeed=800"));
        assert!(entry.findings.is_empty());
    }

    #[test]
    fn test_detection_can_be_disabled() {
        let frame = Frame::new(0.0, 0, 0x7E0, vec![0x03, 0x22, 0xF1, 0x90], false).unwrap();
        let inspector = FrameInspector::new(None);
        assert_eq!(inspector.findings(&frame).len(), 1);
        let inspector = inspector.detect_diagnostics(false);
        assert!(inspector.findings(&frame).is_empty());
    }
}
