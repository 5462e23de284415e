//! Session report: ordered entries plus derived totals

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DiagnosticFinding, Direction, FindingSubject, Frame};

/// How an entry came to be recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrigin {
    /// Read from the log during offline analysis
    Logged,
    /// Transmitted on the bus during replay
    Sent,
    /// Transmission attempted but the bus rejected it
    SendFailed,
    /// Received from the bus while monitoring responses
    Response,
}

/// One annotated frame in a session report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Seconds: log time for analysis, elapsed session time for replay
    pub timestamp: f64,
    pub channel: u32,
    pub direction: Direction,
    pub arbitration_id: u32,
    pub is_extended: bool,
    pub raw_hex: String,
    pub origin: EntryOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_signals: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<DiagnosticFinding>,
    /// Transport error text for `SendFailed` entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportEntry {
    pub fn from_frame(frame: &Frame, timestamp: f64, origin: EntryOrigin) -> Self {
        Self {
            timestamp,
            channel: frame.channel,
            direction: frame.direction,
            arbitration_id: frame.arbitration_id,
            is_extended: frame.is_extended,
            raw_hex: frame.raw_hex(),
            origin,
            decoded_signals: None,
            findings: Vec::new(),
            error: None,
        }
    }

    pub fn with_findings(mut self, findings: Vec<DiagnosticFinding>) -> Self {
        self.findings = findings;
        self
    }

    pub fn with_signals(mut self, decoded: Option<String>) -> Self {
        self.decoded_signals = decoded;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Decoded signals and findings joined into a single display line
    pub fn annotation(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(decoded) = &self.decoded_signals {
            parts.push(decoded.clone());
        }
        parts.extend(self.findings.iter().map(ToString::to_string));
        parts.join(" | ")
    }
}

/// Per-channel counts derived from report entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTotals {
    /// All entries recorded for the channel
    pub frames: usize,
    pub sent: usize,
    pub received: usize,
    pub send_errors: usize,
}

/// Totals over all entries of a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub processed: usize,
    pub dids: usize,
    pub dtcs: usize,
    pub security_access: usize,
    pub by_channel: BTreeMap<u32, ChannelTotals>,
}

impl Totals {
    /// Count findings and per-channel traffic over `entries`
    pub fn from_entries(entries: &[ReportEntry]) -> Self {
        let mut totals = Self {
            processed: entries.len(),
            ..Self::default()
        };
        for entry in entries {
            for finding in &entry.findings {
                match finding.subject {
                    FindingSubject::Did { .. } => totals.dids += 1,
                    FindingSubject::Dtc { .. } => totals.dtcs += 1,
                    FindingSubject::SecurityAccess { .. } => totals.security_access += 1,
                }
            }
            let channel = totals.by_channel.entry(entry.channel).or_default();
            channel.frames += 1;
            match entry.origin {
                EntryOrigin::Sent => channel.sent += 1,
                EntryOrigin::SendFailed => channel.send_errors += 1,
                EntryOrigin::Response => channel.received += 1,
                EntryOrigin::Logged => {}
            }
        }
        totals
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Replay,
    Analysis,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Replay sent every frame
    Finished,
    Cancelled,
    /// Analysis iterated every frame
    Completed,
}

/// Knowledge base metadata recorded in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeBaseSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub dids: usize,
    pub dtcs: usize,
}

/// Session metadata supplied when a report is finalized
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub session_id: String,
    pub mode: RunMode,
    pub outcome: RunOutcome,
    pub duration_secs: f64,
    pub rejected_frames: usize,
    /// `None` means classification ran in heuristic mode
    pub knowledge_base: Option<KnowledgeBaseSummary>,
}

/// Final result of a replay or analysis session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub session_id: String,
    pub mode: RunMode,
    pub outcome: RunOutcome,
    pub generated_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub rejected_frames: usize,
    pub knowledge_base: Option<KnowledgeBaseSummary>,
    pub entries: Vec<ReportEntry>,
    pub totals: Totals,
    /// First label seen for each DID
    pub unique_dids: BTreeMap<u32, String>,
    /// First label seen for each DTC
    pub unique_dtcs: BTreeMap<u32, String>,
}

impl Report {
    /// Build a report; totals and unique sets are derived from `entries`
    pub fn new(entries: Vec<ReportEntry>, context: ReportContext) -> Self {
        let totals = Totals::from_entries(&entries);
        let mut unique_dids = BTreeMap::new();
        let mut unique_dtcs = BTreeMap::new();
        for finding in entries.iter().flat_map(|e| e.findings.iter()) {
            match finding.subject {
                FindingSubject::Did { did, .. } => {
                    unique_dids.entry(did).or_insert_with(|| finding.label.clone());
                }
                FindingSubject::Dtc { dtc, .. } => {
                    unique_dtcs.entry(dtc).or_insert_with(|| finding.label.clone());
                }
                FindingSubject::SecurityAccess { .. } => {}
            }
        }

        Self {
            session_id: context.session_id,
            mode: context.mode,
            outcome: context.outcome,
            generated_at: Utc::now(),
            duration_secs: context.duration_secs,
            rejected_frames: context.rejected_frames,
            knowledge_base: context.knowledge_base,
            entries,
            totals,
            unique_dids,
            unique_dtcs,
        }
    }

    pub fn with_rejected_frames(mut self, rejected: usize) -> Self {
        self.rejected_frames = rejected;
        self
    }

    /// Entries that carry at least one finding
    pub fn diagnostic_entries(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| !e.findings.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{Confidence, FindingSource, SecurityAction};

    fn finding(subject: FindingSubject, label: &str) -> DiagnosticFinding {
        DiagnosticFinding {
            subject,
            source: FindingSource::Heuristic,
            confidence: Confidence::Medium,
            label: label.to_string(),
            service: "test".to_string(),
        }
    }

    fn entry(channel: u32, origin: EntryOrigin, findings: Vec<DiagnosticFinding>) -> ReportEntry {
        let frame = Frame::new(0.0, channel, 0x7E0, vec![0x03, 0x22, 0xF1, 0x90], false).unwrap();
        ReportEntry::from_frame(&frame, 0.0, origin).with_findings(findings)
    }

    fn context() -> ReportContext {
        ReportContext {
            session_id: "test".to_string(),
            mode: RunMode::Replay,
            outcome: RunOutcome::Finished,
            duration_secs: 1.0,
            rejected_frames: 0,
            knowledge_base: None,
        }
    }

    #[test]
    fn test_totals_derived_from_entries() {
        let did = |v| FindingSubject::Did {
            did: v,
            manufacturer: None,
            category: None,
        };
        let entries = vec![
            entry(0, EntryOrigin::Sent, vec![finding(did(0xF190), "DID_0xF190")]),
            entry(0, EntryOrigin::SendFailed, vec![]),
            entry(1, EntryOrigin::Response, vec![finding(did(0xF190), "DID_0xF190")]),
            entry(
                1,
                EntryOrigin::Sent,
                vec![
                    finding(
                        FindingSubject::Dtc {
                            dtc: 0x0101,
                            status: Some(0x08),
                            severity: None,
                        },
                        "DTC_0x0101",
                    ),
                    finding(
                        FindingSubject::SecurityAccess {
                            level: 1,
                            action: SecurityAction::RequestSeed,
                        },
                        "RequestSeed",
                    ),
                ],
            ),
        ];

        let report = Report::new(entries, context());
        assert_eq!(report.totals.processed, 4);
        assert_eq!(report.totals.dids, 2);
        assert_eq!(report.totals.dtcs, 1);
        assert_eq!(report.totals.security_access, 1);
        assert_eq!(
            report.totals.by_channel[&0],
            ChannelTotals {
                frames: 2,
                sent: 1,
                received: 0,
                send_errors: 1
            }
        );
        assert_eq!(report.totals.by_channel[&1].received, 1);
        assert_eq!(report.unique_dids.len(), 1);
        assert_eq!(report.unique_dtcs.get(&0x0101).map(String::as_str), Some("DTC_0x0101"));
        assert_eq!(report.diagnostic_entries().count(), 3);
    }

    #[test]
    fn test_annotation_joins_parts() {
        let mut e = entry(
            0,
            EntryOrigin::Logged,
            vec![finding(
                FindingSubject::SecurityAccess {
                    level: 2,
                    action: SecurityAction::SendKey,
                },
                "SendKey",
            )],
        );
        e.decoded_signals = Some("EngineSpeed=800".to_string());
        assert_eq!(
            e.annotation(),
            "EngineSpeed=800 | SecurityAccess SendKey - Level 2"
        );
    }
}
