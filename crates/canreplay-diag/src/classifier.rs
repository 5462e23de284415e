//! UDS payload classification into DID / DTC / SecurityAccess findings
//!
//! Candidate extraction is purely structural. Resolution then applies the
//! knowledge-base precedence: a loaded knowledge base is authoritative for
//! DIDs and DTCs, and heuristics only apply when none is loaded.

use tracing::debug;

use canreplay_core::{
    Confidence, DiagnosticFinding, FindingSource, FindingSubject, Frame, SecurityAction,
};

use crate::isotp::{reconstruct, IsoTpSegment};
use crate::knowledge::KnowledgeBase;
use crate::uds::{manufacturer_for_did, UdsService};

/// Structural match on a UDS payload, before knowledge-base resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Did { service: UdsService, did: u32 },
    Dtc { service: UdsService, dtc: u32, status: Option<u8> },
    SecurityAccess { level: u8, action: SecurityAction },
}

/// Extract candidates from a UDS payload (byte 0 is the service ID)
pub fn extract_candidates(payload: &[u8]) -> Vec<Candidate> {
    let Some(&sid) = payload.first() else {
        return Vec::new();
    };
    let service = UdsService::from(sid);

    match service {
        UdsService::ReadDataByIdentifier | UdsService::WriteDataByIdentifier
            if payload.len() >= 3 =>
        {
            let did = u16::from_be_bytes([payload[1], payload[2]]) as u32;
            vec![Candidate::Did { service, did }]
        }
        UdsService::ReadDtcInformation if payload.len() >= 3 => payload[2..]
            .chunks_exact(4)
            .filter(|stride| stride.iter().any(|&b| b != 0))
            .map(|stride| Candidate::Dtc {
                service,
                dtc: u16::from_be_bytes([stride[0], stride[1]]) as u32,
                status: Some(stride[2]),
            })
            .collect(),
        UdsService::ClearDiagnosticInformation if payload.len() >= 4 => {
            let dtc = u16::from_be_bytes([payload[1], payload[2]]) as u32;
            vec![Candidate::Dtc {
                service,
                dtc,
                status: None,
            }]
        }
        UdsService::SecurityAccess if payload.len() >= 2 => {
            let level = payload[1];
            vec![Candidate::SecurityAccess {
                level,
                action: SecurityAction::from_sub_function(level),
            }]
        }
        _ => Vec::new(),
    }
}

/// Classify one ISO-TP segment
///
/// Only single and first frames carry a service ID; other segments yield
/// nothing. `kb` is `None` when no knowledge base is loaded.
pub fn classify(segment: &IsoTpSegment, kb: Option<&KnowledgeBase>) -> Vec<DiagnosticFinding> {
    if !segment.carries_service() {
        return Vec::new();
    }
    extract_candidates(&segment.payload)
        .into_iter()
        .filter_map(|candidate| resolve(candidate, kb))
        .collect()
}

/// Reconstruct and classify a frame
pub fn classify_frame(frame: &Frame, kb: Option<&KnowledgeBase>) -> Vec<DiagnosticFinding> {
    classify(&reconstruct(frame), kb)
}

fn service_name(service: UdsService, kb: Option<&KnowledgeBase>) -> String {
    kb.and_then(|kb| kb.service_name(service.into()))
        .unwrap_or_else(|| service.name())
        .to_string()
}

fn did_confidence(did: u32) -> Confidence {
    if manufacturer_for_did(did).is_some() {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

fn resolve(candidate: Candidate, kb: Option<&KnowledgeBase>) -> Option<DiagnosticFinding> {
    match candidate {
        Candidate::Did { service, did } => {
            let finding = match kb {
                Some(kb) => {
                    let Some(entry) = kb.lookup_did(did) else {
                        debug!(did = format!("0x{:04X}", did), "DID not confirmed by knowledge base");
                        return None;
                    };
                    DiagnosticFinding {
                        subject: FindingSubject::Did {
                            did,
                            manufacturer: None,
                            category: Some(entry.category.to_string()),
                        },
                        source: FindingSource::Database,
                        confidence: Confidence::High,
                        label: entry.name.clone(),
                        service: service_name(service, Some(kb)),
                    }
                }
                None => DiagnosticFinding {
                    subject: FindingSubject::Did {
                        did,
                        manufacturer: manufacturer_for_did(did).map(str::to_string),
                        category: None,
                    },
                    source: FindingSource::Heuristic,
                    confidence: did_confidence(did),
                    label: format!("DID_0x{:04X}", did),
                    service: service_name(service, None),
                },
            };
            Some(finding)
        }
        Candidate::Dtc {
            service,
            dtc,
            status,
        } => {
            let finding = match kb {
                Some(kb) => {
                    let Some(entry) = kb.lookup_dtc(dtc) else {
                        debug!(dtc = format!("0x{:04X}", dtc), "DTC not confirmed by knowledge base");
                        return None;
                    };
                    DiagnosticFinding {
                        subject: FindingSubject::Dtc {
                            dtc,
                            status,
                            severity: entry.severity.clone(),
                        },
                        source: FindingSource::Database,
                        confidence: Confidence::High,
                        label: entry.name.clone(),
                        service: service_name(service, Some(kb)),
                    }
                }
                None => DiagnosticFinding {
                    subject: FindingSubject::Dtc {
                        dtc,
                        status,
                        severity: None,
                    },
                    source: FindingSource::Heuristic,
                    confidence: Confidence::High,
                    label: format!("DTC_0x{:04X}", dtc),
                    service: service_name(service, None),
                },
            };
            Some(finding)
        }
        Candidate::SecurityAccess { level, action } => Some(DiagnosticFinding {
            subject: FindingSubject::SecurityAccess { level, action },
            source: FindingSource::Heuristic,
            confidence: Confidence::High,
            label: format!("{} (Level {})", action, level),
            service: service_name(UdsService::SecurityAccess, kb),
        }),
    }
}
