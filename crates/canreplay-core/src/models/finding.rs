//! Diagnostic findings attached to report entries

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of diagnostic finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Did,
    Dtc,
    SecurityAccess,
}

/// Where the label of a finding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    /// Confirmed against a loaded knowledge base
    Database,
    /// Pattern match on the raw service payload
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// SecurityAccess (0x27) step, from the parity of the sub-function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityAction {
    RequestSeed,
    SendKey,
}

impl SecurityAction {
    /// Odd sub-functions request a seed, even ones send the key
    pub fn from_sub_function(sub_function: u8) -> Self {
        if sub_function % 2 == 1 {
            Self::RequestSeed
        } else {
            Self::SendKey
        }
    }
}

impl fmt::Display for SecurityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestSeed => write!(f, "RequestSeed"),
            Self::SendKey => write!(f, "SendKey"),
        }
    }
}

/// What a finding refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingSubject {
    Did {
        did: u32,
        /// Manufacturer whose DID range contains the value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        manufacturer: Option<String>,
        /// Knowledge-base category (Diagnostic, Routine, ...)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<String>,
    },
    Dtc {
        dtc: u32,
        /// DTC status byte, when the payload carries one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<String>,
    },
    SecurityAccess {
        level: u8,
        action: SecurityAction,
    },
}

/// A DID, DTC or SecurityAccess observation on one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticFinding {
    #[serde(flatten)]
    pub subject: FindingSubject,
    pub source: FindingSource,
    pub confidence: Confidence,
    /// Knowledge-base name, or a generated `DID_0x....` style label
    pub label: String,
    /// Name of the UDS service that carried the value
    pub service: String,
}

impl DiagnosticFinding {
    pub fn kind(&self) -> FindingKind {
        match self.subject {
            FindingSubject::Did { .. } => FindingKind::Did,
            FindingSubject::Dtc { .. } => FindingKind::Dtc,
            FindingSubject::SecurityAccess { .. } => FindingKind::SecurityAccess,
        }
    }

    /// Numeric DID or DTC value; absent for SecurityAccess
    pub fn value(&self) -> Option<u32> {
        match self.subject {
            FindingSubject::Did { did, .. } => Some(did),
            FindingSubject::Dtc { dtc, .. } => Some(dtc),
            FindingSubject::SecurityAccess { .. } => None,
        }
    }
}

impl fmt::Display for DiagnosticFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.subject, self.source) {
            (FindingSubject::Did { did, category, .. }, FindingSource::Database) => {
                write!(f, "DID 0x{:04X} ({})", did, self.label)?;
                if let Some(category) = category {
                    write!(f, " - {}", category)?;
                }
                Ok(())
            }
            (FindingSubject::Did { did, manufacturer, .. }, FindingSource::Heuristic) => {
                write!(f, "DID 0x{:04X} - {} ({})", did, self.service, self.confidence)?;
                if let Some(manufacturer) = manufacturer {
                    write!(f, " [{}]", manufacturer)?;
                }
                Ok(())
            }
            (FindingSubject::Dtc { dtc, severity, .. }, FindingSource::Database) => {
                write!(f, "DTC 0x{:04X} ({})", dtc, self.label)?;
                if let Some(severity) = severity {
                    write!(f, " - Severity: {}", severity)?;
                }
                Ok(())
            }
            (FindingSubject::Dtc { dtc, .. }, FindingSource::Heuristic) => {
                write!(f, "DTC 0x{:04X} - {} ({})", dtc, self.service, self.confidence)
            }
            (FindingSubject::SecurityAccess { level, action }, _) => {
                write!(f, "SecurityAccess {} - Level {}", action, level)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heuristic_did(did: u32) -> DiagnosticFinding {
        DiagnosticFinding {
            subject: FindingSubject::Did {
                did,
                manufacturer: Some("BMW".to_string()),
                category: None,
            },
            source: FindingSource::Heuristic,
            confidence: Confidence::High,
            label: format!("DID_0x{:04X}", did),
            service: "ReadDataByIdentifier".to_string(),
        }
    }

    #[test]
    fn test_security_action_parity() {
        assert_eq!(SecurityAction::from_sub_function(0x01), SecurityAction::RequestSeed);
        assert_eq!(SecurityAction::from_sub_function(0x02), SecurityAction::SendKey);
        assert_eq!(SecurityAction::from_sub_function(0x11), SecurityAction::RequestSeed);
    }

    #[test]
    fn test_display_heuristic_did() {
        let finding = heuristic_did(0xF0A0);
        assert_eq!(finding.kind(), FindingKind::Did);
        assert_eq!(finding.value(), Some(0xF0A0));
        assert_eq!(
            finding.to_string(),
            "DID 0xF0A0 - ReadDataByIdentifier (HIGH) [BMW]"
        );
    }

    #[test]
    fn test_serialize_flattens_subject() {
        let json = serde_json::to_value(heuristic_did(0xF190)).unwrap();
        assert_eq!(json["kind"], "did");
        assert_eq!(json["did"], 0xF190);
        assert_eq!(json["source"], "heuristic");
        assert!(json.get("category").is_none());
    }
}
