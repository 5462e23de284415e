//! Diagnostic knowledge base (DID/DTC names) loaded from CDD/ODX exports
//!
//! Loading runs three stages in order and keeps the first that yields
//! entries: native CANdela XML, ODX-like namespaced XML, and a regex scan
//! over the raw text for files that are not well-formed XML.

mod pattern;
mod xml;

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use canreplay_core::KnowledgeBaseSummary;

use crate::uds::UdsService;

/// Errors while loading a knowledge base
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("No DID or DTC entries found")]
    NoEntriesFound,
}

/// Category of a knowledge base entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryCategory {
    Diagnostic,
    Routine,
    Dtc,
    Security,
}

impl EntryCategory {
    /// Infer the category from keywords in an entry name
    pub fn infer(name: &str) -> Self {
        let name = name.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
        if has(&["dtc", "trouble", "fault", "error"]) {
            Self::Dtc
        } else if has(&["routine", "test", "check"]) {
            Self::Routine
        } else if has(&["security", "access", "key", "seed"]) {
            Self::Security
        } else {
            Self::Diagnostic
        }
    }
}

impl fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Diagnostic => "Diagnostic",
            Self::Routine => "Routine",
            Self::Dtc => "DTC",
            Self::Security => "Security",
        };
        write!(f, "{}", s)
    }
}

/// A named DID or DTC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbEntry {
    pub id: u32,
    pub name: String,
    pub category: EntryCategory,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// Data length in bytes, when the source declares it
    #[serde(default)]
    pub length: Option<usize>,
}

impl KbEntry {
    pub fn did(id: u32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            category: EntryCategory::infer(&name),
            name,
            description: None,
            severity: None,
            length: None,
        }
    }

    pub fn dtc(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: EntryCategory::Dtc,
            description: None,
            severity: None,
            length: None,
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }
}

/// Lookup tables for DIDs, DTCs and service names
///
/// Read-only after loading; share it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    dids: HashMap<u32, KbEntry>,
    dtcs: HashMap<u32, KbEntry>,
    services: HashMap<u8, String>,
    source: Option<String>,
}

impl KnowledgeBase {
    /// Empty knowledge base with the standard UDS service names
    pub fn new() -> Self {
        let mut kb = Self::default();
        for sid in 0..=u8::MAX {
            let service = UdsService::from(sid);
            if !matches!(service, UdsService::Unknown(_)) {
                kb.services.insert(sid, service.name().to_string());
            }
        }
        kb
    }

    /// Parse knowledge base content, trying each stage in turn
    pub fn load(content: &str) -> Result<Self, LoadError> {
        let mut kb = Self::new();

        if looks_like_xml(content) {
            match xml::parse_document(content) {
                Ok(root) => {
                    if root.name.eq_ignore_ascii_case("CANDELA") {
                        xml::load_candela(&root, &mut kb);
                        debug!(dids = kb.dids.len(), dtcs = kb.dtcs.len(), "Native CANdela stage");
                    }
                    if kb.is_empty() {
                        xml::load_odx(&root, &mut kb);
                        debug!(dids = kb.dids.len(), dtcs = kb.dtcs.len(), "ODX stage");
                    }
                }
                Err(e) => warn!(error = %e, "Knowledge base is not well-formed XML"),
            }
        }

        if kb.is_empty() {
            pattern::load_patterns(content, &mut kb)?;
            debug!(dids = kb.dids.len(), dtcs = kb.dtcs.len(), "Pattern stage");
        }

        if kb.is_empty() {
            return Err(LoadError::NoEntriesFound);
        }
        Ok(kb)
    }

    /// Read and parse a knowledge base file
    pub fn load_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        let mut kb = Self::load(&content)?;
        kb.source = Some(path.display().to_string());
        info!(
            path = %path.display(),
            dids = kb.dids.len(),
            dtcs = kb.dtcs.len(),
            "Loaded diagnostic knowledge base"
        );
        Ok(kb)
    }

    /// Load a knowledge base if a path is given, falling back to heuristic
    /// mode (`None`) on any failure
    pub fn load_optional(path: Option<&Path>) -> Option<Arc<Self>> {
        let path = path?;
        match Self::load_path(path) {
            Ok(kb) => Some(Arc::new(kb)),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Knowledge base unavailable, using heuristic detection"
                );
                None
            }
        }
    }

    pub fn insert_did(&mut self, entry: KbEntry) {
        self.dids.insert(entry.id, entry);
    }

    pub fn insert_dtc(&mut self, entry: KbEntry) {
        self.dtcs.insert(entry.id, entry);
    }

    pub fn insert_service(&mut self, sid: u8, name: impl Into<String>) {
        self.services.insert(sid, name.into());
    }

    pub fn lookup_did(&self, did: u32) -> Option<&KbEntry> {
        self.dids.get(&did)
    }

    pub fn lookup_dtc(&self, dtc: u32) -> Option<&KbEntry> {
        self.dtcs.get(&dtc)
    }

    pub fn service_name(&self, sid: u8) -> Option<&str> {
        self.services.get(&sid).map(String::as_str)
    }

    pub fn did_count(&self) -> usize {
        self.dids.len()
    }

    pub fn dtc_count(&self) -> usize {
        self.dtcs.len()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.dids.is_empty() && self.dtcs.is_empty()
    }

    pub fn summary(&self) -> KnowledgeBaseSummary {
        KnowledgeBaseSummary {
            source: self.source.clone(),
            dids: self.dids.len(),
            dtcs: self.dtcs.len(),
        }
    }
}

fn looks_like_xml(content: &str) -> bool {
    content.trim_start_matches('\u{feff}').trim_start().starts_with('<')
}

/// Parse a numeric identifier: `0x` hex, all-digit decimal, else bare hex
fn parse_identifier(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return text.parse().ok();
    }
    u32::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    const CANDELA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CANDELA>
  <ECUDOC>
    <DIDS>
      <DID n="61840"><QUAL>VIN</QUAL><NAME><TUV>Vehicle Identification Number</TUV></NAME></DID>
      <DID n="61585"><NAME><TUV>Security Seed Status</TUV></NAME></DID>
    </DIDS>
    <DTCS>
      <DTC><DISPLAYCODE>P0101</DISPLAYCODE><NAME><TUV>Mass Air Flow Circuit</TUV></NAME></DTC>
    </DTCS>
  </ECUDOC>
</CANDELA>"#;

    const ODX: &str = r#"<?xml version="1.0"?>
<odx:ODX xmlns:odx="http://www.asam.net/odx">
  <odx:DIAG-LAYER-CONTAINER>
    <odx:DIAG-DATA-IDENTIFIER>
      <odx:SHORT-NAME>EngineRoutineCheck</odx:SHORT-NAME>
      <odx:IDENTIFIER-VALUE>0xF0A0</odx:IDENTIFIER-VALUE>
      <odx:LENGTH>4</odx:LENGTH>
      <odx:DESC>Routine status &amp; result</odx:DESC>
    </odx:DIAG-DATA-IDENTIFIER>
    <odx:DIAG-COMMON-DATA>
      <odx:DTC>
        <odx:SHORT-NAME>CrankSensor</odx:SHORT-NAME>
        <odx:IDENTIFIER-VALUE>P0335</odx:IDENTIFIER-VALUE>
        <odx:SEVERITY>High</odx:SEVERITY>
      </odx:DTC>
    </odx:DIAG-COMMON-DATA>
    <odx:DIAG-SERVICE>
      <odx:SHORT-NAME>OemReadData</odx:SHORT-NAME>
      <odx:SERVICE-ID>0xBA</odx:SERVICE-ID>
    </odx:DIAG-SERVICE>
  </odx:DIAG-LAYER-CONTAINER>
</odx:ODX>"#;

    #[test]
    fn test_load_native_candela() {
        let kb = KnowledgeBase::load(CANDELA).unwrap();
        assert_eq!(kb.did_count(), 2);
        let vin = kb.lookup_did(0xF190).unwrap();
        assert_eq!(vin.name, "Vehicle Identification Number");
        assert_eq!(vin.description.as_deref(), Some("VIN"));
        assert_eq!(vin.category, EntryCategory::Diagnostic);
        assert_eq!(kb.lookup_did(0xF091).unwrap().category, EntryCategory::Security);
        assert_eq!(kb.lookup_dtc(0x0101).unwrap().name, "Mass Air Flow Circuit");
    }

    #[test]
    fn test_load_odx_namespaced() {
        let kb = KnowledgeBase::load(ODX).unwrap();
        let did = kb.lookup_did(0xF0A0).unwrap();
        assert_eq!(did.name, "EngineRoutineCheck");
        assert_eq!(did.category, EntryCategory::Routine);
        assert_eq!(did.length, Some(4));
        assert_eq!(did.description.as_deref(), Some("Routine status & result"));

        let dtc = kb.lookup_dtc(0x0335).unwrap();
        assert_eq!(dtc.severity.as_deref(), Some("High"));
        assert_eq!(kb.service_name(0xBA), Some("OemReadData"));
        assert_eq!(kb.service_name(0x22), Some("ReadDataByIdentifier"));
    }

    #[test]
    fn test_load_pattern_fallback() {
        let content = r#"
            DID_VIN = 0xF190; /* Vehicle Identification Number */
            DataIdentifier 0xF18C { name = "ECU Serial Number" }
            DTC_MAF = 0x0101; /* Mass Air Flow */
        "#;
        let kb = KnowledgeBase::load(content).unwrap();
        assert_eq!(kb.lookup_did(0xF190).unwrap().name, "Vehicle Identification Number");
        assert_eq!(kb.lookup_did(0xF18C).unwrap().name, "ECU Serial Number");
        assert_eq!(kb.lookup_dtc(0x0101).unwrap().name, "Mass Air Flow");
    }

    #[test]
    fn test_malformed_xml_falls_back_to_patterns() {
        let content = "<DIAG-DATA-IDENTIFIER><SHORT-NAME>Odometer</SHORT-NAME>\
                       <IDENTIFIER-VALUE>0xF1A0</IDENTIFIER-VALUE></DIAG-DATA-IDENTIFIER></broken>";
        let kb = KnowledgeBase::load(content).unwrap();
        assert_eq!(kb.lookup_did(0xF1A0).unwrap().name, "Odometer");
    }

    #[test]
    fn test_no_entries() {
        assert!(matches!(
            KnowledgeBase::load("<root><nothing/></root>"),
            Err(LoadError::NoEntriesFound)
        ));
        assert!(matches!(
            KnowledgeBase::load("just some text"),
            Err(LoadError::NoEntriesFound)
        ));
    }

    #[test]
    fn test_load_path_and_optional() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CANDELA.as_bytes()).unwrap();

        let kb = KnowledgeBase::load_optional(Some(file.path())).unwrap();
        let summary = kb.summary();
        assert_eq!(summary.dids, 2);
        assert_eq!(summary.dtcs, 1);
        assert!(summary.source.is_some());

        let missing = file.path().with_extension("missing");
        assert!(KnowledgeBase::load_optional(Some(&missing)).is_none());
        assert!(KnowledgeBase::load_optional(None).is_none());
    }

    #[test]
    fn test_category_inference() {
        assert_eq!(EntryCategory::infer("Fault Memory"), EntryCategory::Dtc);
        assert_eq!(EntryCategory::infer("Self Test Result"), EntryCategory::Routine);
        assert_eq!(EntryCategory::infer("SeedKeyCounter"), EntryCategory::Security);
        assert_eq!(EntryCategory::infer("Odometer"), EntryCategory::Diagnostic);
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_identifier("0xF190"), Some(0xF190));
        assert_eq!(parse_identifier("F190"), Some(0xF190));
        assert_eq!(parse_identifier(" 61840 "), Some(0xF190));
        assert_eq!(parse_identifier("name"), None);
    }
}
