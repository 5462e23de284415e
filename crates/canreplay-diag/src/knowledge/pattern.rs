//! Regex stage for exports that are not well-formed XML

use regex::Regex;

use super::{KbEntry, KnowledgeBase, LoadError};

/// DID patterns, most specific first; each captures `id` (hex) and `name`
const DID_PATTERNS: &[&str] = &[
    r#"(?is)<DIAG-DATA-IDENTIFIER[^>]*>.*?<SHORT-NAME>(?P<name>[^<]+)</SHORT-NAME>.*?<IDENTIFIER-VALUE>\s*(?:0x)?(?P<id>[0-9A-F]{1,4})\s*</IDENTIFIER-VALUE>"#,
    r#"(?is)DataIdentifier\s+0x(?P<id>[0-9A-F]{1,4})\s*\{\s*name\s*=\s*"(?P<name>[^"]+)""#,
    r#"(?is)DID_\w+\s*=\s*(?:0x)?(?P<id>[0-9A-F]{1,4})\s*;?\s*/\*(?P<name>[^*]+)\*/"#,
    r#"(?is)(?:SHORT-NAME|ID)\s*[=>]\s*["']?(?P<name>[^"'\s<>]+)["']?\s*(?:IDENTIFIER-VALUE|VALUE)\s*[=>]\s*["']?(?:0x)?(?P<id>[0-9A-F]{1,4})\b"#,
];

/// DTC patterns; values may be up to 24 bits
const DTC_PATTERNS: &[&str] = &[
    r#"(?is)<DTC[^>]*>.*?<SHORT-NAME>(?P<name>[^<]+)</SHORT-NAME>.*?<(?:IDENTIFIER-VALUE|TROUBLE-CODE)>\s*(?:0x)?(?P<id>[0-9A-F]{1,6})\s*</(?:IDENTIFIER-VALUE|TROUBLE-CODE)>"#,
    r#"(?is)TroubleCode\s+0x(?P<id>[0-9A-F]{1,6})\s*\{\s*name\s*=\s*"(?P<name>[^"]+)""#,
    r#"(?is)DTC_\w+\s*=\s*(?:0x)?(?P<id>[0-9A-F]{1,6})\s*;?\s*/\*(?P<name>[^*]+)\*/"#,
];

/// Scan `content` with every pattern; the first match for an ID wins
pub(super) fn load_patterns(content: &str, kb: &mut KnowledgeBase) -> Result<(), LoadError> {
    for (id, name) in scan(DID_PATTERNS, content)? {
        if kb.lookup_did(id).is_none() {
            kb.insert_did(KbEntry::did(id, name));
        }
    }
    for (id, name) in scan(DTC_PATTERNS, content)? {
        if kb.lookup_dtc(id).is_none() {
            kb.insert_dtc(KbEntry::dtc(id, name));
        }
    }
    Ok(())
}

fn scan(patterns: &[&str], content: &str) -> Result<Vec<(u32, String)>, LoadError> {
    let mut found = Vec::new();
    for pattern in patterns {
        let regex = Regex::new(pattern)?;
        for caps in regex.captures_iter(content) {
            let (Some(id), Some(name)) = (caps.name("id"), caps.name("name")) else {
                continue;
            };
            let name = name.as_str().trim();
            if name.is_empty() {
                continue;
            }
            if let Ok(id) = u32::from_str_radix(id.as_str(), 16) {
                found.push((id, name.to_string()));
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for pattern in DID_PATTERNS.iter().chain(DTC_PATTERNS) {
            assert!(Regex::new(pattern).is_ok(), "{}", pattern);
        }
    }

    #[test]
    fn test_key_value_pattern() {
        let mut kb = KnowledgeBase::new();
        load_patterns("SHORT-NAME=\"BatteryVoltage\" VALUE=\"0xF40D\"", &mut kb).unwrap();
        assert_eq!(kb.lookup_did(0xF40D).unwrap().name, "BatteryVoltage");
    }

    #[test]
    fn test_first_match_wins() {
        let mut kb = KnowledgeBase::new();
        let content = "DataIdentifier 0xF190 { name = \"VIN\" }\nDID_X = 0xF190; /* Other */";
        load_patterns(content, &mut kb).unwrap();
        assert_eq!(kb.lookup_did(0xF190).unwrap().name, "VIN");
    }
}
