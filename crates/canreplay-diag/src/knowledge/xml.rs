//! XML stages: native CANdela documents and ODX-like namespaced exports

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::{parse_identifier, KbEntry, KnowledgeBase, LoadError};
use crate::uds::parse_display_code;

/// Minimal element tree; names are namespace-stripped local names
#[derive(Debug, Default)]
pub(super) struct Element {
    pub name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Self {
        let attributes = start
            .attributes()
            .filter_map(Result::ok)
            .map(|a| {
                (
                    String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned(),
                    String::from_utf8_lossy(&a.value).into_owned(),
                )
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            attributes,
            ..Self::default()
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Own and descendant text, trimmed; `None` when empty
    fn text(&self) -> Option<String> {
        let mut out = String::new();
        self.collect_text(&mut out);
        let trimmed = out.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.children {
            child.collect_text(out);
        }
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is(name))
    }

    /// Text of the first direct child matching any of `names`
    fn child_text(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|n| self.child(n))
            .find_map(Element::text)
    }

    /// First descendant (depth first) with the given name
    fn find(&self, name: &str) -> Option<&Element> {
        self.children
            .iter()
            .find_map(|c| if c.is(name) { Some(c) } else { c.find(name) })
    }

    fn descendants<'a>(&'a self, name: &str, out: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.is(name) {
                out.push(child);
            }
            child.descendants(name, out);
        }
    }

    fn all(&self, name: &str) -> Vec<&Element> {
        let mut out = Vec::new();
        self.descendants(name, &mut out);
        out
    }
}

/// Parse a document into an element tree
pub(super) fn parse_document(content: &str) -> Result<Element, LoadError> {
    let mut reader = Reader::from_str(content);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(Element::open(&start)),
            Ok(Event::Empty(start)) => attach(&mut stack, &mut root, Element::open(&start)),
            Ok(Event::End(_)) => {
                if let Some(element) = stack.pop() {
                    attach(&mut stack, &mut root, element);
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.decode().unwrap_or_default());
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::GeneralRef(reference)) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&resolve_entity(&reference.decode().unwrap_or_default()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LoadError::Xml(format!(
                    "at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(LoadError::Xml(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or_else(|| LoadError::Xml("document has no root element".to_string()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        _ => {
            let code = name
                .strip_prefix("#x")
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| name.strip_prefix('#').and_then(|d| d.parse().ok()));
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| format!("&{};", name))
        }
    }
}

/// Display name of a CANdela element: `NAME/TUV`, falling back to `NAME`
fn candela_name(element: &Element) -> Option<String> {
    let name = element.find("NAME")?;
    name.find("TUV").and_then(Element::text).or_else(|| name.text())
}

/// Native CANdela layout: `<DID n="decimal">` and `<DTC>` with `DISPLAYCODE`
pub(super) fn load_candela(root: &Element, kb: &mut KnowledgeBase) {
    for did in root.all("DID") {
        let Some(id) = did.attr("n").and_then(|n| n.trim().parse::<u32>().ok()) else {
            continue;
        };
        let qualifier = did.find("QUAL").and_then(Element::text);
        let name = candela_name(did)
            .or_else(|| qualifier.clone())
            .unwrap_or_else(|| format!("DID_0x{:04X}", id));
        let mut entry = KbEntry::did(id, name);
        entry.description = qualifier;
        kb.insert_did(entry);
    }

    let mut dtcs = root.all("DTC");
    if dtcs.is_empty() {
        dtcs = root.all("TROUBLECODE");
    }
    for dtc in dtcs {
        let id = dtc
            .find("DISPLAYCODE")
            .and_then(Element::text)
            .and_then(|code| parse_display_code(&code))
            .or_else(|| dtc.attr("n").and_then(|n| n.trim().parse::<u32>().ok()));
        let Some(id) = id else {
            continue;
        };
        let name = candela_name(dtc).unwrap_or_else(|| format!("DTC_0x{:04X}", id));
        let mut entry = KbEntry::dtc(id, name);
        entry.severity = dtc
            .find("SEVERITY")
            .and_then(Element::text)
            .or_else(|| dtc.attr("severity").map(str::to_string));
        kb.insert_dtc(entry);
    }
}

const DESCRIPTION_TAGS: &[&str] = &["DESC", "LONG-NAME", "DESCRIPTION", "ANNOTATION"];

/// ODX-like layout: `DIAG-DATA-IDENTIFIER`, `DTC` and `DIAG-SERVICE` records
pub(super) fn load_odx(root: &Element, kb: &mut KnowledgeBase) {
    for record in root.all("DIAG-DATA-IDENTIFIER") {
        let name = record.child_text(&["SHORT-NAME", "ID"]);
        let id = record
            .child_text(&["IDENTIFIER-VALUE", "VALUE"])
            .and_then(|v| parse_identifier(&v));
        let (Some(name), Some(id)) = (name, id) else {
            continue;
        };
        let mut entry = KbEntry::did(id, name);
        entry.description = record.child_text(DESCRIPTION_TAGS);
        entry.length = record
            .child_text(&["LENGTH", "BYTE-SIZE"])
            .and_then(|l| l.parse().ok());
        kb.insert_did(entry);
    }

    for record in root.all("DTC") {
        let name = record.child_text(&["SHORT-NAME", "ID"]);
        let id = record
            .child_text(&["IDENTIFIER-VALUE", "VALUE", "TROUBLE-CODE", "DISPLAY-TROUBLE-CODE"])
            .and_then(|v| parse_identifier(&v).or_else(|| parse_display_code(&v)));
        let (Some(name), Some(id)) = (name, id) else {
            continue;
        };
        let mut entry = KbEntry::dtc(id, name);
        entry.description = record.child_text(DESCRIPTION_TAGS);
        entry.severity = record.child_text(&["SEVERITY"]);
        kb.insert_dtc(entry);
    }

    for record in root.all("DIAG-SERVICE") {
        let sid = record
            .child_text(&["SERVICE-ID", "SID"])
            .and_then(|v| parse_identifier(&v))
            .and_then(|v| u8::try_from(v).ok());
        if let (Some(sid), Some(name)) = (sid, record.child_text(&["SHORT-NAME"])) {
            kb.insert_service(sid, name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_document_tree() {
        let root = parse_document(
            r#"<a:root xmlns:a="urn:x"><a:item key="1">x &lt; y<![CDATA[!]]></a:item><empty/></a:root>"#,
        )
        .unwrap();
        assert_eq!(root.name, "root");
        let item = root.child("ITEM").unwrap();
        assert_eq!(item.attr("key"), Some("1"));
        assert_eq!(item.text().as_deref(), Some("x < y!"));
        assert!(root.child("empty").is_some());
    }

    #[test]
    fn test_parse_document_rejects_mismatched_tags() {
        assert!(matches!(parse_document("<a><b></a>"), Err(LoadError::Xml(_))));
        assert!(matches!(parse_document("<a><b>"), Err(LoadError::Xml(_))));
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("amp"), "&");
        assert_eq!(resolve_entity("#x41"), "A");
        assert_eq!(resolve_entity("#66"), "B");
        assert_eq!(resolve_entity("nbsp"), "&nbsp;");
    }
}
