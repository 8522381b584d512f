//! XML serialization of documents
//!
//! Writing produces compact XML (no indentation) so text values survive a
//! round trip unchanged. Reading drops whitespace-only text, comments,
//! processing instructions and the declaration; attributes are ignored since
//! the metadata model carries everything in elements.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::document::{NodeId, NodeKind, XmlDocument};
use super::XmlError;

fn write_err(e: impl std::fmt::Display) -> XmlError {
    XmlError::Write(e.to_string())
}

/// Serialize the subtree rooted at `node` with an XML declaration
pub fn write_document(doc: &XmlDocument, node: NodeId) -> Result<String, XmlError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
        .map_err(write_err)?;
    write_node(&mut writer, doc, node)?;
    String::from_utf8(writer.into_inner()).map_err(write_err)
}

fn write_node(
    writer: &mut Writer<Vec<u8>>,
    doc: &XmlDocument,
    node: NodeId,
) -> Result<(), XmlError> {
    match doc.kind(node) {
        Some(NodeKind::Text) => {
            let value = doc.value(node).unwrap_or_default();
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(write_err)?;
        }
        Some(NodeKind::Element) => {
            let name = doc.name(node).unwrap_or_default();
            if doc.first_child(node).is_none() {
                writer
                    .write_event(Event::Empty(BytesStart::new(name)))
                    .map_err(write_err)?;
            } else {
                writer
                    .write_event(Event::Start(BytesStart::new(name)))
                    .map_err(write_err)?;
                for child in doc.children(node) {
                    write_node(writer, doc, child)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(name)))
                    .map_err(write_err)?;
            }
        }
        None => {}
    }
    Ok(())
}

fn element_name(raw: &[u8]) -> Result<String, XmlError> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|e| XmlError::Syntax(e.to_string()))
}

/// Parse a document; the first element becomes the root
pub fn parse_document(xml: &str) -> Result<XmlDocument, XmlError> {
    let mut reader = Reader::from_str(xml);
    let mut doc: Option<XmlDocument> = None;
    let mut stack: Vec<NodeId> = Vec::new();
    let mut closed_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| XmlError::Syntax(e.to_string()))?;

        match event {
            Event::Start(e) if doc.is_none() => {
                let d = XmlDocument::new(element_name(e.name().as_ref())?);
                stack.push(d.root());
                doc = Some(d);
            }
            Event::Empty(e) if doc.is_none() => {
                doc = Some(XmlDocument::new(element_name(e.name().as_ref())?));
                closed_root = true;
            }
            Event::Start(e) => {
                let name = element_name(e.name().as_ref())?;
                let (Some(d), Some(&parent)) = (doc.as_mut(), stack.last()) else {
                    return Err(XmlError::MultipleRoots);
                };
                let id = d
                    .insert(parent, NodeKind::Element, &name, "", true)
                    .ok_or(XmlError::MultipleRoots)?;
                stack.push(id);
            }
            Event::Empty(e) => {
                let name = element_name(e.name().as_ref())?;
                let (Some(d), Some(&parent)) = (doc.as_mut(), stack.last()) else {
                    return Err(XmlError::MultipleRoots);
                };
                d.insert(parent, NodeKind::Element, &name, "", true);
            }
            Event::End(_) => {
                stack.pop();
                if stack.is_empty() {
                    closed_root = true;
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| XmlError::Syntax(e.to_string()))?;
                append_text(&mut doc, &stack, &text, closed_root)?;
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                append_text(&mut doc, &stack, &text, closed_root)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    doc.ok_or(XmlError::Empty)
}

fn append_text(
    doc: &mut Option<XmlDocument>,
    stack: &[NodeId],
    text: &str,
    closed_root: bool,
) -> Result<(), XmlError> {
    if text.trim().is_empty() {
        return Ok(());
    }
    let has_doc = doc.is_some();
    match (doc.as_mut(), stack.last()) {
        (Some(d), Some(&parent)) => {
            d.insert(parent, NodeKind::Text, "", text, true);
            Ok(())
        }
        _ if closed_root || has_doc => Err(XmlError::Syntax(
            "text outside of the root element".to_string(),
        )),
        _ => Err(XmlError::Syntax(
            "text before the root element".to_string(),
        )),
    }
}
