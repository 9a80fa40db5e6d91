//! Exclusive XML canonicalization (`xml-exc-c14n#`, comments omitted).
//!
//! Covers the subset of XML this gateway emits and signs: elements,
//! attributes, namespace declarations, text and CDATA. Namespace
//! declarations are rendered where they are visibly utilized, attributes
//! are ordered by namespace URI then local name, and empty elements are
//! written as start/end pairs.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Prefix to namespace URI. The default namespace uses the empty prefix.
type Scope = BTreeMap<String, String>;

pub fn canonicalize(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::with_capacity(xml.len());

    // Declarations in scope in the input, and those already written to the output.
    let mut declared: Vec<Scope> = vec![Scope::new()];
    let mut rendered: Vec<Scope> = vec![Scope::new()];

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                open_element(&mut out, &e, &mut declared, &mut rendered)?;
            }
            Event::Empty(e) => {
                let name = open_element(&mut out, &e, &mut declared, &mut rendered)?;
                close_element(&mut out, &name, &mut declared, &mut rendered);
            }
            Event::End(e) => {
                let name = utf8(e.name().as_ref())?.to_string();
                close_element(&mut out, &name, &mut declared, &mut rendered);
            }
            Event::Text(e) => {
                // Whitespace outside the document element is dropped
                if declared.len() > 1 {
                    let text = e.unescape().map_err(xml_error)?;
                    escape_text(&mut out, &text);
                }
            }
            Event::CData(e) => {
                if declared.len() > 1 {
                    escape_text(&mut out, utf8(&e)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

fn open_element(
    out: &mut String,
    element: &BytesStart<'_>,
    declared: &mut Vec<Scope>,
    rendered: &mut Vec<Scope>,
) -> Result<String> {
    let name = utf8(element.name().as_ref())?.to_string();

    let mut scope = declared.last().cloned().unwrap_or_default();
    let mut attributes = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        if key == "xmlns" {
            scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value);
        } else {
            attributes.push((key, value));
        }
    }

    let mut utilized = BTreeSet::new();
    utilized.insert(prefix_of(&name).to_string());
    for (key, _) in &attributes {
        if let Some((prefix, _)) = key.split_once(':') {
            utilized.insert(prefix.to_string());
        }
    }

    let parent = rendered.last().cloned().unwrap_or_default();
    let mut now_rendered = parent.clone();

    out.push('<');
    out.push_str(&name);

    for prefix in utilized {
        if prefix == "xml" {
            continue;
        }
        let uri = match scope.get(&prefix) {
            Some(uri) => uri.clone(),
            None if prefix.is_empty() => String::new(),
            None => return Err(Error::protocol(format!("Unbound namespace prefix: {prefix}"))),
        };
        let inherited = parent.get(&prefix).map(String::as_str).unwrap_or("");
        if uri == inherited && (parent.contains_key(&prefix) || uri.is_empty()) {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(&prefix);
            out.push_str("=\"");
        }
        escape_attr(out, &uri);
        out.push('"');
        now_rendered.insert(prefix, uri);
    }

    let mut sorted = Vec::with_capacity(attributes.len());
    for (key, value) in attributes {
        let (namespace, local) = match key.split_once(':') {
            Some(("xml", local)) => (XML_NS.to_string(), local.to_string()),
            Some((prefix, local)) => {
                let uri = scope.get(prefix).cloned().ok_or_else(|| {
                    Error::protocol(format!("Unbound namespace prefix: {prefix}"))
                })?;
                (uri, local.to_string())
            }
            None => (String::new(), key.clone()),
        };
        sorted.push(((namespace, local), key, value));
    }
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, key, value) in sorted {
        out.push(' ');
        out.push_str(&key);
        out.push_str("=\"");
        escape_attr(out, &value);
        out.push('"');
    }
    out.push('>');

    declared.push(scope);
    rendered.push(now_rendered);
    Ok(name)
}

fn close_element(out: &mut String, name: &str, declared: &mut Vec<Scope>, rendered: &mut Vec<Scope>) {
    out.push_str("</");
    out.push_str(name);
    out.push('>');
    declared.pop();
    rendered.pop();
}

fn prefix_of(name: &str) -> &str {
    name.split_once(':').map(|(prefix, _)| prefix).unwrap_or("")
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::protocol(format!("Invalid UTF-8 in XML: {e}")))
}

fn xml_error(e: impl std::fmt::Display) -> Error {
    Error::protocol(format!("Malformed XML: {e}"))
}
