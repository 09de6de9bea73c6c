//! XML parser that builds documents.
//!
//! This parser uses quick-xml's streaming API. Text is kept verbatim, CDATA
//! sections become text, and the XML declaration and processing
//! instructions are dropped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::trace;

use crate::document::Document;
use crate::error::{Error, Result};
use crate::node::{
    new_node, Attributes, NodeInner, NodeRef, XmlComment, XmlContent, XmlDocType, XmlElement,
    XmlText,
};

/// XML parser that builds documents.
#[derive(Debug, Clone, Default)]
pub struct XmlParser {
    skip_blank_text: bool,
}

impl XmlParser {
    /// Creates a parser that keeps all text.
    pub fn new() -> Self {
        XmlParser::default()
    }

    /// Drops text nodes that contain only whitespace.
    pub fn skip_blank_text(mut self, skip: bool) -> Self {
        self.skip_blank_text = skip;
        self
    }

    /// Parses XML from a string.
    pub fn parse_str(&self, xml: &str) -> Result<Document> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;
        self.parse_reader(&mut reader)
    }

    /// Parses XML from a file.
    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Document> {
        let file = File::open(path)?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text_start = false;
        reader.config_mut().trim_text_end = false;
        self.parse_reader(&mut reader)
    }

    fn parse_reader<R: BufRead>(&self, reader: &mut Reader<R>) -> Result<Document> {
        let mut tree = TreeBuilder::default();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    self.flush_text(&mut tree)?;
                    let element = parse_element(e, reader)?;
                    tree.open(new_node(XmlContent::Element(element)))?;
                }
                Ok(Event::End(_)) => {
                    self.flush_text(&mut tree)?;
                    tree.close();
                }
                Ok(Event::Empty(ref e)) => {
                    self.flush_text(&mut tree)?;
                    let element = parse_element(e, reader)?;
                    tree.open(new_node(XmlContent::Element(element)))?;
                    tree.close();
                }
                Ok(Event::Text(e)) => {
                    let raw =
                        std::str::from_utf8(e.as_ref()).map_err(|e| Error::Parse(e.to_string()))?;
                    let text = unescape(raw).map_err(|e| Error::Parse(e.to_string()))?;
                    tree.text.push_str(&text);
                }
                Ok(Event::CData(e)) => {
                    let raw =
                        std::str::from_utf8(e.as_ref()).map_err(|e| Error::Parse(e.to_string()))?;
                    tree.text.push_str(raw);
                }
                Ok(Event::GeneralRef(e)) => {
                    let name =
                        std::str::from_utf8(e.as_ref()).map_err(|e| Error::Parse(e.to_string()))?;
                    tree.text.push_str(&resolve_reference(name)?);
                }
                Ok(Event::Comment(e)) => {
                    self.flush_text(&mut tree)?;
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    tree.leaf(new_node(XmlContent::Comment(XmlComment::new(text))));
                }
                Ok(Event::DocType(e)) => {
                    let raw = String::from_utf8_lossy(e.as_ref()).to_string();
                    tree.doctype(parse_doctype(&raw)?)?;
                }
                Ok(Event::Decl(_)) | Ok(Event::PI(_)) => {}
                Ok(Event::Eof) => break,
                Err(e) => return Err(Error::Xml(e)),
            }
            buf.clear();
        }

        self.flush_text(&mut tree)?;
        tree.finish()
    }

    fn flush_text(&self, tree: &mut TreeBuilder) -> Result<()> {
        if tree.text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut tree.text);
        let blank = text.chars().all(char::is_whitespace);
        if tree.stack.is_empty() {
            if blank {
                return Ok(());
            }
            return Err(Error::Parse(format!(
                "text outside the root element: {:?}",
                text
            )));
        }
        if blank && self.skip_blank_text {
            return Ok(());
        }
        tree.leaf(new_node(XmlContent::Text(XmlText::new(text))));
        Ok(())
    }
}

#[derive(Default)]
struct TreeBuilder {
    doctype: Option<NodeRef>,
    root: Option<NodeRef>,
    stack: Vec<NodeRef>,
    text: String,
}

impl TreeBuilder {
    fn open(&mut self, node: NodeRef) -> Result<()> {
        match self.stack.last() {
            Some(parent) => NodeInner::add_child_to_ref(parent, node.clone()),
            None if self.root.is_some() => {
                return Err(Error::Parse("more than one root element".into()));
            }
            None => self.root = Some(node.clone()),
        }
        self.stack.push(node);
        Ok(())
    }

    fn close(&mut self) {
        self.stack.pop();
    }

    /// Adds a childless node to the open element; top-level leaves are
    /// dropped.
    fn leaf(&mut self, node: NodeRef) {
        match self.stack.last() {
            Some(parent) => NodeInner::add_child_to_ref(parent, node),
            None => trace!("dropped top-level {}", node.borrow().content().kind_name()),
        }
    }

    fn doctype(&mut self, doctype: XmlDocType) -> Result<()> {
        if self.root.is_some() || self.doctype.is_some() {
            return Err(Error::Parse("DOCTYPE must precede the root element".into()));
        }
        self.doctype = Some(new_node(XmlContent::DocumentType(doctype)));
        Ok(())
    }

    fn finish(self) -> Result<Document> {
        if !self.stack.is_empty() {
            return Err(Error::Parse(format!(
                "{} unclosed element(s)",
                self.stack.len()
            )));
        }
        let root = self
            .root
            .ok_or_else(|| Error::Parse("document has no root element".into()))?;
        Document::with_doctype(self.doctype, root)
    }
}

/// Parses an element's name and attributes, keeping attribute order.
fn parse_element<R>(e: &BytesStart, reader: &Reader<R>) -> Result<XmlElement> {
    let name = reader
        .decoder()
        .decode(e.name().as_ref())
        .map_err(|e| Error::Parse(e.to_string()))?
        .to_string();

    let mut attributes = Attributes::new();
    for attr_result in e.attributes() {
        let attr = attr_result.map_err(|e| Error::Parse(format!("Attribute error: {}", e)))?;
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(|e| Error::Parse(e.to_string()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Parse(e.to_string()))?
            .to_string();
        attributes.insert(key, value);
    }

    Ok(XmlElement::with_attributes(name, attributes))
}

/// Resolves `&name;` as a character or predefined entity reference.
fn resolve_reference(name: &str) -> Result<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => num.parse::<u32>(),
        }
        .map_err(|_| Error::Parse(format!("invalid character reference &{};", name)))?;
        return char::from_u32(code)
            .map(String::from)
            .ok_or_else(|| Error::Parse(format!("invalid character reference &{};", name)));
    }
    resolve_predefined_entity(name)
        .map(str::to_string)
        .ok_or_else(|| Error::Parse(format!("unknown entity &{};", name)))
}

/// Parses the body of a DOCTYPE declaration: a name optionally followed by
/// `PUBLIC "pub" "sys"` or `SYSTEM "sys"`. An internal subset is ignored.
fn parse_doctype(raw: &str) -> Result<XmlDocType> {
    let raw = raw.split('[').next().unwrap_or_default().trim();
    let (name, rest) = match raw.find(char::is_whitespace) {
        Some(i) => (&raw[..i], raw[i..].trim_start()),
        None => (raw, ""),
    };
    if name.is_empty() {
        return Err(Error::Parse("DOCTYPE without a name".into()));
    }

    let (public_id, system_id) = if let Some(rest) = strip_keyword(rest, "PUBLIC") {
        let (public_id, rest) = quoted(rest)?;
        let system_id = if rest.is_empty() {
            None
        } else {
            Some(quoted(rest)?.0)
        };
        (Some(public_id), system_id)
    } else if let Some(rest) = strip_keyword(rest, "SYSTEM") {
        (None, Some(quoted(rest)?.0))
    } else {
        (None, None)
    };
    Ok(XmlDocType::with_ids(name, public_id, system_id))
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| s[keyword.len()..].trim_start())
}

/// Splits a leading quoted literal off `s`.
fn quoted(s: &str) -> Result<(String, &str)> {
    let quote = s
        .chars()
        .next()
        .filter(|c| *c == '"' || *c == '\'')
        .ok_or_else(|| Error::Parse(format!("expected quoted literal in DOCTYPE: {:?}", s)))?;
    let body = &s[1..];
    let end = body
        .find(quote)
        .ok_or_else(|| Error::Parse("unterminated literal in DOCTYPE".into()))?;
    Ok((body[..end].to_string(), body[end + 1..].trim_start()))
}

/// Parses XML from a file with a default parser.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Document> {
    XmlParser::new().parse_file(path)
}

/// Parses XML from a string with a default parser.
pub fn parse_str(xml: &str) -> Result<Document> {
    XmlParser::new().parse_str(xml)
}
