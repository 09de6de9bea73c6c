//! XML content types for tree nodes.
//!
//! This module provides `XmlContent`, which represents the content of a node:
//! an element (tag with ordered attributes), text, a comment or a document
//! type declaration.

use indexmap::IndexMap;

use crate::constants::{CONTROL_TAGS, EXECUTABLE_TAGS};

/// Insertion-ordered attribute map. Names are unique.
pub type Attributes = IndexMap<String, String>;

/// Represents the content of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlContent {
    /// An element with a qualified name and attributes.
    Element(XmlElement),
    /// Text content.
    Text(XmlText),
    /// A comment.
    Comment(XmlComment),
    /// A document type declaration.
    DocumentType(XmlDocType),
}

impl XmlContent {
    /// Returns true if this is an element node.
    pub fn is_element(&self) -> bool {
        matches!(self, XmlContent::Element(_))
    }

    /// Returns true if this is a text node.
    pub fn is_text(&self) -> bool {
        matches!(self, XmlContent::Text(_))
    }

    /// Returns true if this is a comment node.
    pub fn is_comment(&self) -> bool {
        matches!(self, XmlContent::Comment(_))
    }

    /// Returns true if this is a document type node.
    pub fn is_doctype(&self) -> bool {
        matches!(self, XmlContent::DocumentType(_))
    }

    /// Returns a reference to the element, if this is an element node.
    pub fn as_element(&self) -> Option<&XmlElement> {
        match self {
            XmlContent::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a mutable reference to the element, if this is an element node.
    pub fn as_element_mut(&mut self) -> Option<&mut XmlElement> {
        match self {
            XmlContent::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Returns a reference to the document type, if this is a doctype node.
    pub fn as_doctype(&self) -> Option<&XmlDocType> {
        match self {
            XmlContent::DocumentType(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the character data of a text or comment node.
    pub fn character_data(&self) -> Option<&str> {
        match self {
            XmlContent::Text(t) => Some(t.text()),
            XmlContent::Comment(c) => Some(c.text()),
            _ => None,
        }
    }

    /// Replaces the character data of a text or comment node.
    ///
    /// Returns the previous data, or `None` (leaving the content untouched)
    /// if this node kind carries no character data.
    pub fn set_character_data(&mut self, data: String) -> Option<String> {
        match self {
            XmlContent::Text(t) => Some(t.set_text(data)),
            XmlContent::Comment(c) => Some(c.set_text(data)),
            _ => None,
        }
    }

    /// Short name of the node kind, for messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            XmlContent::Element(_) => "element",
            XmlContent::Text(_) => "text",
            XmlContent::Comment(_) => "comment",
            XmlContent::DocumentType(_) => "doctype",
        }
    }
}

impl std::fmt::Display for XmlContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XmlContent::Element(e) => e.fmt(f),
            XmlContent::Text(t) => t.fmt(f),
            XmlContent::Comment(c) => c.fmt(f),
            XmlContent::DocumentType(d) => d.fmt(f),
        }
    }
}

/// An element with a qualified name, attributes and an optional control value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    /// The qualified name of the element (e.g., "div", "svg:rect").
    name: String,
    /// Attributes in insertion order.
    attributes: Attributes,
    /// Live value of an interactive control. Not an attribute.
    value: Option<String>,
}

impl XmlElement {
    /// Creates a new element with no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_attributes(name, Attributes::new())
    }

    /// Creates a new element with the given attributes.
    pub fn with_attributes(name: impl Into<String>, attributes: Attributes) -> Self {
        XmlElement {
            name: name.into(),
            attributes,
            value: None,
        }
    }

    /// Returns the qualified name of the element.
    pub fn qname(&self) -> &str {
        &self.name
    }

    /// Returns the attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns the value of one attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Sets an attribute, keeping its position if it already exists.
    /// Returns the previous value.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.attributes.insert(name.into(), value.into())
    }

    /// Removes an attribute, preserving the order of the remaining ones.
    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.shift_remove(name)
    }

    /// Keeps only the attributes for which `keep` returns true, preserving
    /// their order.
    pub fn retain_attributes(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.attributes.retain(|name, value| keep(name, value));
    }

    /// Returns the control value, if one has been set.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Sets the control value. Returns the previous value.
    pub fn set_value(&mut self, value: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.value, value)
    }

    /// Returns true if this element's content is executable.
    pub fn is_executable(&self) -> bool {
        EXECUTABLE_TAGS
            .iter()
            .any(|tag| self.name.eq_ignore_ascii_case(tag))
    }

    /// Returns true if this element is an interactive control.
    pub fn is_control(&self) -> bool {
        CONTROL_TAGS
            .iter()
            .any(|tag| self.name.eq_ignore_ascii_case(tag))
    }
}

impl std::fmt::Display for XmlElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}", self.name)?;
        for (name, value) in &self.attributes {
            write!(f, " {}={:?}", name, value)?;
        }
        if let Some(value) = &self.value {
            write!(f, " [value={:?}]", value)?;
        }
        write!(f, ">")
    }
}

/// Text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlText {
    text: String,
}

impl XmlText {
    /// Creates a new text node from a string.
    pub fn new(text: impl Into<String>) -> Self {
        XmlText { text: text.into() }
    }

    /// Returns the text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Sets the text content. Returns the previous text.
    pub fn set_text(&mut self, text: String) -> String {
        std::mem::replace(&mut self.text, text)
    }
}

impl std::fmt::Display for XmlText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.text)
    }
}

/// Comment content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlComment {
    /// The comment text (without the <!-- and --> markers).
    text: String,
}

impl XmlComment {
    /// Creates a new comment node from a string.
    pub fn new(text: impl Into<String>) -> Self {
        XmlComment { text: text.into() }
    }

    /// Returns the comment text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Sets the comment text. Returns the previous text.
    pub fn set_text(&mut self, text: String) -> String {
        std::mem::replace(&mut self.text, text)
    }
}

impl std::fmt::Display for XmlComment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<!--{}-->", self.text)
    }
}

/// A document type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocType {
    name: String,
    public_id: Option<String>,
    system_id: Option<String>,
}

impl XmlDocType {
    /// Creates a doctype with only a name (e.g., `<!DOCTYPE html>`).
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_ids(name, None, None)
    }

    /// Creates a doctype with public and system identifiers.
    pub fn with_ids(name: impl Into<String>, public_id: Option<String>, system_id: Option<String>) -> Self {
        XmlDocType {
            name: name.into(),
            public_id,
            system_id,
        }
    }

    /// Returns the doctype name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the public identifier.
    pub fn public_id(&self) -> Option<&str> {
        self.public_id.as_deref()
    }

    /// Returns the system identifier.
    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }
}

impl std::fmt::Display for XmlDocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<!DOCTYPE {}", self.name)?;
        match (&self.public_id, &self.system_id) {
            (Some(public), Some(system)) => write!(f, " PUBLIC \"{}\" \"{}\"", public, system)?,
            (Some(public), None) => write!(f, " PUBLIC \"{}\"", public)?,
            (None, Some(system)) => write!(f, " SYSTEM \"{}\"", system)?,
            (None, None) => {}
        }
        write!(f, ">")
    }
}
