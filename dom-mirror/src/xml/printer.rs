//! XML printer for documents and subtrees.
//!
//! Compact output reproduces text verbatim, so a parsed document prints back
//! to an equivalent tree. Pretty output indents elements and trims text.

use std::io::Write;

use crate::document::Document;
use crate::node::{NodeRef, XmlContent, XmlElement};

/// Options for XML printing.
#[derive(Debug, Clone, Default)]
pub struct XmlPrinterOptions {
    /// Whether to pretty-print with indentation.
    pub pretty_print: bool,
    /// Whether to start documents with an XML declaration.
    pub declaration: bool,
}

/// XML printer that writes documents and node trees.
pub struct XmlPrinter<W: Write> {
    writer: W,
    options: XmlPrinterOptions,
}

impl<W: Write> XmlPrinter<W> {
    /// Creates a new XML printer.
    pub fn new(writer: W) -> Self {
        Self::with_options(writer, XmlPrinterOptions::default())
    }

    /// Creates a new XML printer with the given options.
    pub fn with_options(writer: W, options: XmlPrinterOptions) -> Self {
        XmlPrinter { writer, options }
    }

    /// Prints a whole document, including its doctype.
    pub fn print_document(&mut self, document: &Document) -> std::io::Result<()> {
        if self.options.declaration {
            write!(self.writer, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
            self.newline()?;
        }
        if let Some(doctype) = document.doctype() {
            if let XmlContent::DocumentType(d) = doctype.borrow().content() {
                write!(self.writer, "{}", d)?;
                self.newline()?;
            }
        }
        self.print_node(&document.root())?;
        if !self.options.pretty_print {
            writeln!(self.writer)?;
        }
        self.writer.flush()
    }

    /// Prints a single subtree.
    pub fn print_node(&mut self, node: &NodeRef) -> std::io::Result<()> {
        self.write_node(node, 0)
    }

    fn write_node(&mut self, node: &NodeRef, depth: usize) -> std::io::Result<()> {
        let inner = node.borrow();
        match inner.content() {
            XmlContent::Text(text) => {
                if self.options.pretty_print {
                    let trimmed = text.text().trim();
                    if !trimmed.is_empty() {
                        self.indent(depth)?;
                        write!(self.writer, "{}", to_entities(trimmed, false))?;
                        self.newline()?;
                    }
                } else {
                    write!(self.writer, "{}", to_entities(text.text(), false))?;
                }
            }
            XmlContent::Comment(comment) => {
                self.indent(depth)?;
                write!(self.writer, "<!--{}-->", comment.text())?;
                self.newline()?;
            }
            XmlContent::DocumentType(doctype) => {
                write!(self.writer, "{}", doctype)?;
                self.newline()?;
            }
            XmlContent::Element(element) => {
                self.indent(depth)?;
                self.start_tag(element)?;
                if inner.child_count() == 0 {
                    write!(self.writer, " />")?;
                    self.newline()?;
                    return Ok(());
                }
                write!(self.writer, ">")?;
                self.newline()?;
                for child in inner.children() {
                    self.write_node(child, depth + 1)?;
                }
                self.indent(depth)?;
                write!(self.writer, "</{}>", element.qname())?;
                self.newline()?;
            }
        }
        Ok(())
    }

    fn start_tag(&mut self, element: &XmlElement) -> std::io::Result<()> {
        write!(self.writer, "<{}", element.qname())?;
        for (name, value) in element.attributes() {
            write!(self.writer, " {}=\"{}\"", name, to_entities(value, true))?;
        }
        Ok(())
    }

    fn indent(&mut self, depth: usize) -> std::io::Result<()> {
        if self.options.pretty_print {
            write!(self.writer, "{}", "  ".repeat(depth))?;
        }
        Ok(())
    }

    fn newline(&mut self) -> std::io::Result<()> {
        if self.options.pretty_print {
            writeln!(self.writer)?;
        }
        Ok(())
    }
}

/// Converts special characters to XML entities. Quotes are only escaped
/// inside attribute values.
fn to_entities(s: &str, attribute: bool) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' if attribute => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    result
}

/// Prints a document to a compact string.
pub fn print_to_string(document: &Document) -> std::io::Result<String> {
    let mut output = Vec::new();
    XmlPrinter::new(&mut output).print_document(document)?;
    Ok(String::from_utf8_lossy(&output).to_string())
}

/// Prints a document to an indented string.
pub fn print_to_string_pretty(document: &Document) -> std::io::Result<String> {
    let mut output = Vec::new();
    let options = XmlPrinterOptions {
        pretty_print: true,
        declaration: false,
    };
    XmlPrinter::with_options(&mut output, options).print_document(document)?;
    Ok(String::from_utf8_lossy(&output).to_string())
}

/// Prints a subtree to a compact string.
pub fn node_to_string(node: &NodeRef) -> std::io::Result<String> {
    let mut output = Vec::new();
    XmlPrinter::new(&mut output).print_node(node)?;
    Ok(String::from_utf8_lossy(&output).to_string())
}
