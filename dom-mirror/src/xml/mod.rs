//! XML parsing and output.
//!
//! Loads source documents from XML or XHTML text and prints documents back
//! out, preserving text, comments, attribute order and a leading DOCTYPE.

mod parser;
mod printer;

pub use parser::{parse_file, parse_str, XmlParser};
pub use printer::{
    node_to_string, print_to_string, print_to_string_pretty, XmlPrinter, XmlPrinterOptions,
};
