//! Console text handling: line splitting and structured-line parsing.

mod parser;

pub use parser::{parse_line, split_console_text};
