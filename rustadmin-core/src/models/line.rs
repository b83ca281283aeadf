//! Inbound console line record.

use serde::{Deserialize, Serialize};

/// One parsed console line as delivered to the application callback
///
/// Produced by the console-line parser, consumed once by the application
/// and, when one of the request flags is set, by a prompt resolver. Raw
/// (unstructured) lines carry the original text with every numeric field
/// zeroed and both flags cleared.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    /// Sequence number (transmitted as hex)
    pub seq: u64,
    /// Wall-clock display timestamp, as transmitted
    pub timestamp: String,
    /// Originating process name
    pub exec_name: String,
    /// Originating process id
    pub pid: u64,
    /// Originating thread id
    pub tid: u64,
    /// Status code
    pub status: u64,
    /// Message-type code
    pub msg_type: u32,
    /// Severity level
    pub severity: u32,
    /// Color hint
    pub color: u32,
    /// Add-in name
    pub addin: String,
    /// Free-text payload
    pub text: String,
    /// The line is a password challenge
    pub password_request: bool,
    /// The line is a yes/no challenge
    pub prompt_request: bool,
}

impl ConsoleLine {
    /// Creates a raw line carrying the original text with no flags set
    #[must_use]
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Returns true if either challenge flag is set
    #[must_use]
    pub const fn needs_prompt(&self) -> bool {
        self.password_request || self.prompt_request
    }
}
