//! Outbound command model: transient payloads between enqueue and drain.

use serde::{Deserialize, Serialize};

/// Where an outbound command is addressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// A single connection, by ordinal index into the active table
    Server(usize),
    /// A named group, expanded to its members at drain time
    Group(String),
}

/// Protocol type tag carried by an outbound command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// A console command line
    Console,
    /// An opaque payload for the named add-on service
    AddOn(String),
}

/// An administrative command travelling through the handoff queue
///
/// Exists only between enqueue and drain; the dispatcher resolves the
/// destination and serializes the payload per destination at drain time.
#[derive(Debug, Clone)]
pub struct OutboundCommand {
    /// Destination connection or group
    pub destination: Destination,
    /// Raw command payload
    pub payload: Vec<u8>,
    /// Protocol type tag
    pub kind: CommandKind,
    /// Enqueue ordinal, for diagnostics
    pub ordinal: u64,
}

impl OutboundCommand {
    /// Creates a console command for a single connection
    #[must_use]
    pub fn console(index: usize, text: impl Into<String>) -> Self {
        Self {
            destination: Destination::Server(index),
            payload: text.into().into_bytes(),
            kind: CommandKind::Console,
            ordinal: 0,
        }
    }

    /// Creates a console command addressed to a group
    #[must_use]
    pub fn console_group(group: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            destination: Destination::Group(group.into()),
            payload: text.into().into_bytes(),
            kind: CommandKind::Console,
            ordinal: 0,
        }
    }

    /// Returns the payload as text, lossily
    #[must_use]
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}
