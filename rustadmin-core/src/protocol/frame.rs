//! Inbound frame model.
//!
//! A frame is one discrete unit of the wire protocol, text or binary,
//! carrying a type tag. Frames are decoded exactly once, at the
//! demultiplexer boundary, into the closed [`Frame`] sum type; everything
//! downstream matches exhaustively instead of comparing type integers.

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// One decoded protocol frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Multi-line console text
    ConsoleText(String),
    /// Fragment of the server section of a directory snapshot
    ServerDirectory(String),
    /// Fragment of the group section of a directory snapshot
    GroupDirectory(String),
    /// Opaque process-list fragment, forwarded to the host as-is
    ProcessList(String),
    /// Comma-separated administrator names plus a trailing restricted marker
    AdminList(String),
    /// Domino running/stopped transition on the remote
    DominoStatus(bool),
    /// Generic service-status text
    ServiceStatus(String),
    /// Single-line error text, surfaced as an acknowledgement-style prompt
    ErrorText(String),
    /// Keep-alive; no action
    Heartbeat,
    /// Binary add-on payload for the named service
    AddOnData {
        /// Target add-on service name
        service: String,
        /// Opaque payload bytes
        data: Vec<u8>,
    },
    /// Binary add-on event for the named service
    AddOnEvent {
        /// Target add-on service name
        service: String,
        /// Opaque payload bytes
        data: Vec<u8>,
    },
}

/// Serialized form of a frame on the versioned wire
///
/// The kind stays a plain string here so an unrecognized tag can be
/// reported as [`StreamError::UnknownFrame`] instead of a generic decode
/// failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireFrame {
    /// Frame type tag
    pub kind: String,
    /// Text payload, for text frame kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Add-on service name, for the binary kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Binary payload, for the binary kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    /// Running flag, for status transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
}

impl WireFrame {
    fn text_or_empty(self) -> String {
        self.text.unwrap_or_default()
    }
}

impl Frame {
    /// Decodes a wire frame into the closed sum type
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownFrame`] for an unrecognized type tag
    /// and [`StreamError::Corrupt`] for a known tag missing its payload.
    pub fn from_wire(wire: WireFrame) -> StreamResult<Self> {
        let frame = match wire.kind.as_str() {
            "console" => Self::ConsoleText(wire.text_or_empty()),
            "servers" => Self::ServerDirectory(wire.text_or_empty()),
            "groups" => Self::GroupDirectory(wire.text_or_empty()),
            "processes" => Self::ProcessList(wire.text_or_empty()),
            "admins" => Self::AdminList(wire.text_or_empty()),
            "domino" => Self::DominoStatus(wire.running.unwrap_or(false)),
            "service" => Self::ServiceStatus(wire.text_or_empty()),
            "error" => Self::ErrorText(wire.text_or_empty()),
            "heartbeat" => Self::Heartbeat,
            "addon_data" | "addon_event" => {
                let service = wire
                    .service
                    .ok_or_else(|| StreamError::Corrupt("add-on frame without service".into()))?;
                let data = wire.data.unwrap_or_default();
                if wire.kind == "addon_data" {
                    Self::AddOnData { service, data }
                } else {
                    Self::AddOnEvent { service, data }
                }
            }
            other => return Err(StreamError::UnknownFrame(other.to_string())),
        };
        Ok(frame)
    }

    /// Encodes the frame for the versioned wire
    #[must_use]
    pub fn to_wire(&self) -> WireFrame {
        let empty = WireFrame {
            kind: String::new(),
            text: None,
            service: None,
            data: None,
            running: None,
        };
        match self {
            Self::ConsoleText(text) => WireFrame {
                kind: "console".into(),
                text: Some(text.clone()),
                ..empty
            },
            Self::ServerDirectory(text) => WireFrame {
                kind: "servers".into(),
                text: Some(text.clone()),
                ..empty
            },
            Self::GroupDirectory(text) => WireFrame {
                kind: "groups".into(),
                text: Some(text.clone()),
                ..empty
            },
            Self::ProcessList(text) => WireFrame {
                kind: "processes".into(),
                text: Some(text.clone()),
                ..empty
            },
            Self::AdminList(text) => WireFrame {
                kind: "admins".into(),
                text: Some(text.clone()),
                ..empty
            },
            Self::DominoStatus(running) => WireFrame {
                kind: "domino".into(),
                running: Some(*running),
                ..empty
            },
            Self::ServiceStatus(text) => WireFrame {
                kind: "service".into(),
                text: Some(text.clone()),
                ..empty
            },
            Self::ErrorText(text) => WireFrame {
                kind: "error".into(),
                text: Some(text.clone()),
                ..empty
            },
            Self::Heartbeat => WireFrame {
                kind: "heartbeat".into(),
                ..empty
            },
            Self::AddOnData { service, data } => WireFrame {
                kind: "addon_data".into(),
                service: Some(service.clone()),
                data: Some(data.clone()),
                ..empty
            },
            Self::AddOnEvent { service, data } => WireFrame {
                kind: "addon_event".into(),
                service: Some(service.clone()),
                data: Some(data.clone()),
                ..empty
            },
        }
    }
}
