//! Server connection record: one per live or known remote endpoint.

use std::fmt;
use std::io::Write;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::credentials::Credentials;
use super::line::ConsoleLine;

/// Operating-system family reported by the remote server
///
/// Drives the radix used when parsing pid/tid attributes of structured
/// console lines: Windows servers report them in hex, everything else in
/// decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerOs {
    /// Windows family
    Windows,
    /// Unix/Linux family
    Unix,
    /// Anything else, or not yet known
    #[default]
    Other,
}

impl ServerOs {
    /// Parses the OS tag as transmitted by the server directory
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_ascii_lowercase();
        if lower.contains("windows") || lower.contains("nt") {
            Self::Windows
        } else if lower.contains("unix") || lower.contains("linux") || lower.contains("aix") {
            Self::Unix
        } else {
            Self::Other
        }
    }

    /// Radix of pid/tid attributes in structured console lines
    #[must_use]
    pub const fn pid_radix(self) -> u32 {
        match self {
            Self::Windows => 16,
            Self::Unix | Self::Other => 10,
        }
    }
}

/// Per-connection event filter for inbound console lines
///
/// A configured filter suppresses any parsed line whose process name or pid
/// does not match, or whose severity bit is blocked. An unconfigured filter
/// passes everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Only deliver lines from this process name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_name: Option<String>,
    /// Only deliver lines from this process id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u64>,
    /// Bitmask of blocked severities (bit n blocks severity n)
    #[serde(default)]
    pub blocked_severities: u32,
}

impl EventFilter {
    /// Returns true if the line passes the filter
    #[must_use]
    pub fn allows(&self, line: &ConsoleLine) -> bool {
        if let Some(ref exec) = self.exec_name {
            if !line.exec_name.eq_ignore_ascii_case(exec) {
                return false;
            }
        }
        if let Some(pid) = self.pid {
            if line.pid != pid {
                return false;
            }
        }
        if line.severity < 32 && self.blocked_severities & (1 << line.severity) != 0 {
            return false;
        }
        true
    }

    /// Blocks the given severity level
    pub fn block_severity(&mut self, severity: u32) {
        if severity < 32 {
            self.blocked_severities |= 1 << severity;
        }
    }
}

/// Shared handle to a transport writer half
///
/// Held by the owning server record and cloned by the dispatcher; writes are
/// serialized through the inner mutex rather than the registry lock so a
/// slow socket never stalls registry lookups.
#[derive(Clone)]
pub struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl SharedWriter {
    /// Wraps a writer half
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self(Arc::new(Mutex::new(writer)))
    }

    /// Runs `f` with exclusive access to the writer
    ///
    /// # Errors
    ///
    /// Propagates the I/O error produced by `f`.
    pub fn with_writer<R>(
        &self,
        f: impl FnOnce(&mut (dyn Write + Send)) -> std::io::Result<R>,
    ) -> std::io::Result<R> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| std::io::Error::other("writer lock poisoned"))?;
        f(guard.as_mut())
    }
}

impl fmt::Debug for SharedWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedWriter")
    }
}

/// A known remote administrative endpoint
///
/// Created when a handshake begins or when directory data first mentions an
/// unknown endpoint; mutated by handshake completion, periodic directory
/// reconciliation and disconnect. Never two live records may share the same
/// `(name, domain, port)` identity; the registry enforces that invariant.
/// Records are marked inactive rather than removed while their ordinal
/// index is referenced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Logical server name
    pub name: String,
    /// Host name as configured or reported
    pub hostname: String,
    /// Resolved network address, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Console service port
    pub port: u16,
    /// Administrative domain
    #[serde(default)]
    pub domain: String,
    /// Cluster name, when clustered
    #[serde(default)]
    pub cluster: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Remote product version string
    #[serde(default)]
    pub version: String,
    /// Remote OS family
    #[serde(default)]
    pub os: ServerOs,
    /// Negotiated protocol version; `None` until the handshake completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto_version: Option<u32>,
    /// Credentials used for this endpoint (secret never serialized)
    #[serde(default)]
    pub credentials: Credentials,
    /// Live session established
    #[serde(default)]
    pub active: bool,
    /// Domino reported running on the remote
    #[serde(default)]
    pub domino_running: bool,
    /// Marked deleted by a directory refresh
    #[serde(default)]
    pub deleted: bool,
    /// A disconnect has been requested but not completed
    #[serde(default)]
    pub disconnect_pending: bool,
    /// Ordinal index into the active-connection table
    #[serde(default)]
    pub index: usize,
    /// The endpoint is the domain's administration server
    #[serde(default)]
    pub admin_server: bool,
    /// The endpoint holds a secondary administration role
    #[serde(default)]
    pub secondary_admin: bool,
    /// The session was reached through a relay (binder)
    #[serde(default)]
    pub via_relay: bool,
    /// Full (vs restricted) access granted by the access check
    #[serde(default)]
    pub full_access: bool,
    /// Inbound event filter
    #[serde(default)]
    pub filter: EventFilter,
    /// Counter for password prompt replies, seeded by the handshake
    #[serde(default)]
    pub password_cntr: u64,
    /// Counter for yes/no prompt replies, seeded by the handshake
    #[serde(default)]
    pub prompt_cntr: u64,
    /// Last server-clock epoch seen in an acknowledgement message
    #[serde(default)]
    pub last_server_time: i64,
    /// Writer half of the owned transport (runtime only)
    #[serde(skip)]
    pub writer: Option<SharedWriter>,
}

impl ServerRecord {
    /// Creates a record for a known but not yet connected endpoint
    #[must_use]
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            port,
            ..Self::default()
        }
    }

    /// Returns true if the record can receive dispatched commands
    ///
    /// A destination is writable only after a successful handshake installed
    /// both a transport writer and a negotiated protocol version.
    #[must_use]
    pub const fn is_dispatchable(&self) -> bool {
        self.active && self.writer.is_some() && self.proto_version.is_some()
    }

    /// Returns the domain-qualified unique identity `name(domain)`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.name, &self.domain)
    }

    /// Marks the record disconnected and drops the transport writer
    pub fn mark_disconnected(&mut self) {
        self.active = false;
        self.domino_running = false;
        self.disconnect_pending = false;
        self.proto_version = None;
        self.writer = None;
    }
}

/// Synthesizes the `name(domain)` unique identity used on domain conflicts
#[must_use]
pub fn qualified_name(name: &str, domain: &str) -> String {
    format!("{name}({domain})")
}
