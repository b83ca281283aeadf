//! Error types for `RustAdmin`
//!
//! This module defines all error types used throughout the console client,
//! providing descriptive error messages for connectivity, authentication,
//! wire-protocol, and command-dispatch failures.
//!
//! Parse failures in the console-line and directory parsers are deliberately
//! not represented here: both parsers degrade to a raw/best-effort result
//! instead of returning errors, so a malformed line can never abort a
//! reader loop.

use thiserror::Error;

/// Top-level error type for console client operations
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Connectivity errors while opening a transport
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    /// Authentication errors during the handshake
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Wire protocol / stream errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Outbound dispatch errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while opening a transport to a remote endpoint
///
/// Each variant carries the host it refers to so the host application can
/// report a host-specific message. Connectivity failures are terminal for
/// the attempt; no retry happens at this layer.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Host name could not be resolved
    #[error("Cannot resolve host {0}")]
    DnsFailure(String),

    /// No route to the remote host
    #[error("No route to host {0}")]
    NoRoute(String),

    /// A local address could not be bound
    #[error("Cannot bind local address for {0}")]
    BindFailure(String),

    /// The remote host actively refused the connection
    #[error("Connection refused by {0}")]
    Refused(String),

    /// A relay (binder) lookup did not know the requested service
    #[error("Service {0} not registered with the relay")]
    ServiceNotFound(String),

    /// Any other I/O failure while connecting to the given host
    #[error("Cannot connect to {host}: {source}")]
    Io {
        /// The host the attempt was addressed to
        host: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised during the credential exchange and metadata handshake
#[derive(Debug, Error)]
pub enum AuthError {
    /// The remote rejected the supplied secret; retryable within the budget
    #[error("Wrong password for user {0}")]
    WrongPassword(String),

    /// The remote has locked the account after too many failed attempts
    #[error("Maximum password attempts exceeded for user {0}")]
    MaxedTrials(String),

    /// The user is not a registered administrator of the remote server
    #[error("User {0} is not a registered administrator")]
    NotRegAdmin(String),

    /// The user is not a local administrator of the remote server
    #[error("User {0} is not a local administrator")]
    NotLocalAdmin(String),

    /// The user only holds restricted administration rights
    #[error("User {0} has restricted administration rights only")]
    RestrictedAdmin(String),

    /// The remote is at its connection limit
    #[error("Server {0} has reached its connection limit")]
    MaxedOut(String),

    /// The resolved endpoint's domain conflicts with registry state
    #[error("Domain mismatch for server {name}: registry has {known}, remote reports {reported}")]
    DomainMismatch {
        /// Logical name of the conflicting server
        name: String,
        /// Domain already recorded in the registry
        known: String,
        /// Domain reported by the remote during the handshake
        reported: String,
    },

    /// The stream ended in the middle of a handshake round trip
    #[error("Connection closed during handshake with {0}")]
    UnexpectedEof(String),

    /// The remote answered a handshake request with something unparseable
    #[error("Protocol violation during handshake: {0}")]
    ProtocolViolation(String),
}

impl AuthError {
    /// Returns true if the failure may be retried with a new secret
    ///
    /// Only a plain wrong-password rejection is retryable; every other
    /// authentication failure is terminal for the session attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::WrongPassword(_))
    }
}

/// Errors raised while reading framed protocol objects
///
/// All stream errors are treated as an implicit disconnect of the owning
/// connection; no partial-frame recovery is attempted.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The frame payload could not be decoded
    #[error("Corrupt frame: {0}")]
    Corrupt(String),

    /// The stream ended inside a frame
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// The frame type tag is not part of the protocol
    #[error("Unknown frame kind: {0}")]
    UnknownFrame(String),

    /// I/O error on the underlying transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while dispatching an outbound command to one destination
///
/// Dispatch errors are logged and isolated to the failing destination; they
/// never stop the dispatcher loop or affect other pending destinations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Writing the serialized command to the destination failed
    #[error("Write to {server} failed: {source}")]
    WriteFailed {
        /// Logical name of the destination server
        server: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The command could not be serialized for the destination
    #[error("Cannot serialize command for {server}: {reason}")]
    SerializeFailed {
        /// Logical name of the destination server
        server: String,
        /// Why serialization failed
        reason: String,
    },
}

/// Result type alias for console client operations
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// Result type alias for connectivity operations
pub type ConnectResult<T> = std::result::Result<T, ConnectError>;

/// Result type alias for handshake operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Result type alias for stream operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;
