//! `RustAdmin` Core Library
//!
//! This crate provides the core functionality for the `RustAdmin` remote
//! console client: connection handshake and session management, inbound
//! frame demultiplexing, console-line and directory parsing, registry
//! reconciliation, interactive prompt resolution, and outbound command
//! dispatch. Presentation (dialogs, status bars) stays in the embedding
//! application, which implements the [`ConsoleHost`] callback trait.

pub mod console;
pub mod demux;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod handoff;
pub mod handshake;
pub mod host;
pub mod models;
pub mod prompt;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod transport;

pub use console::{parse_line, split_console_text};
pub use demux::{AddOnMessage, AddOnQueues, Demultiplexer};
pub use directory::{
    reconcile, DirectoryBatch, DirectoryGroup, DirectoryParser, DirectoryServer,
};
pub use dispatch::Dispatcher;
pub use error::{
    AuthError, ConnectError, ConsoleError, DispatchError, Result, StreamError,
};
pub use handoff::HandoffQueue;
pub use handshake::{Established, Handshake, HandshakeState};
pub use host::{CancelHandle, ConsoleHost, NoOpHost};
pub use models::{
    CommandKind, ConsoleLine, Credentials, Destination, Endpoint, EventFilter, GroupKind,
    GroupRecord, LoginSettings, OutboundCommand, ServerOs, ServerRecord, SharedWriter,
};
pub use prompt::PromptResolver;
pub use protocol::{Frame, FrameReader, FrameWriter, LineReader};
pub use registry::{Registry, SharedRegistry};
pub use session::{SessionInfo, SessionManager};
pub use transport::{
    memory_pair, MemoryTransport, TcpTransport, TcpTransportFactory, Transport, TransportFactory,
};
