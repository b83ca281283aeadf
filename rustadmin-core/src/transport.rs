//! Transport abstraction over authenticated, encrypted byte streams.
//!
//! The console core never provisions TLS certificates or keystores itself;
//! it consumes an opaque "produce an authenticated encrypted stream given
//! host and port" capability through [`TransportFactory`]. A plain TCP
//! implementation is provided for development and testing; production
//! embeddings supply their own factory wrapping whatever stream security
//! the deployment requires.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{ConnectError, ConnectResult};

/// A bidirectional byte stream to a remote endpoint
///
/// Reader and writer halves are handed out separately so the demultiplexer
/// thread can own a blocking reader while the dispatcher writes from another
/// thread. `shutdown` must unblock a thread parked in a blocking read; that
/// is the only cancellation mechanism the core relies on.
pub trait Transport: Send {
    /// Returns an owned reader half of the stream
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying handle cannot be duplicated.
    fn reader(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Returns an owned writer half of the stream
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying handle cannot be duplicated.
    fn writer(&self) -> io::Result<Box<dyn Write + Send>>;

    /// Shuts the stream down in both directions, unblocking parked readers
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown request fails; a stream that is
    /// already closed is not an error.
    fn shutdown(&self) -> io::Result<()>;

    /// Returns the resolved peer address, when known
    fn peer_addr(&self) -> Option<SocketAddr>;
}

/// Capability for opening transports to remote endpoints
pub trait TransportFactory: Send + Sync {
    /// Opens a transport to `host:port`
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] naming the host on any connectivity fault
    /// (resolution failure, no route, bind failure, refusal). Connectivity
    /// faults are terminal for the attempt; this layer never retries.
    fn open(&self, host: &str, port: u16) -> ConnectResult<Box<dyn Transport>>;
}

// ============================================================================
// TCP transport
// ============================================================================

/// Plain TCP transport
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wraps an already-connected TCP stream
    #[must_use]
    pub const fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.stream.try_clone()?))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.stream.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // A peer that already closed is not a shutdown failure.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

/// Factory producing plain TCP transports
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransportFactory;

impl TcpTransportFactory {
    /// Creates a new TCP transport factory
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TransportFactory for TcpTransportFactory {
    fn open(&self, host: &str, port: u16) -> ConnectResult<Box<dyn Transport>> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| ConnectError::DnsFailure(host.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::DnsFailure(host.to_string()));
        }

        let mut last_err: Option<io::Error> = None;
        for addr in addrs {
            match TcpStream::connect(addr) {
                Ok(stream) => return Ok(Box::new(TcpTransport::new(stream))),
                Err(e) => last_err = Some(e),
            }
        }
        Err(classify_connect_error(
            host,
            last_err.unwrap_or_else(|| io::Error::other("no address connected")),
        ))
    }
}

/// Maps an I/O failure onto the named connectivity fault taxonomy
fn classify_connect_error(host: &str, err: io::Error) -> ConnectError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => ConnectError::Refused(host.to_string()),
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ConnectError::NoRoute(host.to_string())
        }
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => {
            ConnectError::BindFailure(host.to_string())
        }
        _ => ConnectError::Io {
            host: host.to_string(),
            source: err,
        },
    }
}

// ============================================================================
// In-memory transport
// ============================================================================

struct PipeState {
    buffer: Vec<u8>,
    closed: bool,
}

/// One direction of an in-memory duplex stream
#[derive(Clone)]
struct Pipe {
    state: Arc<(Mutex<PipeState>, Condvar)>,
}

impl Pipe {
    fn new() -> Self {
        Self {
            state: Arc::new((
                Mutex::new(PipeState {
                    buffer: Vec::new(),
                    closed: false,
                }),
                Condvar::new(),
            )),
        }
    }

    fn close(&self) {
        let (lock, cvar) = &*self.state;
        if let Ok(mut state) = lock.lock() {
            state.closed = true;
        }
        cvar.notify_all();
    }
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.state;
        let mut state = lock
            .lock()
            .map_err(|_| io::Error::other("pipe lock poisoned"))?;
        while state.buffer.is_empty() && !state.closed {
            state = cvar
                .wait(state)
                .map_err(|_| io::Error::other("pipe lock poisoned"))?;
        }
        if state.buffer.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(state.buffer.len());
        buf[..n].copy_from_slice(&state.buffer[..n]);
        state.buffer.drain(..n);
        Ok(n)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.state;
        let mut state = lock
            .lock()
            .map_err(|_| io::Error::other("pipe lock poisoned"))?;
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        state.buffer.extend_from_slice(buf);
        drop(state);
        cvar.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory transport backed by a pair of byte pipes
///
/// Used by tests and by embeddings that want to drive the protocol without
/// a real socket. Create connected ends with [`memory_pair`].
pub struct MemoryTransport {
    incoming: Pipe,
    outgoing: Pipe,
}

impl Transport for MemoryTransport {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.incoming.clone()))
    }

    fn writer(&self) -> io::Result<Box<dyn Write + Send>> {
        Ok(Box::new(self.outgoing.clone()))
    }

    fn shutdown(&self) -> io::Result<()> {
        self.incoming.close();
        self.outgoing.close();
        Ok(())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Creates two connected in-memory transports
///
/// Bytes written to one end become readable on the other, in both
/// directions. Shutting down either end unblocks readers on both.
#[must_use]
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let a_to_b = Pipe::new();
    let b_to_a = Pipe::new();
    (
        MemoryTransport {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
        },
        MemoryTransport {
            incoming: a_to_b,
            outgoing: b_to_a,
        },
    )
}
