//! Session lifetime management.
//!
//! A [`SessionManager`] owns the shared registry, the single outbound
//! dispatcher thread, and one demultiplexer thread per live session. The
//! embedding application calls `connect` with resolved login settings and
//! drives everything else through the returned session id and the host
//! callbacks. Process-wide shutdown drains every session before the shared
//! dispatcher stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::demux::{AddOnMessage, AddOnQueues, Demultiplexer};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::handoff::HandoffQueue;
use crate::handshake::Handshake;
use crate::host::ConsoleHost;
use crate::models::{LoginSettings, OutboundCommand};
use crate::prompt::PromptResolver;
use crate::protocol::codec::FrameWriter;
use crate::protocol::tokens;
use crate::registry::SharedRegistry;
use crate::transport::{Transport, TransportFactory};

/// A live session's bookkeeping
struct Session {
    key: String,
    index: usize,
    connected_at: DateTime<Utc>,
    stop: Arc<AtomicBool>,
    transport: Arc<dyn Transport>,
    addons: Arc<AddOnQueues>,
    demux: Option<JoinHandle<()>>,
}

/// Snapshot of one live session, for display
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id
    pub id: Uuid,
    /// Registry key of the connection record
    pub key: String,
    /// Ordinal index of the connection record
    pub index: usize,
    /// When the handshake completed
    pub connected_at: DateTime<Utc>,
}

/// Owns all sessions and the shared outbound dispatcher
pub struct SessionManager {
    registry: SharedRegistry,
    host: Arc<dyn ConsoleHost>,
    factory: Arc<dyn TransportFactory>,
    commands: Arc<HandoffQueue<OutboundCommand>>,
    ordinal: AtomicU64,
    sessions: Mutex<HashMap<Uuid, Session>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Creates a manager and starts the shared dispatcher thread
    #[must_use]
    pub fn new(factory: Arc<dyn TransportFactory>, host: Arc<dyn ConsoleHost>) -> Self {
        let registry = SharedRegistry::new();
        let commands: Arc<HandoffQueue<OutboundCommand>> = Arc::new(HandoffQueue::new());
        let mut dispatcher = Dispatcher::new(registry.clone(), Arc::clone(&commands));
        let handle = thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || dispatcher.run())
            .ok();
        Self {
            registry,
            host,
            factory,
            commands,
            ordinal: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
            dispatcher: Mutex::new(handle),
        }
    }

    /// The shared registry
    #[must_use]
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Opens a session: handshake, then a demultiplexer bound to it
    ///
    /// Blocks for the duration of the handshake; callers wanting a
    /// non-blocking open run this on their own thread, matching the
    /// short-lived handshake-thread model.
    ///
    /// # Errors
    ///
    /// Returns the handshake's terminal error; the failure has already been
    /// reported through the host's `connect_failed` callback.
    pub fn connect(&self, settings: &LoginSettings) -> Result<Uuid> {
        let mut handshake = Handshake::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.host),
            self.registry.clone(),
        );
        let established = handshake.run(settings)?;

        let stop = Arc::new(AtomicBool::new(false));
        let resolver = Arc::new(PromptResolver::new(
            established.key.clone(),
            established.index,
            self.registry.clone(),
            Arc::clone(&self.host),
            Arc::clone(&self.commands),
        ));
        let demux = Demultiplexer::new(
            established.key.clone(),
            established.os,
            established.legacy,
            self.registry.clone(),
            Arc::clone(&self.host),
            resolver,
            Arc::clone(&stop),
        );
        let addons = demux.addon_queues();

        let reader = established.reader;
        let demux_handle = thread::Builder::new()
            .name(format!("demux-{}", established.key))
            .spawn(move || demux.run(reader))
            .map_err(crate::error::ConsoleError::Io)?;

        let id = Uuid::new_v4();
        let session = Session {
            key: established.key.clone(),
            index: established.index,
            connected_at: Utc::now(),
            stop,
            transport: Arc::from(established.transport),
            addons,
            demux: Some(demux_handle),
        };
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, session);
        self.host
            .connection_list_changed(&self.registry.server_keys());
        info!(session = %id, server = %established.key, "session opened");
        Ok(id)
    }

    /// Lists live sessions
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(id, s)| SessionInfo {
                id: *id,
                key: s.key.clone(),
                index: s.index,
                connected_at: s.connected_at,
            })
            .collect()
    }

    /// The add-on buffer for `service` on the given session
    #[must_use]
    pub fn addon_queue(&self, id: Uuid, service: &str) -> Option<Arc<HandoffQueue<AddOnMessage>>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .map(|s| s.addons.queue(service))
    }

    // ===== Outbound commands =====

    /// Enqueues a console command for a single connection
    pub fn send_console(&self, index: usize, text: impl Into<String>) {
        self.enqueue(OutboundCommand::console(index, text));
    }

    /// Enqueues a console command fanned out to a group
    pub fn send_group(&self, group: impl Into<String>, text: impl Into<String>) {
        self.enqueue(OutboundCommand::console_group(group, text));
    }

    /// Requests a full server-directory refresh from the connection
    pub fn refresh_servers(&self, index: usize) {
        self.send_console(index, tokens::ADMIN_REFRESH_SERVERS);
    }

    /// Broadcasts text to every console attached to the connection's server
    pub fn broadcast(&self, index: usize, text: &str) {
        self.send_console(index, format!("{} {text}", tokens::ADMIN_BROADCAST));
    }

    fn enqueue(&self, mut command: OutboundCommand) {
        command.ordinal = self.ordinal.fetch_add(1, Ordering::SeqCst) + 1;
        if self.commands.push(command).is_err() {
            warn!("outbound queue closed, command dropped");
        }
    }

    // ===== Teardown =====

    /// Closes one session and waits for its demultiplexer to exit
    ///
    /// Sends the exit token, then closes the transport to unblock the
    /// reader. Returns false when the id is unknown.
    pub fn disconnect(&self, id: Uuid) -> bool {
        let session = self
            .sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
        let Some(mut session) = session else {
            return false;
        };
        self.close_session(&mut session);
        true
    }

    fn close_session(&self, session: &mut Session) {
        self.registry.with(|registry| {
            registry.update_server(&session.key, |record| {
                record.disconnect_pending = true;
            });
        });
        // Best effort: the peer may already be gone.
        let exit = self.registry.server(&session.key).and_then(|r| r.writer);
        if let Some(writer) = exit {
            let result = writer.with_writer(|w| {
                FrameWriter::write_line(w, tokens::CMD_EXIT)?;
                FrameWriter::write_line(w, tokens::ADMIN_DISCONNECT)
            });
            if let Err(e) = result {
                warn!(server = %session.key, error = %e, "exit token not delivered");
            }
        }
        session.stop.store(true, Ordering::SeqCst);
        if let Err(e) = session.transport.shutdown() {
            warn!(server = %session.key, error = %e, "transport shutdown failed");
        }
        if let Some(handle) = session.demux.take() {
            if handle.join().is_err() {
                warn!(server = %session.key, "demultiplexer thread panicked");
            }
        }
        info!(server = %session.key, "session closed");
    }

    /// Process-wide shutdown
    ///
    /// Closes every session, waits until no active connections remain, then
    /// stops the shared dispatcher by closing its queue.
    pub fn shutdown(self) {
        let sessions: Vec<Session> = {
            let mut guard = self
                .sessions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.drain().map(|(_, s)| s).collect()
        };
        for mut session in sessions {
            self.close_session(&mut session);
        }
        while self.registry.active_count() > 0 {
            thread::yield_now();
        }
        self.commands.close();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = dispatcher {
            if handle.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
        info!("session manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectError, ConnectResult};
    use crate::host::NoOpHost;
    use crate::protocol::codec::LineReader;
    use crate::transport::{memory_pair, MemoryTransport};
    use secrecy::SecretString;
    use std::io::{Read as _, Write as _};

    struct FixedFactory {
        transports: Mutex<Vec<MemoryTransport>>,
    }

    impl TransportFactory for FixedFactory {
        fn open(&self, host: &str, _port: u16) -> ConnectResult<Box<dyn Transport>> {
            self.transports
                .lock()
                .ok()
                .and_then(|mut t| {
                    if t.is_empty() {
                        None
                    } else {
                        Some(t.remove(0))
                    }
                })
                .map(|t| Box::new(t) as Box<dyn Transport>)
                .ok_or_else(|| ConnectError::Refused(host.to_string()))
        }
    }

    /// Scripted console server: answers the handshake, then reads until EOF
    fn serve(server: MemoryTransport) {
        thread::spawn(move || {
            let mut reader = LineReader::new(server.reader().unwrap());
            let mut writer = server.writer().unwrap();
            loop {
                let Ok(Some(line)) = reader.read_line() else {
                    return;
                };
                if line.starts_with(tokens::CMD_USER_IDENT) {
                    writeln!(writer, "{}", tokens::RSP_VALID_USER).unwrap();
                } else if line == tokens::CMD_SERVER_INFO {
                    writeln!(writer, "App1;Windows/2022;App Server;East").unwrap();
                } else if line == tokens::CMD_COUNTERS {
                    writeln!(writer, "0;0").unwrap();
                } else if line == tokens::CMD_VERSION {
                    writeln!(writer, "21").unwrap();
                } else if line == tokens::CMD_TIMESTAMP {
                    writeln!(writer, "1724630400").unwrap();
                } else if line == tokens::CMD_CHECK_ACCESS {
                    writeln!(writer, "{}", tokens::RSP_FULL_ACCESS).unwrap();
                    break;
                }
            }
            // Stay connected until the client hangs up.
            let mut sink = [0u8; 256];
            let mut raw = server.reader().unwrap();
            while matches!(raw.read(&mut sink), Ok(n) if n > 0) {}
        });
    }

    fn manager_with_one_server() -> SessionManager {
        let (client, server) = memory_pair();
        serve(server);
        let factory = Arc::new(FixedFactory {
            transports: Mutex::new(vec![client]),
        });
        SessionManager::new(factory, Arc::new(NoOpHost::new()))
    }

    #[test]
    fn test_connect_then_shutdown_drains_sessions() {
        let manager = manager_with_one_server();
        let settings = LoginSettings::direct("app1.example.test", 2050, "admin")
            .with_secret(SecretString::from("pw"));

        let id = manager.connect(&settings).unwrap();
        assert_eq!(manager.sessions().len(), 1);
        assert_eq!(manager.sessions()[0].id, id);
        let registry = manager.registry();
        assert_eq!(registry.active_count(), 1);

        manager.shutdown();
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_disconnect_unknown_id() {
        let factory = Arc::new(FixedFactory {
            transports: Mutex::new(Vec::new()),
        });
        let manager = SessionManager::new(factory, Arc::new(NoOpHost::new()));
        assert!(!manager.disconnect(Uuid::new_v4()));
        manager.shutdown();
    }

    #[test]
    fn test_enqueue_assigns_ordinals() {
        let factory = Arc::new(FixedFactory {
            transports: Mutex::new(Vec::new()),
        });
        let manager = SessionManager::new(factory, Arc::new(NoOpHost::new()));
        manager.send_console(0, "show tasks");
        manager.send_group("Hubs", "show server");
        // The queue is drained by the dispatcher; ordinals are assigned in
        // enqueue order even though drain order is inverted.
        assert_eq!(manager.ordinal.load(Ordering::SeqCst), 2);
        manager.shutdown();
    }
}
