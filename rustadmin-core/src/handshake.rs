//! Connection/handshake state machine.
//!
//! A handshake runs on its own short-lived thread and walks a fixed state
//! sequence: resolve login settings, open the transport (optionally through
//! a relay), exchange credentials within a bounded retry budget, perform
//! the four metadata round trips, then upsert the connection record and
//! hand the stream over to a demultiplexer. Every round trip is a blocking
//! line exchange; end-of-stream mid-handshake is a hard failure, never a
//! retryable timeout.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::{AuthError, ConnectError, ConsoleError};
use crate::host::{CancelHandle, ConsoleHost};
use crate::models::{Credentials, Endpoint, LoginSettings, ServerOs, ServerRecord, SharedWriter};
use crate::protocol::codec::LineReader;
use crate::protocol::tokens;
use crate::registry::SharedRegistry;
use crate::transport::{Transport, TransportFactory};

/// Total credential attempts before giving up
const RETRY_BUDGET: u32 = 3;

/// Observable handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing resolved yet
    Init,
    /// Login settings are known
    LoginInfoResolved,
    /// A transport to the endpoint is open
    TransportOpen,
    /// The relay resolved the service and the direct transport is open
    BinderAuthenticated,
    /// Credentials were accepted by the remote
    CredentialsSent,
    /// All four metadata round trips completed
    ServerMetadataExchanged,
    /// The record is registered and live
    Connected,
    /// The attempt ended without a live session
    Disconnected,
}

/// Everything a successful handshake hands over to the session layer
pub struct Established {
    /// Unique registry key of the connection record
    pub key: String,
    /// Ordinal index of the record
    pub index: usize,
    /// Negotiated protocol version
    pub proto_version: u32,
    /// True when the remote only speaks the legacy line format
    pub legacy: bool,
    /// Remote OS family, for console-line radix
    pub os: ServerOs,
    /// The open transport; the session layer owns shutdown
    pub transport: Box<dyn Transport>,
    /// Buffered reader positioned after the handshake exchange
    pub reader: LineReader,
}

/// The connection/handshake state machine
pub struct Handshake {
    factory: Arc<dyn TransportFactory>,
    host: Arc<dyn ConsoleHost>,
    registry: SharedRegistry,
    state: HandshakeState,
}

impl Handshake {
    /// Creates a handshake bound to the shared registry and host callbacks
    #[must_use]
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        host: Arc<dyn ConsoleHost>,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            factory,
            host,
            registry,
            state: HandshakeState::Init,
        }
    }

    /// Returns the current state
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Runs the handshake to completion
    ///
    /// On success the connection record is active in the registry and the
    /// returned [`Established`] carries the stream for the demultiplexer.
    ///
    /// # Errors
    ///
    /// Returns a [`ConsoleError`] for every terminal outcome: connectivity
    /// faults, each distinct authentication rejection, protocol violations
    /// and the domain-mismatch guard. The state is `Disconnected` afterward.
    pub fn run(&mut self, settings: &LoginSettings) -> Result<Established, ConsoleError> {
        match self.try_run(settings) {
            Ok(established) => {
                self.state = HandshakeState::Connected;
                Ok(established)
            }
            Err(e) => {
                self.state = HandshakeState::Disconnected;
                self.host
                    .connect_failed(settings.display_host(), &e.to_string());
                Err(e)
            }
        }
    }

    fn try_run(&mut self, settings: &LoginSettings) -> Result<Established, ConsoleError> {
        self.state = HandshakeState::LoginInfoResolved;

        let (transport, via_relay, host_name, port) = self.open_endpoint(settings)?;
        let mut reader = LineReader::new(transport.reader().map_err(ConsoleError::Io)?);
        let mut writer = transport.writer().map_err(ConsoleError::Io)?;

        let secret = self.exchange_credentials(
            &mut reader,
            writer.as_mut(),
            settings,
            &host_name,
        )?;
        self.state = HandshakeState::CredentialsSent;

        let meta = self.exchange_metadata(&mut reader, writer.as_mut(), &host_name)?;
        self.state = HandshakeState::ServerMetadataExchanged;

        // Identity-conflict guard: a same-named record pointing at another
        // host with a different domain means this login would corrupt the
        // registry; abort instead of overwriting.
        let guard = self.registry.server(&meta.name);
        if let Some(known) = guard {
            if known.hostname != host_name
                && !known.domain.is_empty()
                && !meta.domain.is_empty()
                && known.domain != meta.domain
            {
                return Err(AuthError::DomainMismatch {
                    name: meta.name,
                    known: known.domain,
                    reported: meta.domain,
                }
                .into());
            }
        }

        let shared_writer = SharedWriter::new(writer);
        let address = transport.peer_addr().map(|sa| sa.ip());
        let legacy = meta.proto_version < tokens::LEGACY_PROTO_THRESHOLD;
        let credentials = Credentials::with_secret(settings.user.clone(), secret);

        let (key, index) = self.registry.with(|registry| {
            let key = registry.resolve_key(&meta.name, &meta.domain);
            let key = if registry.server(&key).is_some() {
                registry.update_server(&key, |record| {
                    record.hostname = host_name.clone();
                    record.address = address;
                    record.port = port;
                    record.title = meta.title.clone();
                    record.os = meta.os;
                    if record.domain.is_empty() {
                        record.domain = meta.domain.clone();
                    }
                });
                key
            } else {
                let mut record = ServerRecord::new(meta.name.clone(), host_name.clone(), port);
                record.address = address;
                record.domain = meta.domain.clone();
                record.title = meta.title.clone();
                record.os = meta.os;
                registry.upsert_server(record)
            };
            registry.update_server(&key, |record| {
                record.active = true;
                record.domino_running = true;
                record.deleted = false;
                record.disconnect_pending = false;
                record.proto_version = Some(meta.proto_version);
                record.credentials = credentials;
                record.password_cntr = meta.password_cntr;
                record.prompt_cntr = meta.prompt_cntr;
                record.last_server_time = meta.server_time;
                record.via_relay = via_relay;
                record.full_access = meta.full_access;
                record.writer = Some(shared_writer);
            });
            let index = registry.server(&key).map_or(0, |r| r.index);
            (key, index)
        });

        info!(server = %key, version = meta.proto_version, legacy, "console session established");
        self.host
            .report_status(&format!("Connected to {}", meta.name));

        Ok(Established {
            key,
            index,
            proto_version: meta.proto_version,
            legacy,
            os: meta.os,
            transport,
            reader,
        })
    }

    /// Opens the transport, going through the relay first when configured
    fn open_endpoint(
        &mut self,
        settings: &LoginSettings,
    ) -> Result<(Box<dyn Transport>, bool, String, u16), ConsoleError> {
        match &settings.endpoint {
            Endpoint::Direct { host, port } => {
                let transport = self.factory.open(host, *port)?;
                self.state = HandshakeState::TransportOpen;
                Ok((transport, false, host.clone(), *port))
            }
            Endpoint::Relayed {
                binder_host,
                binder_port,
                service,
            } => {
                let binder = self.factory.open(binder_host, *binder_port)?;
                self.state = HandshakeState::TransportOpen;
                let (host, port) =
                    self.relay_resolve(binder.as_ref(), service, &settings.user)?;
                let _ = binder.shutdown();
                debug!(service = %service, host = %host, port, "relay resolved endpoint");
                let transport = self.factory.open(&host, port)?;
                self.state = HandshakeState::BinderAuthenticated;
                Ok((transport, true, host, port))
            }
        }
    }

    /// The fixed six-step relay (binder) line exchange
    fn relay_resolve(
        &self,
        binder: &dyn Transport,
        service: &str,
        user: &str,
    ) -> Result<(String, u16), ConsoleError> {
        let mut reader = LineReader::new(binder.reader().map_err(ConsoleError::Io)?);
        let mut writer = binder.writer().map_err(ConsoleError::Io)?;
        let local_host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        write_line(writer.as_mut(), tokens::RELAY_TYPE)?;
        write_line(writer.as_mut(), &format!("{} {service}", tokens::RELAY_SERVICE))?;
        write_line(writer.as_mut(), &format!("{} {user}", tokens::RELAY_USER))?;
        write_line(writer.as_mut(), &format!("{} {local_host}", tokens::RELAY_HOST))?;

        let reply = read_reply(&mut reader, service)?;
        if reply == tokens::RELAY_NOT_FOUND {
            return Err(ConnectError::ServiceNotFound(service.to_string()).into());
        }
        let delivered = reply
            .strip_prefix(tokens::RELAY_FOUND)
            .map(str::trim)
            .ok_or_else(|| AuthError::ProtocolViolation(format!("relay replied {reply}")))?;
        let (host, port) = delivered
            .rsplit_once(':')
            .ok_or_else(|| AuthError::ProtocolViolation(format!("relay address {delivered}")))?;
        let port: u16 = port
            .parse()
            .map_err(|_| AuthError::ProtocolViolation(format!("relay port {port}")))?;
        Ok((host.to_string(), port))
    }

    /// Credential exchange with a budget of three total attempts
    fn exchange_credentials(
        &self,
        reader: &mut LineReader,
        writer: &mut (dyn std::io::Write + Send),
        settings: &LoginSettings,
        host_name: &str,
    ) -> Result<SecretString, ConsoleError> {
        let user = &settings.user;
        let mut secret = settings.secret.clone();

        for attempt in 1..=RETRY_BUDGET {
            let current = match secret.take() {
                Some(s) => s,
                None => self.prompt_secret(user, host_name)?,
            };

            write_line(
                writer,
                &format!(
                    "{} {user},{}",
                    tokens::CMD_USER_IDENT,
                    current.expose_secret()
                ),
            )?;
            let reply = read_reply(reader, host_name)?;

            match reply.as_str() {
                tokens::RSP_VALID_USER => return Ok(current),
                tokens::RSP_WRONG_PASSWORD => {
                    warn!(user = %user, attempt, "password rejected");
                    if attempt == RETRY_BUDGET {
                        return Err(AuthError::WrongPassword(user.clone()).into());
                    }
                    // Fall through to a fresh prompt on the next attempt.
                }
                tokens::RSP_MAXED_TRIALS => {
                    return Err(AuthError::MaxedTrials(user.clone()).into())
                }
                tokens::RSP_NOT_REG_ADMIN => {
                    return Err(AuthError::NotRegAdmin(user.clone()).into())
                }
                tokens::RSP_NOT_LOCAL_ADMIN => {
                    return Err(AuthError::NotLocalAdmin(user.clone()).into())
                }
                tokens::RSP_RESTRICTED_ADMIN => {
                    return Err(AuthError::RestrictedAdmin(user.clone()).into())
                }
                tokens::RSP_MAXED_OUT => {
                    return Err(AuthError::MaxedOut(host_name.to_string()).into())
                }
                other => {
                    return Err(AuthError::ProtocolViolation(format!(
                        "credential reply {other}"
                    ))
                    .into())
                }
            }
        }
        Err(AuthError::WrongPassword(user.clone()).into())
    }

    fn prompt_secret(&self, user: &str, host_name: &str) -> Result<SecretString, ConsoleError> {
        let cancel = CancelHandle::new();
        self.host
            .request_password(
                &format!("Password for {user} on {host_name}"),
                &cancel,
            )
            .ok_or_else(|| AuthError::WrongPassword(user.to_string()).into())
    }

    /// The four fixed metadata round trips after `VALID_USER`
    fn exchange_metadata(
        &self,
        reader: &mut LineReader,
        writer: &mut (dyn std::io::Write + Send),
        host_name: &str,
    ) -> Result<ServerMetadata, ConsoleError> {
        // (a) canonical name, type, title, domain
        write_line(writer, tokens::CMD_SERVER_INFO)?;
        let info = read_reply(reader, host_name)?;
        let mut parts = info.split(';');
        let name = parts.next().unwrap_or_default().trim().to_string();
        let os = ServerOs::from_label(parts.next().unwrap_or_default());
        let title = parts.next().unwrap_or_default().trim().to_string();
        let domain = parts.next().unwrap_or_default().trim().to_string();
        if name.is_empty() {
            return Err(AuthError::ProtocolViolation(format!("server info {info}")).into());
        }

        // (b) counters correlating interactive prompt replies
        write_line(writer, tokens::CMD_COUNTERS)?;
        let counters = read_reply(reader, host_name)?;
        let (password_cntr, prompt_cntr) = parse_counters(&counters)
            .ok_or_else(|| AuthError::ProtocolViolation(format!("counters {counters}")))?;

        // (c) protocol version; low versions fall back to the legacy format
        write_line(writer, tokens::CMD_VERSION)?;
        let version_line = read_reply(reader, host_name)?;
        let proto_version: u32 = version_line
            .trim()
            .parse()
            .map_err(|_| AuthError::ProtocolViolation(format!("version {version_line}")))?;

        // (d) server clock, seeding acknowledgement deduplication
        write_line(writer, tokens::CMD_TIMESTAMP)?;
        let ts_line = read_reply(reader, host_name)?;
        let server_time: i64 = ts_line.trim().parse().unwrap_or(0);

        // (e) access level
        write_line(writer, tokens::CMD_CHECK_ACCESS)?;
        let access = read_reply(reader, host_name)?;
        let full_access = access.trim() == tokens::RSP_FULL_ACCESS;

        Ok(ServerMetadata {
            name,
            os,
            title,
            domain,
            password_cntr,
            prompt_cntr,
            proto_version,
            server_time,
            full_access,
        })
    }
}

struct ServerMetadata {
    name: String,
    os: ServerOs,
    title: String,
    domain: String,
    password_cntr: u64,
    prompt_cntr: u64,
    proto_version: u32,
    server_time: i64,
    full_access: bool,
}

fn parse_counters(line: &str) -> Option<(u64, u64)> {
    let (pw, prompt) = line.trim().split_once(';')?;
    Some((pw.trim().parse().ok()?, prompt.trim().parse().ok()?))
}

fn write_line(
    writer: &mut (dyn std::io::Write + Send),
    line: &str,
) -> Result<(), ConsoleError> {
    crate::protocol::codec::FrameWriter::write_line(writer, line).map_err(ConsoleError::Io)
}

/// Reads one handshake reply; end-of-stream is a hard failure
fn read_reply(reader: &mut LineReader, host_name: &str) -> Result<String, ConsoleError> {
    match reader.read_line().map_err(ConsoleError::Io)? {
        Some(line) => Ok(line),
        None => Err(AuthError::UnexpectedEof(host_name.to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoOpHost;
    use crate::transport::{memory_pair, MemoryTransport};
    use std::io::Write as _;
    use std::sync::Mutex;

    /// Factory handing out pre-connected in-memory transports
    struct FixedFactory {
        transports: Mutex<Vec<MemoryTransport>>,
    }

    impl FixedFactory {
        fn new(transports: Vec<MemoryTransport>) -> Self {
            Self {
                transports: Mutex::new(transports),
            }
        }
    }

    impl TransportFactory for FixedFactory {
        fn open(
            &self,
            host: &str,
            _port: u16,
        ) -> crate::error::ConnectResult<Box<dyn Transport>> {
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

    /// Host that replies to password prompts from a fixed list
    struct ScriptedHost {
        secrets: Mutex<Vec<&'static str>>,
        prompts: std::sync::atomic::AtomicU32,
    }

    impl ScriptedHost {
        fn new(secrets: Vec<&'static str>) -> Self {
            Self {
                secrets: Mutex::new(secrets),
                prompts: std::sync::atomic::AtomicU32::new(0),
            }
        }

        fn prompt_count(&self) -> u32 {
            self.prompts.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl ConsoleHost for ScriptedHost {
        fn report_status(&self, _message: &str) {}
        fn report_message(&self, _message: &str) {}
        fn request_password(&self, _prompt: &str, _cancel: &CancelHandle) -> Option<SecretString> {
            self.prompts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.secrets
                .lock()
                .ok()
                .and_then(|mut s| if s.is_empty() { None } else { Some(s.remove(0)) })
                .map(SecretString::from)
        }
        fn request_choice(
            &self,
            _prompt: &str,
            _options: &[String],
            _cancel: &CancelHandle,
        ) -> Option<String> {
            None
        }
        fn request_login_settings(&self) -> Option<LoginSettings> {
            None
        }
        fn console_line(&self, _server: &str, _line: &crate::models::ConsoleLine) {}
        fn connection_list_changed(&self, _names: &[String]) {}
        fn domino_state_changed(&self, _name: &str, _running: bool) {}
        fn connect_failed(&self, _host: &str, _reason: &str) {}
        fn report_process_list(&self, _text: &str) {}
        fn admin_list_changed(&self, _server: &str, _admins: &[String], _restricted: bool) {}
    }

    /// Drives the server side of a scripted handshake on its own thread
    fn serve(server: MemoryTransport, auth_replies: Vec<&'static str>) {
        std::thread::spawn(move || {
            let mut reader = LineReader::new(server.reader().unwrap());
            let mut writer = server.writer().unwrap();
            let mut replies = auth_replies.into_iter();
            loop {
                let Ok(Some(line)) = reader.read_line() else {
                    return;
                };
                if line.starts_with(tokens::CMD_USER_IDENT) {
                    let Some(reply) = replies.next() else { return };
                    writeln!(writer, "{reply}").unwrap();
                    if reply != tokens::RSP_VALID_USER {
                        continue;
                    }
                } else if line == tokens::CMD_SERVER_INFO {
                    writeln!(writer, "App1;Windows/2022;App Server;East").unwrap();
                } else if line == tokens::CMD_COUNTERS {
                    writeln!(writer, "5;9").unwrap();
                } else if line == tokens::CMD_VERSION {
                    writeln!(writer, "21").unwrap();
                } else if line == tokens::CMD_TIMESTAMP {
                    writeln!(writer, "1724630400").unwrap();
                } else if line == tokens::CMD_CHECK_ACCESS {
                    writeln!(writer, "{}", tokens::RSP_FULL_ACCESS).unwrap();
                    return;
                }
            }
        });
    }

    fn run_handshake(
        auth_replies: Vec<&'static str>,
        host: Arc<ScriptedHost>,
        registry: &SharedRegistry,
    ) -> (Result<Established, ConsoleError>, HandshakeState) {
        let (client, server) = memory_pair();
        serve(server, auth_replies);
        let factory = Arc::new(FixedFactory::new(vec![client]));
        let mut handshake = Handshake::new(factory, host, registry.clone());
        let settings = LoginSettings::direct("app1.example.test", 2050, "admin")
            .with_secret(SecretString::from("first"));
        let result = handshake.run(&settings);
        (result, handshake.state())
    }

    #[test]
    fn test_successful_handshake_registers_record() {
        let registry = SharedRegistry::new();
        let host = Arc::new(ScriptedHost::new(vec![]));
        let (result, state) =
            run_handshake(vec![tokens::RSP_VALID_USER], host, &registry);
        let established = result.unwrap();
        assert_eq!(state, HandshakeState::Connected);
        assert_eq!(established.key, "App1");
        assert_eq!(established.proto_version, 21);
        assert!(!established.legacy);

        let record = registry.server("App1").unwrap();
        assert!(record.active);
        assert_eq!(record.domain, "East");
        assert_eq!(record.password_cntr, 5);
        assert_eq!(record.prompt_cntr, 9);
        assert!(record.full_access);
        assert!(record.writer.is_some());
    }

    #[test]
    fn test_retry_budget_two_reprompts_succeed() {
        let registry = SharedRegistry::new();
        let host = Arc::new(ScriptedHost::new(vec!["second", "third"]));
        let (result, _) = run_handshake(
            vec![
                tokens::RSP_WRONG_PASSWORD,
                tokens::RSP_WRONG_PASSWORD,
                tokens::RSP_VALID_USER,
            ],
            Arc::clone(&host),
            &registry,
        );
        assert!(result.is_ok());
        assert_eq!(host.prompt_count(), 2);
    }

    #[test]
    fn test_retry_budget_exhausted_is_terminal() {
        let registry = SharedRegistry::new();
        let host = Arc::new(ScriptedHost::new(vec!["second", "third", "fourth"]));
        let (result, state) = run_handshake(
            vec![
                tokens::RSP_WRONG_PASSWORD,
                tokens::RSP_WRONG_PASSWORD,
                tokens::RSP_WRONG_PASSWORD,
            ],
            Arc::clone(&host),
            &registry,
        );
        assert!(matches!(
            result,
            Err(ConsoleError::Auth(AuthError::WrongPassword(_)))
        ));
        assert_eq!(state, HandshakeState::Disconnected);
        // Only two re-prompts happen inside a budget of three attempts.
        assert_eq!(host.prompt_count(), 2);
    }

    #[test]
    fn test_maxed_trials_stops_without_prompting() {
        let registry = SharedRegistry::new();
        let host = Arc::new(ScriptedHost::new(vec!["never-used"]));
        let (result, _) = run_handshake(
            vec![tokens::RSP_MAXED_TRIALS],
            Arc::clone(&host),
            &registry,
        );
        assert!(matches!(
            result,
            Err(ConsoleError::Auth(AuthError::MaxedTrials(_)))
        ));
        assert_eq!(host.prompt_count(), 0);
    }

    #[test]
    fn test_domain_mismatch_guard_aborts() {
        let registry = SharedRegistry::new();
        registry.with(|r| {
            let mut known = ServerRecord::new("App1", "other.example.test", 2050);
            known.domain = "West".to_string();
            r.upsert_server(known);
        });
        let host = Arc::new(ScriptedHost::new(vec![]));
        let (result, _) = run_handshake(vec![tokens::RSP_VALID_USER], host, &registry);
        assert!(matches!(
            result,
            Err(ConsoleError::Auth(AuthError::DomainMismatch { .. }))
        ));
        // Registry state is untouched by the aborted handshake.
        assert!(!registry.server("App1").unwrap().active);
    }

    #[test]
    fn test_eof_during_handshake_is_hard_failure() {
        let registry = SharedRegistry::new();
        let host = Arc::new(ScriptedHost::new(vec![]));
        let (client, server) = memory_pair();
        // Server hangs up after reading the credential line, mid round trip.
        std::thread::spawn(move || {
            let mut reader = LineReader::new(server.reader().unwrap());
            let _ = reader.read_line();
            server.shutdown().unwrap();
        });
        let factory = Arc::new(FixedFactory::new(vec![client]));
        let mut handshake = Handshake::new(factory, host, registry.clone());
        let settings = LoginSettings::direct("app1.example.test", 2050, "admin")
            .with_secret(SecretString::from("x"));
        let result = handshake.run(&settings);
        assert!(matches!(
            result,
            Err(ConsoleError::Auth(AuthError::UnexpectedEof(_)))
        ));
    }
}
