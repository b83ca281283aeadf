//! Inbound demultiplexer.
//!
//! One demultiplexer runs per connection, on its own thread, for the whole
//! connection lifetime. It blocks reading frames (or bare lines, for legacy
//! peers) and routes each inbound unit: console text to the line parser and
//! the application callback, directory fragments to the incremental parser,
//! add-on payloads to per-service queues, status transitions to the host.
//! Transport closure and stream corruption end the loop the same way; the
//! connection is then marked disconnected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use crate::console::{parse_line, split_console_text};
use crate::directory::{reconcile, DirectoryParser};
use crate::handoff::HandoffQueue;
use crate::host::ConsoleHost;
use crate::models::ServerOs;
use crate::prompt::PromptResolver;
use crate::protocol::codec::LineReader;
use crate::protocol::Frame;
use crate::registry::SharedRegistry;

/// One buffered add-on payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOnMessage {
    /// True for event messages, false for data messages
    pub event: bool,
    /// Opaque payload bytes
    pub data: Vec<u8>,
}

/// Per-service bounded buffers for inbound add-on payloads
///
/// Out-of-band consumers obtain the queue for their service name and block
/// on `pop`; the demultiplexer appends as payloads arrive. Queues are
/// closed when the owning connection disconnects.
#[derive(Default)]
pub struct AddOnQueues {
    queues: Mutex<HashMap<String, Arc<HandoffQueue<AddOnMessage>>>>,
}

impl AddOnQueues {
    /// Creates an empty set of queues
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the queue for `service`, creating it on first use
    pub fn queue(&self, service: &str) -> Arc<HandoffQueue<AddOnMessage>> {
        let mut queues = self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            queues
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(HandoffQueue::new())),
        )
    }

    /// Closes every queue, unblocking parked consumers
    pub fn close_all(&self) {
        let queues = self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for queue in queues.values() {
            queue.close();
        }
    }
}

/// The per-connection inbound demultiplexer
pub struct Demultiplexer {
    key: String,
    os: ServerOs,
    legacy: bool,
    registry: SharedRegistry,
    host: Arc<dyn ConsoleHost>,
    prompts: Arc<PromptResolver>,
    addons: Arc<AddOnQueues>,
    directory: DirectoryParser,
    stop: Arc<AtomicBool>,
}

impl Demultiplexer {
    /// Creates a demultiplexer for one established connection
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        os: ServerOs,
        legacy: bool,
        registry: SharedRegistry,
        host: Arc<dyn ConsoleHost>,
        prompts: Arc<PromptResolver>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            key: key.into(),
            os,
            legacy,
            registry,
            host,
            prompts,
            addons: Arc::new(AddOnQueues::new()),
            directory: DirectoryParser::new(),
            stop,
        }
    }

    /// The add-on buffers owned by this connection
    #[must_use]
    pub fn addon_queues(&self) -> Arc<AddOnQueues> {
        Arc::clone(&self.addons)
    }

    /// Runs the read loop to completion, then marks the record disconnected
    pub fn run(mut self, reader: LineReader) {
        if self.legacy {
            self.run_legacy(reader);
        } else {
            self.run_framed(reader);
        }
        self.finish();
    }

    /// Legacy peers send bare text lines; everything is console text.
    fn run_legacy(&mut self, mut reader: LineReader) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            match reader.read_line() {
                Ok(Some(line)) => self.handle_console_text(&line),
                Ok(None) => {
                    debug!(server = %self.key, "peer closed legacy stream");
                    return;
                }
                Err(e) => {
                    warn!(server = %self.key, error = %e, "legacy stream read failed");
                    return;
                }
            }
        }
    }

    fn run_framed(&mut self, reader: LineReader) {
        let mut reader = reader.into_frame_reader();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            match reader.read_frame() {
                Ok(frame) => self.handle_frame(frame),
                // Corruption is treated identically to closure.
                Err(e) => {
                    debug!(server = %self.key, error = %e, "frame stream ended");
                    return;
                }
            }
        }
    }

    /// Routes one decoded frame
    pub fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::ConsoleText(text) => self.handle_console_text(&text),
            Frame::ServerDirectory(chunk) | Frame::GroupDirectory(chunk) => {
                self.handle_directory_chunk(&chunk);
            }
            Frame::ProcessList(text) => self.host.report_process_list(&text),
            Frame::AdminList(text) => self.handle_admin_list(&text),
            Frame::DominoStatus(running) => {
                self.registry.with(|registry| {
                    registry.update_server(&self.key, |record| {
                        record.domino_running = running;
                    });
                });
                self.host.domino_state_changed(&self.key, running);
            }
            Frame::ServiceStatus(text) => self.host.report_status(&text),
            // Error text is surfaced like an acknowledgement prompt.
            Frame::ErrorText(text) => self.prompts.acknowledge(&text),
            Frame::Heartbeat => {}
            Frame::AddOnData { service, data } => {
                self.buffer_addon(&service, AddOnMessage { event: false, data });
            }
            Frame::AddOnEvent { service, data } => {
                self.buffer_addon(&service, AddOnMessage { event: true, data });
            }
        }
    }

    /// Splits, parses, filters and delivers a console text block
    fn handle_console_text(&self, text: &str) {
        let filter = self
            .registry
            .server(&self.key)
            .map(|record| record.filter)
            .unwrap_or_default();
        for raw in split_console_text(text) {
            let line = parse_line(raw, self.os);
            if !filter.allows(&line) {
                continue;
            }
            self.host.console_line(&self.key, &line);
            if line.needs_prompt() {
                self.prompts.submit(line);
            }
        }
    }

    fn handle_directory_chunk(&mut self, chunk: &str) {
        if !self.directory.feed(chunk) {
            return;
        }
        let batch = self.directory.take_batch();
        let registry = self.registry.clone();
        let host = Arc::clone(&self.host);
        let key = self.key.clone();
        // Reconciliation runs off the read loop so a large batch never
        // stalls inbound delivery.
        let spawned = thread::Builder::new()
            .name(format!("directory-{key}"))
            .spawn(move || {
                info!(
                    server = %key,
                    servers = batch.servers.len(),
                    groups = batch.groups.len(),
                    full = batch.full_refresh,
                    "directory batch complete"
                );
                registry.with(|r| reconcile(r, &batch));
                host.connection_list_changed(&registry.server_keys());
            });
        if let Err(e) = spawned {
            warn!(server = %self.key, error = %e, "cannot spawn directory thread");
        }
    }

    /// Comma-separated administrator names with a trailing restricted marker
    fn handle_admin_list(&self, text: &str) {
        let mut fields: Vec<&str> = text.split(',').map(str::trim).collect();
        let restricted = match fields.last().and_then(|f| f.parse::<bool>().ok()) {
            Some(marker) => {
                fields.pop();
                marker
            }
            None => false,
        };
        let admins: Vec<String> = fields
            .into_iter()
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        self.host.admin_list_changed(&self.key, &admins, restricted);
    }

    fn buffer_addon(&self, service: &str, message: AddOnMessage) {
        if self.addons.queue(service).push(message).is_err() {
            debug!(server = %self.key, service = %service, "add-on queue closed, payload dropped");
        }
    }

    /// Marks the record disconnected and releases dependents
    fn finish(&self) {
        self.prompts.cancel_pending();
        self.addons.close_all();
        self.registry.with(|registry| {
            registry.update_server(&self.key, crate::models::ServerRecord::mark_disconnected);
        });
        self.host
            .connection_list_changed(&self.registry.server_keys());
        info!(server = %self.key, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CancelHandle, NoOpHost};
    use crate::models::{
        ConsoleLine, LoginSettings, OutboundCommand, ServerRecord,
    };
    use secrecy::SecretString;

    struct CollectingHost {
        lines: Mutex<Vec<(String, ConsoleLine)>>,
        process_lists: Mutex<Vec<String>>,
        domino: Mutex<Vec<(String, bool)>>,
        admins: Mutex<Vec<(Vec<String>, bool)>>,
        list_changes: Mutex<Vec<Vec<String>>>,
    }

    impl CollectingHost {
        fn new() -> Self {
            Self {
                lines: Mutex::new(Vec::new()),
                process_lists: Mutex::new(Vec::new()),
                domino: Mutex::new(Vec::new()),
                admins: Mutex::new(Vec::new()),
                list_changes: Mutex::new(Vec::new()),
            }
        }
    }

    impl ConsoleHost for CollectingHost {
        fn report_status(&self, _message: &str) {}
        fn report_message(&self, _message: &str) {}
        fn request_password(&self, _prompt: &str, _cancel: &CancelHandle) -> Option<SecretString> {
            None
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
        fn console_line(&self, server: &str, line: &ConsoleLine) {
            self.lines
                .lock()
                .unwrap()
                .push((server.to_string(), line.clone()));
        }
        fn connection_list_changed(&self, names: &[String]) {
            self.list_changes.lock().unwrap().push(names.to_vec());
        }
        fn domino_state_changed(&self, name: &str, running: bool) {
            self.domino.lock().unwrap().push((name.to_string(), running));
        }
        fn connect_failed(&self, _host: &str, _reason: &str) {}
        fn report_process_list(&self, text: &str) {
            self.process_lists.lock().unwrap().push(text.to_string());
        }
        fn admin_list_changed(&self, _server: &str, admins: &[String], restricted: bool) {
            self.admins.lock().unwrap().push((admins.to_vec(), restricted));
        }
    }

    fn demux_with(host: Arc<dyn ConsoleHost>) -> (Demultiplexer, SharedRegistry) {
        let registry = SharedRegistry::new();
        registry.with(|r| {
            let mut record = ServerRecord::new("App1", "app1.example.test", 2050);
            record.active = true;
            r.upsert_server(record);
        });
        let commands = Arc::new(HandoffQueue::<OutboundCommand>::with_capacity(8));
        let prompts = Arc::new(PromptResolver::new(
            "App1",
            0,
            registry.clone(),
            Arc::clone(&host),
            commands,
        ));
        let demux = Demultiplexer::new(
            "App1",
            ServerOs::Windows,
            false,
            registry.clone(),
            host,
            prompts,
            Arc::new(AtomicBool::new(false)),
        );
        (demux, registry)
    }

    #[test]
    fn test_console_text_split_and_delivered_in_order() {
        let host = Arc::new(CollectingHost::new());
        let (mut demux, _) = demux_with(Arc::clone(&host) as Arc<dyn ConsoleHost>);

        demux.handle_frame(Frame::ConsoleText(
            "first line\r\nsecond line\n".to_string(),
        ));

        let lines = host.lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].1.text, "first line");
        assert_eq!(lines[1].1.text, "second line");
    }

    #[test]
    fn test_blocked_severity_not_delivered() {
        let host = Arc::new(CollectingHost::new());
        let (mut demux, registry) = demux_with(Arc::clone(&host) as Arc<dyn ConsoleHost>);
        registry.with(|r| {
            r.update_server("App1", |record| record.filter.block_severity(2));
        });

        let blocked = r#"<line seq="1" pw="0" pr="0" time="10:00:00" exec="router" pid="1a4" tid="2" status="0" type="1" sev="2" color="3" addin="MAIL">noisy</line>"#;
        let allowed = r#"<line seq="2" pw="0" pr="0" time="10:00:01" exec="router" pid="1a4" tid="2" status="0" type="1" sev="1" color="3" addin="MAIL">useful</line>"#;
        demux.handle_frame(Frame::ConsoleText(format!("{blocked}\n{allowed}")));

        let lines = host.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1.text, "useful");
    }

    #[test]
    fn test_domino_status_updates_registry_and_host() {
        let host = Arc::new(CollectingHost::new());
        let (mut demux, registry) = demux_with(Arc::clone(&host) as Arc<dyn ConsoleHost>);

        demux.handle_frame(Frame::DominoStatus(false));

        assert!(!registry.server("App1").unwrap().domino_running);
        assert_eq!(
            host.domino.lock().unwrap().as_slice(),
            &[("App1".to_string(), false)]
        );
    }

    #[test]
    fn test_process_list_forwarded_opaquely() {
        let host = Arc::new(CollectingHost::new());
        let (mut demux, _) = demux_with(Arc::clone(&host) as Arc<dyn ConsoleHost>);

        demux.handle_frame(Frame::ProcessList("router 01a4\nreplica 01b0".to_string()));

        assert_eq!(
            host.process_lists.lock().unwrap().as_slice(),
            &["router 01a4\nreplica 01b0".to_string()]
        );
    }

    #[test]
    fn test_admin_list_parsed_with_restricted_marker() {
        let host = Arc::new(CollectingHost::new());
        let (mut demux, _) = demux_with(Arc::clone(&host) as Arc<dyn ConsoleHost>);

        demux.handle_frame(Frame::AdminList("admin, operator, true".to_string()));

        let admins = host.admins.lock().unwrap();
        assert_eq!(
            admins.as_slice(),
            &[(vec!["admin".to_string(), "operator".to_string()], true)]
        );
    }

    #[test]
    fn test_addon_payloads_buffered_per_service() {
        let host = Arc::new(CollectingHost::new());
        let (mut demux, _) = demux_with(host);
        let queues = demux.addon_queues();

        demux.handle_frame(Frame::AddOnData {
            service: "stats".to_string(),
            data: vec![1, 2],
        });
        demux.handle_frame(Frame::AddOnEvent {
            service: "stats".to_string(),
            data: vec![3],
        });
        demux.handle_frame(Frame::AddOnData {
            service: "backup".to_string(),
            data: vec![9],
        });

        let stats = queues.queue("stats");
        // LIFO buffer: the event arrived last.
        assert_eq!(
            stats.try_pop(),
            Some(AddOnMessage {
                event: true,
                data: vec![3]
            })
        );
        assert_eq!(
            stats.try_pop(),
            Some(AddOnMessage {
                event: false,
                data: vec![1, 2]
            })
        );
        assert_eq!(
            queues.queue("backup").try_pop(),
            Some(AddOnMessage {
                event: false,
                data: vec![9]
            })
        );
    }

    #[test]
    fn test_directory_batch_reconciles_into_registry() {
        let host = Arc::new(CollectingHost::new());
        let (mut demux, registry) = demux_with(Arc::clone(&host) as Arc<dyn ConsoleHost>);

        demux.handle_frame(Frame::ServerDirectory(
            "<servers domain=\"East\" full=\"0\"><serverinfo><name>Hub1</name>\
             <hostname>hub1.example.test</hostname><port>2050</port></serverinfo></servers>"
                .to_string(),
        ));
        demux.handle_frame(Frame::GroupDirectory(
            "<groups><groupinfo><name>Hubs</name><members><memberdata><name>Hub1</name>\
             </memberdata></members></groupinfo></groups>"
                .to_string(),
        ));

        // Reconciliation runs on a spawned thread.
        for _ in 0..100 {
            if registry.server("Hub1").is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let record = registry.server("Hub1").unwrap();
        assert_eq!(record.hostname, "hub1.example.test");
        assert!(!record.active);
        assert!(registry.group("Hubs").is_some());
        assert!(!host.list_changes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_finish_marks_disconnected() {
        let host: Arc<dyn ConsoleHost> = Arc::new(NoOpHost::new());
        let (demux, registry) = demux_with(host);

        demux.finish();

        let record = registry.server("App1").unwrap();
        assert!(!record.active);
    }
}
