//! Outbound command dispatcher.
//!
//! One dispatcher thread is shared across all connections. It drains the
//! handoff queue (in the queue's inverted order), resolves each command's
//! destination against the registry, and writes the payload in whichever
//! wire format the destination negotiated. A write failure is isolated to
//! its destination; the loop itself only stops when the queue closes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::handoff::HandoffQueue;
use crate::models::{CommandKind, Destination, OutboundCommand, ServerRecord};
use crate::protocol::codec::FrameWriter;
use crate::protocol::frame::Frame;
use crate::protocol::tokens;
use crate::registry::SharedRegistry;

/// The shared outbound dispatcher
pub struct Dispatcher {
    registry: SharedRegistry,
    commands: Arc<HandoffQueue<OutboundCommand>>,
    encoder: FrameWriter,
}

impl Dispatcher {
    /// Creates a dispatcher draining the given queue
    #[must_use]
    pub fn new(registry: SharedRegistry, commands: Arc<HandoffQueue<OutboundCommand>>) -> Self {
        Self {
            registry,
            commands,
            encoder: FrameWriter::new(),
        }
    }

    /// Runs the drain loop until the queue is closed and empty
    pub fn run(&mut self) {
        while let Some(command) = self.commands.pop() {
            self.dispatch(&command);
        }
        debug!("dispatcher queue closed, loop exiting");
    }

    /// Resolves and delivers one command
    pub fn dispatch(&mut self, command: &OutboundCommand) {
        for (key, record) in self.resolve_targets(&command.destination) {
            if !record.is_dispatchable() {
                debug!(server = %key, "destination not dispatchable, skipping");
                continue;
            }
            if let Err(e) = self.deliver(&key, &record, command) {
                // Other destinations must still be attempted.
                warn!(server = %key, error = %e, "dispatch failed");
            }
        }
    }

    /// Expands the destination into concrete registry records
    ///
    /// A temporary group is removed from the registry the moment its
    /// members are resolved; a member name not found in the registry is
    /// skipped.
    fn resolve_targets(&self, destination: &Destination) -> Vec<(String, ServerRecord)> {
        self.registry.with(|registry| match destination {
            Destination::Server(index) => registry
                .server_by_index(*index)
                .map(|record| (record.name.clone(), record))
                .into_iter()
                .collect(),
            Destination::Group(name) => {
                let Some(group) = registry.take_group_for_dispatch(name) else {
                    warn!(group = %name, "unknown group, command dropped");
                    return Vec::new();
                };
                group
                    .members
                    .iter()
                    .filter_map(|member| {
                        let record = registry.server(member);
                        if record.is_none() {
                            debug!(group = %name, member = %member, "member not registered, skipping");
                        }
                        record.map(|r| (member.clone(), r))
                    })
                    .collect()
            }
        })
    }

    fn deliver(
        &mut self,
        key: &str,
        record: &ServerRecord,
        command: &OutboundCommand,
    ) -> Result<(), DispatchError> {
        let Some(writer) = &record.writer else {
            // is_dispatchable already requires a writer.
            return Ok(());
        };
        let versioned = record
            .proto_version
            .is_some_and(|v| v >= tokens::LEGACY_PROTO_THRESHOLD);

        if versioned {
            let frame = match &command.kind {
                CommandKind::Console => Frame::ConsoleText(command.payload_text()),
                CommandKind::AddOn(service) => Frame::AddOnData {
                    service: service.clone(),
                    data: command.payload.clone(),
                },
            };
            writer
                .with_writer(|w| self.encoder.write_frame(w, &frame))
                .map_err(|source| DispatchError::WriteFailed {
                    server: key.to_string(),
                    source,
                })
        } else {
            // Legacy peers only understand plain console text.
            let line = command.payload_text();
            writer
                .with_writer(|w| FrameWriter::write_line(w, &line))
                .map_err(|source| DispatchError::WriteFailed {
                    server: key.to_string(),
                    source,
                })
        }
    }
}
