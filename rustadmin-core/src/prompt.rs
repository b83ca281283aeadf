//! Interactive prompt resolution.
//!
//! The demultiplexer hands flagged console lines (and error text) to a
//! per-connection [`PromptResolver`]. Each prompt runs on its own
//! short-lived thread because the host callback blocks on user input; a
//! newly arrived prompt cancels the one still pending so the host can
//! dismiss its dialog instead of leaving it orphaned.

use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use regex::Regex;
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::handoff::HandoffQueue;
use crate::host::{CancelHandle, ConsoleHost};
use crate::models::{ConsoleLine, OutboundCommand};
use crate::protocol::tokens;
use crate::registry::SharedRegistry;

/// Reply value distinguishing "no secret entered" from a real secret
const NO_SECRET_REPLY: &str = ">result<";

#[derive(Clone, Copy)]
enum Counter {
    Password,
    Prompt,
}

fn choices_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(([^()]+)\)\s*$").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

fn epoch_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\d+)\]").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Resolves interactive prompts for one connection
///
/// At most one prompt is live per connection; submitting a new one cancels
/// the previous handle first. Replies travel through the shared outbound
/// queue like any other console command, so they inherit the destination's
/// negotiated wire format.
pub struct PromptResolver {
    key: String,
    index: usize,
    registry: SharedRegistry,
    host: Arc<dyn ConsoleHost>,
    commands: Arc<HandoffQueue<OutboundCommand>>,
    pending: Mutex<Option<CancelHandle>>,
}

impl PromptResolver {
    /// Creates a resolver bound to one connection
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        index: usize,
        registry: SharedRegistry,
        host: Arc<dyn ConsoleHost>,
        commands: Arc<HandoffQueue<OutboundCommand>>,
    ) -> Self {
        Self {
            key: key.into(),
            index,
            registry,
            host,
            commands,
            pending: Mutex::new(None),
        }
    }

    /// Hands a flagged line to a fresh prompt thread
    ///
    /// Cancels any prompt still pending on this connection before starting
    /// the new one.
    pub fn submit(self: &Arc<Self>, line: ConsoleLine) {
        let cancel = self.supersede();
        let resolver = Arc::clone(self);
        thread::Builder::new()
            .name(format!("prompt-{}", self.key))
            .spawn(move || resolver.resolve(&line, &cancel))
            .map_err(|e| warn!(server = %self.key, error = %e, "cannot spawn prompt thread"))
            .ok();
    }

    /// Cancels the pending prompt, if any, and registers a new handle
    fn supersede(&self) -> CancelHandle {
        let cancel = CancelHandle::new();
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = pending.replace(cancel.clone()) {
            previous.cancel();
        }
        cancel
    }

    /// Cancels the pending prompt without starting a new one
    pub fn cancel_pending(&self) {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.cancel();
        }
    }

    /// Resolves one flagged line synchronously
    ///
    /// Password-flagged lines always take password mode. Prompt-flagged
    /// lines take yes/no mode when the text ends in a parenthesized choice
    /// list, acknowledgement mode otherwise.
    pub fn resolve(&self, line: &ConsoleLine, cancel: &CancelHandle) {
        if line.password_request {
            self.resolve_password(&line.text, cancel);
        } else if let Some(options) = extract_choices(&line.text) {
            self.resolve_choice(&line.text, &options, cancel);
        } else {
            self.acknowledge(&line.text);
        }
    }

    fn resolve_password(&self, prompt: &str, cancel: &CancelHandle) {
        let secret = self.host.request_password(prompt, cancel);
        if cancel.is_cancelled() {
            debug!(server = %self.key, "password prompt superseded");
            return;
        }
        let value = match &secret {
            Some(s) if !s.expose_secret().is_empty() => s.expose_secret().to_string(),
            _ => NO_SECRET_REPLY.to_string(),
        };
        let counter = self.next_counter(Counter::Password);
        self.reply(format!(
            "{}{counter}={value}",
            tokens::REPLY_PASSWORD_CNTR
        ));
    }

    fn resolve_choice(&self, prompt: &str, options: &[String], cancel: &CancelHandle) {
        let choice = self.host.request_choice(prompt, options, cancel);
        if cancel.is_cancelled() {
            debug!(server = %self.key, "choice prompt superseded");
            return;
        }
        let value = choice
            .as_deref()
            .and_then(|c| c.chars().next())
            .unwrap_or('C');
        let counter = self.next_counter(Counter::Prompt);
        self.reply(format!("{}{counter}={value}", tokens::REPLY_PROMPT_CNTR));
    }

    /// Acknowledgement mode: deduplicate on the embedded epoch timestamp
    ///
    /// A message without a bracketed epoch is always surfaced. No reply is
    /// sent in either case.
    pub fn acknowledge(&self, text: &str) {
        let epoch = extract_epoch(text);
        let surface = self.registry.with(|registry| {
            let mut surface = true;
            registry.update_server(&self.key, |record| {
                if let Some(epoch) = epoch {
                    if epoch > record.last_server_time {
                        record.last_server_time = epoch;
                    } else {
                        surface = false;
                    }
                }
            });
            surface
        });
        if surface {
            self.host.report_message(text);
        } else {
            debug!(server = %self.key, "duplicate acknowledgement suppressed");
        }
    }

    /// Takes the next per-connection counter value
    fn next_counter(&self, which: Counter) -> u64 {
        self.registry.with(|registry| {
            let mut value = 0;
            registry.update_server(&self.key, |record| {
                let counter = match which {
                    Counter::Password => &mut record.password_cntr,
                    Counter::Prompt => &mut record.prompt_cntr,
                };
                *counter += 1;
                value = *counter;
            });
            value
        })
    }

    fn reply(&self, text: String) {
        if self
            .commands
            .push(OutboundCommand::console(self.index, text))
            .is_err()
        {
            warn!(server = %self.key, "outbound queue closed; prompt reply dropped");
        }
    }
}

/// Extracts the trailing parenthesized, slash-delimited choice list
fn extract_choices(text: &str) -> Option<Vec<String>> {
    let captures = choices_regex().captures(text)?;
    let inner = captures.get(1)?.as_str();
    if !inner.contains('/') {
        return None;
    }
    Some(inner.split('/').map(|s| s.trim().to_string()).collect())
}

/// Extracts the first bracketed epoch timestamp from a message
fn extract_epoch(text: &str) -> Option<i64> {
    epoch_regex()
        .captures(text)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}
