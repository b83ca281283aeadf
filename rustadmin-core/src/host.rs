//! Abstract host callbacks consumed by the console core.
//!
//! Presentation is out of scope for this crate: dialogs, resource bundles
//! and status bars live in the embedding application. The core interacts
//! with the user exclusively through the [`ConsoleHost`] trait, which the
//! host implements once and shares across all sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use secrecy::SecretString;

use crate::models::{ConsoleLine, LoginSettings};

/// A handle for dismissing a blocking host interaction from another thread
///
/// When a new interactive prompt supersedes a still-running one, the core
/// cancels the old resolver through this handle. A host that is blocked in
/// `request_password` or `request_choice` must observe the flag and dismiss
/// its UI call, returning `None`, rather than leaving the dialog up.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Creates a fresh, un-cancelled handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation has been requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Callback contract implemented by the embedding application
///
/// All methods may be invoked from background threads; implementations must
/// marshal onto their UI thread themselves. Blocking interactions
/// (`request_password`, `request_choice`) receive a [`CancelHandle`] and
/// must return early with `None` once it fires.
pub trait ConsoleHost: Send + Sync {
    /// Reports a transient status message (status bar style)
    fn report_status(&self, message: &str);

    /// Reports a message requiring user attention (modal style)
    fn report_message(&self, message: &str);

    /// Requests a secret from the user
    ///
    /// Returns `None` when the user cancels or the handle fires.
    fn request_password(&self, prompt: &str, cancel: &CancelHandle) -> Option<SecretString>;

    /// Requests a single choice out of `options`
    ///
    /// Returns the chosen option verbatim, or `None` when dismissed.
    fn request_choice(&self, prompt: &str, options: &[String], cancel: &CancelHandle)
        -> Option<String>;

    /// Requests complete login settings for a new session
    fn request_login_settings(&self) -> Option<LoginSettings>;

    /// Delivers one parsed console line from `server`
    ///
    /// Lines arrive in network order per connection; suppressed lines
    /// (filter or severity mask) are never delivered.
    fn console_line(&self, server: &str, line: &ConsoleLine);

    /// Notifies that the set of known connections changed
    ///
    /// `names` lists the logical names of all currently registered servers.
    fn connection_list_changed(&self, names: &[String]);

    /// Notifies that the Domino service on `name` started or stopped
    fn domino_state_changed(&self, name: &str, running: bool);

    /// Reports a failed connection attempt to `host`
    fn connect_failed(&self, host: &str, reason: &str);

    /// Forwards an opaque process-list fragment for display
    fn report_process_list(&self, text: &str);

    /// Reports the administrator list for `server`
    ///
    /// `restricted` marks the current user as holding restricted rights.
    fn admin_list_changed(&self, server: &str, admins: &[String], restricted: bool);
}

/// A host that ignores every callback
///
/// Useful as a default for headless embeddings and tests. Interactive
/// requests always return `None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHost;

impl NoOpHost {
    /// Creates a new no-op host
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConsoleHost for NoOpHost {
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

    fn console_line(&self, _server: &str, _line: &ConsoleLine) {}

    fn connection_list_changed(&self, _names: &[String]) {}

    fn domino_state_changed(&self, _name: &str, _running: bool) {}

    fn connect_failed(&self, _host: &str, _reason: &str) {}

    fn report_process_list(&self, _text: &str) {}

    fn admin_list_changed(&self, _server: &str, _admins: &[String], _restricted: bool) {}
}
