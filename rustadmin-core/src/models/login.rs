//! Login settings resolved before a handshake starts.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// How the remote console service is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Connect straight to the console service
    Direct {
        /// Remote host
        host: String,
        /// Console service port
        port: u16,
    },
    /// Resolve a logical service name through a relay (binder) first
    Relayed {
        /// Relay host
        binder_host: String,
        /// Relay port
        binder_port: u16,
        /// Logical service name registered with the relay
        service: String,
    },
}

/// Everything the handshake needs to start a session
///
/// Produced by the host application (typically from its login dialog); the
/// initial secret is optional, the handshake prompts for one on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSettings {
    /// Target endpoint, direct or relayed
    pub endpoint: Endpoint,
    /// Administrative user name
    pub user: String,
    /// Initial secret, when already known (memory only, never serialized)
    #[serde(skip)]
    pub secret: Option<SecretString>,
}

impl LoginSettings {
    /// Creates settings for a direct connection
    #[must_use]
    pub fn direct(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Direct {
                host: host.into(),
                port,
            },
            user: user.into(),
            secret: None,
        }
    }

    /// Creates settings for a relayed connection
    #[must_use]
    pub fn relayed(
        binder_host: impl Into<String>,
        binder_port: u16,
        service: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Endpoint::Relayed {
                binder_host: binder_host.into(),
                binder_port,
                service: service.into(),
            },
            user: user.into(),
            secret: None,
        }
    }

    /// Attaches an initial secret
    #[must_use]
    pub fn with_secret(mut self, secret: SecretString) -> Self {
        self.secret = Some(secret);
        self
    }

    /// The host name the user asked to reach, for reporting
    #[must_use]
    pub fn display_host(&self) -> &str {
        match &self.endpoint {
            Endpoint::Direct { host, .. } => host,
            Endpoint::Relayed { service, .. } => service,
        }
    }
}
