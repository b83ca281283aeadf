//! Credentials model for in-memory secret storage.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Credentials for the console handshake
///
/// The secret is held as a `SecretString` for in-memory hygiene and is never
/// serialized; it exists only for the lifetime of the owning connection
/// record.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Administrative user name
    pub user: String,
    /// Secret (memory only, never serialized)
    pub secret: Option<SecretString>,
}

/// Serializable representation of credentials (without the secret)
#[derive(Serialize, Deserialize)]
struct CredentialsSerde {
    user: String,
}

impl Serialize for Credentials {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        CredentialsSerde {
            user: self.user.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Credentials {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let serde = CredentialsSerde::deserialize(deserializer)?;
        Ok(Self {
            user: serde.user,
            secret: None,
        })
    }
}

impl Credentials {
    /// Creates credentials with a user name only
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: None,
        }
    }

    /// Creates credentials with user name and secret
    #[must_use]
    pub fn with_secret(user: impl Into<String>, secret: SecretString) -> Self {
        Self {
            user: user.into(),
            secret: Some(secret),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_not_serialized() {
        let creds = Credentials::with_secret("admin", SecretString::from("hunter2"));
        let json = serde_json::to_string(&creds).unwrap();
        assert!(json.contains("admin"));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_deserialized_secret_is_empty() {
        let creds: Credentials = serde_json::from_str(r#"{"user":"admin"}"#).unwrap();
        assert_eq!(creds.user, "admin");
        assert!(creds.secret.is_none());
    }
}
