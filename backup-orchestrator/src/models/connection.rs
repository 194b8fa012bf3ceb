use serde::{Deserialize, Serialize};

use crate::credentials::{CredentialOverrides, ResolvedCredentials, StoredKey};

/// Where and how to reach a system, before credentials are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTarget {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub local_mode: bool,
    #[serde(default)]
    pub overrides: CredentialOverrides,
    #[serde(default)]
    pub stored_key: Option<StoredKey>,
}

fn default_port() -> u16 { 22 }

/// Fully resolved connection parameters. Lives for one operation.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: ResolvedCredentials,
    pub local_mode: bool,
}

impl ConnectionDescriptor {
    pub fn local() -> Self {
        Self {
            host: "localhost".into(),
            port: 22,
            username: String::new(),
            credentials: ResolvedCredentials::default(),
            local_mode: true,
        }
    }

    pub fn remote(host: &str, port: u16, username: &str, credentials: ResolvedCredentials) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            credentials,
            local_mode: false,
        }
    }

    pub fn secrets(&self) -> Vec<String> {
        self.credentials.secrets()
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("local_mode", &self.local_mode)
            .finish_non_exhaustive()
    }
}
