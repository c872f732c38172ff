//! Client configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::GroupError;

pub const ENV_HOMESERVER: &str = "GROUP_CLIENT_HOMESERVER";
pub const ENV_ACCESS_TOKEN: &str = "GROUP_CLIENT_ACCESS_TOKEN";
pub const ENV_USER_ID: &str = "GROUP_CLIENT_USER_ID";
pub const ENV_TIMEOUT_SECS: &str = "GROUP_CLIENT_TIMEOUT_SECS";

/// Connection settings for one authenticated user on one homeserver.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the homeserver, e.g. `https://matrix.example.org`.
    pub homeserver: String,
    pub access_token: String,
    /// Fully qualified ID of the authenticated user, e.g. `@alice:example.org`.
    pub user_id: String,
    /// Overall timeout applied by the default transport.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ClientConfig {
    /// Read the configuration from `GROUP_CLIENT_*` environment variables.
    pub fn from_env() -> Result<Self, GroupError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GroupError> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| GroupError::Config(format!("{key} is not set")))
        };
        let timeout_secs = match lookup(ENV_TIMEOUT_SECS) {
            Some(raw) => Some(raw.parse().map_err(|_| {
                GroupError::Config(format!("{ENV_TIMEOUT_SECS} is not a number: {raw}"))
            })?),
            None => None,
        };
        Ok(Self {
            homeserver: required(ENV_HOMESERVER)?,
            access_token: required(ENV_ACCESS_TOKEN)?,
            user_id: required(ENV_USER_ID)?,
            timeout_secs,
        })
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
