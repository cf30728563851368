//! Reserved agent configuration file.
//!
//! ```toml
//! admin_cookie = "secret"
//! [agents]
//! 0 = "cookie-for-agent-0"
//! 12 = "another"
//! ```

use crate::error::RouterError;
use pamr_common::{AgentId, MagicCookie};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReservedConfig {
    admin_cookie: String,
    #[serde(default)]
    agents: BTreeMap<String, String>,
}

/// Admin cookie and pre-assigned agent ids with their cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedConfig {
    /// Cookie authorizing DEBUG frames.
    pub admin_cookie: MagicCookie,
    /// Reserved ids and the cookie each must present.
    pub agents: BTreeMap<AgentId, MagicCookie>,
}

impl ReservedConfig {
    /// Reads and validates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, RouterError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses the TOML text of a reserved agent configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Toml`] on syntax errors and
    /// [`RouterError::Config`] on out-of-range ids or bad cookies.
    pub fn parse(text: &str) -> Result<Self, RouterError> {
        let raw: RawReservedConfig = toml::from_str(text)?;
        let admin_cookie = raw
            .admin_cookie
            .parse()
            .map_err(|e| RouterError::Config(format!("admin_cookie: {e}")))?;

        let mut agents = BTreeMap::new();
        for (key, cookie) in raw.agents {
            let id: AgentId = key
                .parse()
                .map_err(|e| RouterError::Config(format!("agents.{key}: {e}")))?;
            if !id.is_reserved() {
                return Err(RouterError::Config(format!(
                    "agents.{key}: reserved ids must be below {}",
                    pamr_common::types::MIN_DYNAMIC_AGENT_ID
                )));
            }
            let cookie = cookie
                .parse()
                .map_err(|e| RouterError::Config(format!("agents.{key}: {e}")))?;
            agents.insert(id, cookie);
        }

        Ok(Self {
            admin_cookie,
            agents,
        })
    }
}
