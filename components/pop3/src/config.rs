//! Process-wide configuration record (§3).
//!
//! Read-mostly: session and ET handlers only ever read through a shared
//! handle; writes happen exclusively from the management channel
//! (§4.9), on request threads that never hold the lock across an
//! `.await` for longer than the copy/replace itself takes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A MIME `type/subtype` pair from `filtered_media_types`. `subtype ==
/// "*"` matches any subtype of `type_` (§3).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MediaType {
    #[serde(rename = "type")]
    pub type_: String,
    pub subtype: String,
}

impl MediaType {
    pub fn parse(s: &str) -> Option<MediaType> {
        let mut parts = s.splitn(2, '/');
        let type_ = parts.next()?.trim().to_ascii_lowercase();
        let subtype = parts.next()?.trim().to_ascii_lowercase();
        if type_.is_empty() || subtype.is_empty() {
            return None;
        }
        Some(MediaType { type_, subtype })
    }

    pub fn matches(&self, type_: &str, subtype: &str) -> bool {
        self.type_.eq_ignore_ascii_case(type_)
            && (self.subtype == "*" || self.subtype.eq_ignore_ascii_case(subtype))
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub origin_server: String,
    pub origin_port: u16,

    pub listen_address: String,
    pub port: u16,

    pub management_address: String,
    pub management_port: u16,

    pub replacement_msg: String,
    pub filtered_media_types: BTreeSet<MediaType>,

    pub et_activated: bool,
    pub filter_command: Option<String>,
    pub error_file: String,

    pub version: String,

    pub user: String,
    pub pass: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            origin_server: "127.0.0.1".to_string(),
            origin_port: 110,
            listen_address: "0.0.0.0".to_string(),
            port: 1100,
            management_address: "127.0.0.1".to_string(),
            management_port: 1199,
            replacement_msg: "This part of the message has been removed.\r\n".to_string(),
            filtered_media_types: BTreeSet::new(),
            et_activated: false,
            filter_command: None,
            error_file: "popg-filter.err".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            user: "admin".to_string(),
            pass: "admin".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Config> {
        Ok(toml::from_str(s)?)
    }

    /// Comma-joined media type list, for `FILTER_MEDIAS` (§4.7).
    pub fn filter_medias_env(&self) -> String {
        self.filtered_media_types
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Newline-joined media type list, for management `LIST` (§4.9).
    pub fn filter_medias_list(&self) -> String {
        self.filtered_media_types
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Shared, mutably-read handle to the process-wide [`Config`].
pub type SharedConfig = Arc<RwLock<Config>>;

pub fn shared(config: Config) -> SharedConfig {
    Arc::new(RwLock::new(config))
}
