//! Client configuration: defaults, the line-oriented host file, and the
//! `SANE_NET_HOSTS` / `SANE_NET_TIMEOUT` environment variables.
//!
//! Host file format:
//!
//! ```text
//! # comment
//! connect_timeout = 30
//! scanhost.example.org
//! [2001:db8::12]
//! ```
//!
//! Every non-empty, non-comment line other than the `connect_timeout`
//! directive names one host. IPv6 literals may be bracketed.

use std::path::Path;
use std::time::Duration;
use std::{env, fs, io};

use thiserror::Error;
use tracing::{debug, info};

/// Conventional file name of the host list.
pub const CONFIG_FILE_NAME: &str = "net.conf";
/// Colon separated list of additional hosts.
pub const HOSTS_ENV: &str = "SANE_NET_HOSTS";
/// Connect timeout override in seconds.
pub const TIMEOUT_ENV: &str = "SANE_NET_TIMEOUT";

const TIMEOUT_DIRECTIVE: &str = "connect_timeout";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: invalid connect_timeout {value:?}")]
    InvalidTimeout { line: usize, value: String },
    #[error("SANE_NET_TIMEOUT: invalid timeout {0:?}")]
    InvalidEnvTimeout(String),
    #[error("SANE_NET_HOSTS: missing ']' in {0:?}")]
    UnterminatedBracket(String),
}

/// Settings used by [`crate::Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    /// TCP port of the remote daemon.
    pub port: u16,
    /// Bound on each connect attempt; `None` waits as long as the OS does.
    pub connect_timeout: Option<Duration>,
    /// Name announced in the handshake; falls back to `$USER` / `$LOGNAME`.
    pub username: Option<String>,
    /// Hosts registered at startup, in order.
    pub hosts: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: sane_wire::DEFAULT_PORT,
            connect_timeout: None,
            username: None,
            hosts: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Defaults plus the environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Merge a host file. A missing file is not an error.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => {
                info!(path = %path.display(), "reading host list");
                self.apply_config_text(&text)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no host list");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Merge host file contents.
    pub fn apply_config_text(&mut self, text: &str) -> Result<(), ConfigError> {
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix(TIMEOUT_DIRECTIVE) {
                // A directive without '=' is ignored.
                let Some(value) = rest.trim_start().strip_prefix('=') else {
                    continue;
                };
                let value = value.trim();
                if value.is_empty() {
                    continue;
                }
                self.connect_timeout =
                    parse_timeout(value).ok_or_else(|| ConfigError::InvalidTimeout {
                        line: idx + 1,
                        value: value.to_string(),
                    })?;
                debug!(timeout = ?self.connect_timeout, "connect timeout from host list");
                continue;
            }
            self.hosts.push(strip_brackets(line).to_string());
        }
        Ok(())
    }

    /// Merge `SANE_NET_HOSTS` and `SANE_NET_TIMEOUT`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_values(
            env::var(HOSTS_ENV).ok().as_deref(),
            env::var(TIMEOUT_ENV).ok().as_deref(),
        )
    }

    /// Merge explicit environment values; hosts are appended and the
    /// timeout replaces any earlier setting.
    pub fn apply_env_values(
        &mut self,
        hosts: Option<&str>,
        timeout: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(list) = hosts {
            let parsed = parse_host_list(list)?;
            debug!(count = parsed.len(), "hosts from {HOSTS_ENV}");
            self.hosts.extend(parsed);
        }
        if let Some(value) = timeout {
            let value = value.trim();
            self.connect_timeout = parse_timeout(value)
                .ok_or_else(|| ConfigError::InvalidEnvTimeout(value.to_string()))?;
            debug!(timeout = ?self.connect_timeout, "connect timeout from {TIMEOUT_ENV}");
        }
        Ok(())
    }

    /// Username for the handshake.
    pub fn effective_username(&self) -> Option<String> {
        self.username
            .clone()
            .or_else(|| env::var("USER").ok())
            .or_else(|| env::var("LOGNAME").ok())
            .filter(|name| !name.is_empty())
    }
}

/// Seconds as a timeout; zero or negative disables it.
fn parse_timeout(value: &str) -> Option<Option<Duration>> {
    let secs: i64 = value.parse().ok()?;
    Some((secs > 0).then(|| Duration::from_secs(secs as u64)))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Split a colon separated host list. Bracketed entries may contain colons.
pub fn parse_host_list(list: &str) -> Result<Vec<String>, ConfigError> {
    let mut hosts = Vec::new();
    let mut rest = list;
    while !rest.is_empty() {
        let (host, tail) = if let Some(inner) = rest.strip_prefix('[') {
            let end = inner
                .find(']')
                .ok_or_else(|| ConfigError::UnterminatedBracket(rest.to_string()))?;
            let tail = &inner[end + 1..];
            (&inner[..end], tail.strip_prefix(':').unwrap_or(tail))
        } else {
            match rest.split_once(':') {
                Some((host, tail)) => (host, tail),
                None => (rest, ""),
            }
        };
        if !host.is_empty() {
            hosts.push(host.to_string());
        }
        rest = tail;
    }
    Ok(hosts)
}
