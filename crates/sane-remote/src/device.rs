//! Qualified device names of the form `host:device`.

use std::fmt;
use std::str::FromStr;

use tl_net::NetError;

/// A device reachable through a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RemoteDevice {
    /// Qualified name accepted by [`crate::Client::open`].
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Device type, e.g. "flatbed scanner".
    pub kind: String,
}

/// A parsed `host:device` name. An empty device selects the first device of
/// the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceName {
    pub host: String,
    pub device: String,
}

impl DeviceName {
    pub fn new(host: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            device: device.into(),
        }
    }

    /// Split a qualified name. Hosts containing `:` must be bracketed,
    /// as in `[fe80::1]:pixma`.
    pub fn parse(full: &str) -> Result<Self, NetError> {
        let (host, device) = if let Some(inner) = full.strip_prefix('[') {
            let end = inner
                .find(']')
                .ok_or_else(|| NetError::Invalid(format!("missing ']' in {full:?}")))?;
            let rest = &inner[end + 1..];
            let device = match rest.strip_prefix(':') {
                Some(device) => device,
                None if rest.is_empty() => "",
                None => {
                    return Err(NetError::Invalid(format!(
                        "unexpected text after ']' in {full:?}"
                    )))
                }
            };
            (&inner[..end], device)
        } else {
            full.split_once(':').unwrap_or((full, ""))
        };
        if host.is_empty() {
            return Err(NetError::Invalid(format!("empty host name in {full:?}")));
        }
        Ok(Self::new(host, device))
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.device)
        } else {
            write!(f, "{}:{}", self.host, self.device)
        }
    }
}

impl FromStr for DeviceName {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceName::parse(s)
    }
}
