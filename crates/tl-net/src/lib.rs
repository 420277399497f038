//! Remote scanner transport: control link (handshake + RPC), authorization,
//! data link streaming, and 16-bit sample byte order repair.

pub mod auth;
pub mod byteorder;
pub mod data;
pub mod link;

use std::io;

use sane_wire::{Status, VersionCode, WireError};
use thiserror::Error;

pub use auth::{call_authorized, AuthCallback, AuthState, Credentials, MAX_AUTH_ROUNDS};
pub use byteorder::ByteOrderRepair;
pub use data::{DataLink, IoMode, ReadStatus};
pub use link::ControlLink;
pub use sane_wire::DEFAULT_PORT;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// A malformed record; the control link stays usable.
    #[error("wire: {0}")]
    Wire(#[from] WireError),
    #[error("{host} speaks protocol {peer}, expected {expected}")]
    VersionMismatch {
        host: String,
        peer: VersionCode,
        expected: VersionCode,
    },
    #[error("access to {host} denied")]
    AccessDenied { host: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("device busy")]
    DeviceBusy,
    #[error("out of memory")]
    NoMemory,
    #[error("invalid: {0}")]
    Invalid(String),
    /// Any other non-success status reported by the peer.
    #[error("remote status: {0}")]
    Remote(Status),
}

impl NetError {
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        NetError::Invalid(msg.into())
    }

    /// Map a peer status onto an error, `Ok` for [`Status::Good`].
    pub fn check(status: Status, host: &str) -> Result<(), NetError> {
        match status {
            Status::Good => Ok(()),
            Status::Cancelled => Err(NetError::Cancelled),
            Status::DeviceBusy => Err(NetError::DeviceBusy),
            Status::NoMem => Err(NetError::NoMemory),
            Status::AccessDenied => Err(NetError::AccessDenied {
                host: host.to_string(),
            }),
            Status::Invalid => Err(NetError::invalid(format!("rejected by {host}"))),
            other => Err(NetError::Remote(other)),
        }
    }

    /// Protocol status code equivalent to this error.
    pub fn status(&self) -> Status {
        match self {
            NetError::Io(_) | NetError::Wire(_) | NetError::VersionMismatch { .. } => {
                Status::IoError
            }
            NetError::AccessDenied { .. } => Status::AccessDenied,
            NetError::Cancelled => Status::Cancelled,
            NetError::DeviceBusy => Status::DeviceBusy,
            NetError::NoMemory => Status::NoMem,
            NetError::Invalid(_) => Status::Invalid,
            NetError::Remote(status) => *status,
        }
    }

    /// Whether the error came from the socket rather than from the peer.
    pub fn is_transport(&self) -> bool {
        matches!(self, NetError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_symmetric() {
        for status in [
            Status::Cancelled,
            Status::DeviceBusy,
            Status::NoMem,
            Status::AccessDenied,
            Status::Invalid,
            Status::Jammed,
            Status::CoverOpen,
        ] {
            let err = NetError::check(status, "scanhost").unwrap_err();
            assert_eq!(err.status(), status);
        }
        assert!(NetError::check(Status::Good, "scanhost").is_ok());
    }

    #[test]
    fn access_denied_names_the_host() {
        let err = NetError::check(Status::AccessDenied, "scanhost").unwrap_err();
        assert_eq!(err.to_string(), "access to scanhost denied");
    }

    #[test]
    fn transport_errors_map_to_io_status() {
        let err = NetError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(err.is_transport());
        assert_eq!(err.status(), Status::IoError);
        assert_eq!(NetError::from(WireError::Incomplete).status(), Status::IoError);
    }
}
