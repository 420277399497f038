#![cfg_attr(docsrs, feature(doc_cfg))]
//! Wire format of the remote scanner access protocol (transport-agnostic).
//!
//! The control connection exchanges word-oriented binary records: a procedure
//! word followed by its request, answered by one reply record. This crate
//! provides the codec primitives, the typed values those records carry, and
//! the records themselves.
//!
//! ```rust
//! use sane_wire::{decode, encode_call, rpc::OpenReply, Procedure, Status};
//!
//! let call = encode_call(Procedure::Close, &7i32, sane_wire::PROTOCOL_BUILD);
//! assert_eq!(call.len(), 8);
//!
//! let reply = sane_wire::encode(
//!     &OpenReply { status: Status::Good, handle: 3, resource_to_authorize: None },
//!     sane_wire::PROTOCOL_BUILD,
//! );
//! let (open, _) = decode::<OpenReply>(&reply, sane_wire::PROTOCOL_BUILD).unwrap();
//! assert_eq!(open.handle, 3);
//! ```

pub mod codec;
pub mod rpc;
pub mod types;

pub use codec::{decode, encode, Decode, Encode, WireError, WireReader, WireWriter, WORD_SIZE};
pub use rpc::{encode_call, AuthChallenge, Procedure};
pub use types::{
    Action, ByteOrder, Capabilities, Constraint, Device, Frame, Info, OptionDescriptor,
    OptionValue, Parameters, Range, Status, Unit, ValueType, VersionCode,
};

/// Well-known TCP port of the remote scanner daemon.
pub const DEFAULT_PORT: u16 = 6566;
/// Major version spoken by this implementation.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;
/// Protocol build announced during the handshake.
pub const PROTOCOL_BUILD: u16 = 3;
/// Older protocol build still accepted from peers.
pub const LEGACY_PROTOCOL_BUILD: u16 = 2;
/// Sentinel record length announcing a status byte on the data connection.
pub const DATA_ERROR_SENTINEL: u32 = 0xFFFF_FFFF;

/// Version code sent in the initial request.
pub const fn local_version() -> VersionCode {
    VersionCode::new(VERSION_MAJOR, VERSION_MINOR, PROTOCOL_BUILD)
}

/// Whether a peer announcing `build` can be talked to.
pub const fn is_supported_build(build: u16) -> bool {
    build == PROTOCOL_BUILD || build == LEGACY_PROTOCOL_BUILD
}
