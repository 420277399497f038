//! Client workspace for scanners shared over the network.
//!
//! * [`wire`]: protocol constants, typed records and the word codec.
//! * [`net`]: control link, authorization, data link and sample byte swapping.
//! * [`remote`]: configuration, host registry, discovery and device sessions.

pub use sane_remote as remote;
pub use sane_wire as wire;
pub use tl_net as net;
