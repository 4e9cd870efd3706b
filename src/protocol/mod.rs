//! CSI-2 / D-PHY protocol core
//!
//! Pure decoding logic with no channels, threads or I/O: lane state
//! tracking and sync hunting ([`lane`]), lane admission and byte merging
//! ([`link`]), the packet state machine ([`packet`]) and the session
//! object that drives them ([`session`]). The stream node in
//! [`crate::nodes`] is a thin wrapper around [`Csi2Session`].

pub mod checksum;
pub mod ecc;
mod lane;
mod link;
mod packet;
pub mod session;
pub mod types;

pub use link::admit;
pub use session::{CollectSink, Csi2Config, Csi2Session, EventSink, LaneCountMode};
pub use types::{
    Csi2Event, DataType, EventKind, LaneSample, LaneState, Packet, PacketHeader, PayloadChunk,
    ProtocolErrorKind,
};
