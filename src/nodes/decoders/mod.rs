//! Protocol decoder nodes
//!
//! Decoders for live data processing using the channel-based architecture.

pub mod csi2_decoder;

pub use csi2_decoder::Csi2Decoder;
