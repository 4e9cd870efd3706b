//! Node-based signal processing system
//!
//! This module provides the stream nodes that run on the channel-based
//! runtime:
//! - **Sources**: produce run-length encoded signal samples (waveforms)
//! - **Decoders**: turn lane samples into protocol events and packets
//! - Sinks are application-defined; see `demos/frame_decode.rs`
//!
//! All nodes communicate over crossbeam channels and execute on the
//! thread-per-node [`Scheduler`](crate::runtime::Scheduler).

pub mod decoders;
mod waveform;

pub use decoders::Csi2Decoder;
pub use waveform::WaveformSource;

// Re-export Sample from runtime
pub use crate::runtime::Sample;
