//! MIPI CSI-2 D-PHY low-level protocol decoder with a streaming node API
//!
//! This library turns sampled D-PHY lane signals into CSI-2 annotation
//! events and packets. The protocol core is a pure state machine driven
//! one sampling instant at a time; around it sits a thread-per-node
//! streaming runtime with crossbeam channels for running decodes against
//! live sample streams.
//!
//! # Architecture
//!
//! - **protocol**: lane trackers, lane merging, header ECC, payload CRC
//!   and the packet state machine, independent of any I/O
//! - **Csi2Decoder**: the protocol core wrapped as a stream node
//! - **WaveformSource**: replays in-memory waveforms as sample streams
//! - **Scheduler**: manages node lifecycle and parallel execution
//!
//! # Example
//!
//! ```no_run
//! use csi2_dphy::{Csi2Config, Csi2Decoder, Pipeline};
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("decoder", Csi2Decoder::new(Csi2Config::default(), 1)?)?;
//! // ... connect a sample source and run
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod nodes;
pub mod protocol;
pub mod runtime;

// Re-export the protocol surface
pub use protocol::session::{
    CollectSink, Csi2Config, Csi2Session, EventSink, LaneCountMode,
};
pub use protocol::types::{
    Csi2Event, DataType, EventKind, LaneSample, LaneState, Packet, PacketHeader, PayloadChunk,
    ProtocolErrorKind,
};

// Re-export data types from runtime
pub use runtime::Sample;

// Re-export streaming nodes
pub use nodes::{Csi2Decoder, WaveformSource};

// Re-export streaming runtime components
pub use runtime::{
    ConnectionError, InputPort, OutputPort, Pipeline, PortDirection, PortSchema, ProcessNode,
    Scheduler, WorkError, WorkResult, register_type,
};

#[derive(Error, Debug)]
pub enum Csi2Error {
    #[error("lane count {0} out of range (1-4)")]
    InvalidLaneCount(u8),

    #[error("bitrate {0} Mbps out of range (500-2500)")]
    InvalidBitrate(u32),

    #[error("activity threshold must be at least 1")]
    InvalidThreshold,

    #[error("waveform channel {channel:?} is not in ascending time order")]
    UnorderedWaveform { channel: String },
}

pub type Result<T> = std::result::Result<T, Csi2Error>;
