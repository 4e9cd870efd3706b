//! Core CSI-2 protocol data types and wire constants

use std::fmt;

/// Lane synchronization byte, sent LSB-first at the start of every
/// high-speed burst. Start-of-Transmission shares the same value by
/// design of the protocol.
pub const SYNC_BYTE: u8 = 0xB8;

/// Start-of-Transmission marker in the merged byte stream.
pub const SOT_BYTE: u8 = SYNC_BYTE;

/// End-of-Transmission marker in the merged byte stream.
pub const EOT_BYTE: u8 = 0x9C;

/// Physical state of one D-PHY data lane at a sample instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    /// Low-power stop state (both lines high). The idle/rest state.
    Lp11,
    /// High-speed logic 0, before sync has been matched.
    Hs0,
    /// High-speed logic 1, before sync has been matched.
    Hs1,
    /// Sync sequence matched on this lane.
    HsSync,
    /// Post-sync payload bit stream. Only this state contributes bytes.
    HsData,
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LaneState::Lp11 => "LP-11",
            LaneState::Hs0 => "HS-0",
            LaneState::Hs1 => "HS-1",
            LaneState::HsSync => "HS-SYNC",
            LaneState::HsData => "HS-DATA",
        };
        write!(f, "{}", s)
    }
}

/// One logical sample of a lane's differential pair.
///
/// `p && n` is the LP-11 stop state; any other combination is a
/// high-speed level whose bit value is `p`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSample {
    pub p: bool,
    pub n: bool,
}

impl LaneSample {
    pub fn new(p: bool, n: bool) -> Self {
        Self { p, n }
    }

    /// High-speed bit value carried by this sample.
    pub fn bit(&self) -> bool {
        self.p
    }

    /// True if the pair is in the LP-11 stop state.
    pub fn is_lp11(&self) -> bool {
        self.p && self.n
    }
}

/// 6-bit CSI-2 data type code from the packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataType(pub u8);

impl DataType {
    pub const FRAME_START: DataType = DataType(0x00);
    pub const FRAME_END: DataType = DataType(0x01);
    pub const LINE_START: DataType = DataType(0x02);
    pub const LINE_END: DataType = DataType(0x03);
    pub const YUV420_8BIT: DataType = DataType(0x18);
    pub const YUV420_10BIT: DataType = DataType(0x19);
    pub const YUV420_8BIT_LEGACY: DataType = DataType(0x1A);
    pub const YUV422_8BIT: DataType = DataType(0x1E);
    pub const YUV422_10BIT: DataType = DataType(0x1F);
    pub const RGB444: DataType = DataType(0x20);
    pub const RGB555: DataType = DataType(0x21);
    pub const RGB565: DataType = DataType(0x22);
    pub const RGB666: DataType = DataType(0x23);
    pub const RGB888: DataType = DataType(0x24);
    pub const RAW6: DataType = DataType(0x28);
    pub const RAW7: DataType = DataType(0x29);
    pub const RAW8: DataType = DataType(0x2A);
    pub const RAW10: DataType = DataType(0x2B);
    pub const RAW12: DataType = DataType(0x2C);
    pub const RAW14: DataType = DataType(0x2D);
    pub const JPEG: DataType = DataType(0x30);

    /// The 6 significant bits of the code.
    pub fn code(&self) -> u8 {
        self.0 & 0x3F
    }

    /// Codes 0x00..=0x0F are the reserved short-packet range: frame/line
    /// delimiters and the generic short codes. Everything above carries a
    /// payload.
    pub fn is_short(&self) -> bool {
        self.code() <= 0x0F
    }

    /// Semantic name for known codes, `None` for reserved/unknown ones.
    pub fn name(&self) -> Option<&'static str> {
        let name = match self.code() {
            0x00 => "Frame Start",
            0x01 => "Frame End",
            0x02 => "Line Start",
            0x03 => "Line End",
            0x08..=0x0F => return Some("Generic Short"),
            0x18 => "YUV420 8-bit",
            0x19 => "YUV420 10-bit",
            0x1A => "YUV420 8-bit (legacy)",
            0x1E => "YUV422 8-bit",
            0x1F => "YUV422 10-bit",
            0x20 => "RGB444",
            0x21 => "RGB555",
            0x22 => "RGB565",
            0x23 => "RGB666",
            0x24 => "RGB888",
            0x28 => "RAW6",
            0x29 => "RAW7",
            0x2A => "RAW8",
            0x2B => "RAW10",
            0x2C => "RAW12",
            0x2D => "RAW14",
            0x30 => "JPEG",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "Unknown(0x{:02X})", self.code()),
        }
    }
}

/// Decoded 4-byte packet header.
///
/// The 16-bit field is the word count for long packets and the short
/// data for short packets; which one it is depends on the data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub data_type: DataType,
    pub virtual_channel: u8,
    pub word_count: u16,
    pub ecc: u8,
}

impl PacketHeader {
    /// Decode the four header bytes: data ID (VC in bits 7:6, DT in bits
    /// 5:0), word count little-endian, ECC.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            data_type: DataType(bytes[0] & 0x3F),
            virtual_channel: bytes[0] >> 6,
            word_count: u16::from_le_bytes([bytes[1], bytes[2]]),
            ecc: bytes[3],
        }
    }
}

/// A fully decoded CSI-2 packet, for programmatic downstream consumption.
///
/// Truncated packets never appear here; they surface only as
/// [`ProtocolErrorKind`] events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Short {
        data_type: DataType,
        virtual_channel: u8,
        short_data: u16,
        ss: u64,
        es: u64,
    },
    Long {
        data_type: DataType,
        virtual_channel: u8,
        word_count: u16,
        payload: Vec<u8>,
        checksum: u16,
        checksum_valid: bool,
        ss: u64,
        es: u64,
    },
}

impl Packet {
    pub fn data_type(&self) -> DataType {
        match self {
            Packet::Short { data_type, .. } | Packet::Long { data_type, .. } => *data_type,
        }
    }

    pub fn virtual_channel(&self) -> u8 {
        match self {
            Packet::Short {
                virtual_channel, ..
            }
            | Packet::Long {
                virtual_channel, ..
            } => *virtual_channel,
        }
    }
}

/// Raw long-packet payload bytes, uninterpreted, for export sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadChunk {
    pub data: Vec<u8>,
    pub ss: u64,
    pub es: u64,
}

/// Recoverable protocol faults. These are reported as events, never as
/// `Err`: every fault resets the packet machine to idle and decoding
/// resumes at the next sync/SoT.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolErrorKind {
    #[error("uncorrectable header ECC error")]
    HeaderEcc,

    #[error("truncated packet: header incomplete ({got}/4 bytes)")]
    TruncatedHeader { got: u8 },

    #[error("truncated packet: {got}/{expected} payload bytes")]
    TruncatedPayload { expected: u16, got: usize },

    #[error("truncated packet: footer incomplete")]
    TruncatedFooter,

    #[error("configured lane {lane} missing sync or activity")]
    InactiveLane { lane: u8 },
}

/// One time-correlated protocol annotation.
///
/// `ss`/`es` delimit the sample range the event was decoded from.
/// Events are emitted in nondecreasing `ss` order; within one timestamp,
/// lane-level events precede merge-level events precede packet events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Csi2Event {
    pub kind: EventKind,
    pub ss: u64,
    pub es: u64,
}

/// Event categories produced by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A lane changed physical state.
    LaneState {
        lane: u8,
        from: LaneState,
        to: LaneState,
    },
    /// Sync byte matched on a lane.
    SyncDetected { lane: u8 },
    /// Result of lane-count auto-detection for the current burst.
    LaneCount { lanes: u8 },
    /// Start of Transmission.
    Sot,
    /// End of Transmission.
    Eot,
    /// A complete short packet.
    ShortPacket {
        data_type: DataType,
        virtual_channel: u8,
        short_data: u16,
    },
    /// A long packet header passed ECC and dispatched to payload
    /// collection.
    LongPacketHeader {
        data_type: DataType,
        virtual_channel: u8,
        word_count: u16,
    },
    /// A run of payload bytes completed.
    PayloadRun { len: usize },
    /// Footer checksum comparison result. A mismatch is a data-integrity
    /// warning; the packet is still emitted with `checksum_valid = false`.
    Footer {
        received: u16,
        computed: u16,
        valid: bool,
    },
    /// Human-meaning label for the packet's data type.
    DataTypeLabel { data_type: DataType },
    /// Virtual channel label for the packet.
    VirtualChannelLabel { virtual_channel: u8 },
    /// A single-bit header error was corrected. `bit` 0..=23 indexes the
    /// header data bits, 24..=29 the ECC bits themselves.
    EccCorrected { bit: u8 },
    /// Recoverable protocol fault, see [`ProtocolErrorKind`].
    ProtocolError { kind: ProtocolErrorKind },
    /// Active lanes produced bytes at inconsistent rates; membership was
    /// re-derived and merging continued.
    LaneSyncError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_classification() {
        assert!(DataType::FRAME_START.is_short());
        assert!(DataType::LINE_END.is_short());
        assert!(DataType(0x0F).is_short());
        assert!(!DataType::RAW8.is_short());
        assert!(!DataType::JPEG.is_short());
    }

    #[test]
    fn test_data_type_labels() {
        assert_eq!(DataType::RAW8.to_string(), "RAW8");
        assert_eq!(DataType::FRAME_START.to_string(), "Frame Start");
        assert_eq!(DataType(0x08).to_string(), "Generic Short");
        // Reserved codes decode structurally but label as unknown.
        assert_eq!(DataType(0x3F).to_string(), "Unknown(0x3F)");
    }

    #[test]
    fn test_header_from_bytes() {
        // VC=2, DT=RAW8 (0x2A), WC=0x0120 little-endian, ECC=0x55
        let header = PacketHeader::from_bytes([0x80 | 0x2A, 0x20, 0x01, 0x55]);
        assert_eq!(header.data_type, DataType::RAW8);
        assert_eq!(header.virtual_channel, 2);
        assert_eq!(header.word_count, 0x0120);
        assert_eq!(header.ecc, 0x55);
    }

    #[test]
    fn test_lane_sample_states() {
        assert!(LaneSample::new(true, true).is_lp11());
        assert!(!LaneSample::new(true, false).is_lp11());
        assert!(LaneSample::new(true, false).bit());
        assert!(!LaneSample::new(false, true).bit());
    }
}
