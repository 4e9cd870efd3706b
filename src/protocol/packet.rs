//! Packet layer state machine
//!
//! Consumes the merged byte stream one byte at a time and decodes packet
//! structure: 4-byte header with ECC, short-packet dispatch, long-packet
//! payload with CRC-16 footer, and the EoT / back-to-back-SoT trailer.
//! Every fault path resets to `Idle`; the machine never refuses input.

use tracing::{debug, trace};

use super::checksum;
use super::ecc::{self, EccCheck};
use super::lane::ReadyByte;
use super::session::EventSink;
use super::types::{
    Csi2Event, EventKind, EOT_BYTE, Packet, PacketHeader, PayloadChunk, ProtocolErrorKind,
    SOT_BYTE,
};

/// Each variant carries exactly the data its phase needs, so a byte is
/// dispatched by one `match` with no nested mode flags.
enum PacketState {
    /// Not inside a packet; scanning for an SoT byte.
    Idle,
    /// Collecting the 4 header bytes.
    Header { buf: [u8; 4], have: u8, ss: u64 },
    /// Accumulating `word_count` payload bytes with a running CRC.
    Payload {
        header: PacketHeader,
        header_ss: u64,
        payload: Vec<u8>,
        payload_ss: u64,
        crc: u16,
    },
    /// Collecting the 2-byte checksum, low byte first.
    Footer {
        header: PacketHeader,
        header_ss: u64,
        payload: Vec<u8>,
        crc: u16,
        footer_ss: u64,
        low: Option<u8>,
    },
    /// After a complete packet: EoT, another SoT, or trail filler.
    EotOrNextSot,
}

pub(crate) struct PacketEngine {
    state: PacketState,
    /// Set at burst start; the SoT marker is emitted on the first byte so
    /// it lands on real samples. The sync byte itself never reaches this
    /// layer, the lane trackers consume it.
    sot_pending: bool,
}

impl PacketEngine {
    pub fn new() -> Self {
        Self {
            state: PacketState::Idle,
            sot_pending: false,
        }
    }

    /// The merger established a burst: the next bytes are a header.
    pub fn begin_burst(&mut self) {
        self.state = PacketState::Header {
            buf: [0; 4],
            have: 0,
            ss: 0,
        };
        self.sot_pending = true;
    }

    pub fn push_byte<S: EventSink>(&mut self, byte: ReadyByte, sink: &mut S) {
        if self.sot_pending {
            self.sot_pending = false;
            sink.event(Csi2Event {
                kind: EventKind::Sot,
                ss: byte.ss,
                es: byte.ss,
            });
        }

        self.state = match std::mem::replace(&mut self.state, PacketState::Idle) {
            PacketState::Idle => {
                if byte.value == SOT_BYTE {
                    sink.event(Csi2Event {
                        kind: EventKind::Sot,
                        ss: byte.ss,
                        es: byte.es,
                    });
                    PacketState::Header {
                        buf: [0; 4],
                        have: 0,
                        ss: 0,
                    }
                } else {
                    trace!("idle: discarding 0x{:02X}", byte.value);
                    PacketState::Idle
                }
            }

            PacketState::Header { mut buf, mut have, mut ss } => {
                if have == 0 {
                    ss = byte.ss;
                }
                buf[have as usize] = byte.value;
                have += 1;
                if have < 4 {
                    PacketState::Header { buf, have, ss }
                } else {
                    self.finish_header(buf, ss, byte.es, sink)
                }
            }

            PacketState::Payload {
                header,
                header_ss,
                mut payload,
                mut payload_ss,
                mut crc,
            } => {
                if payload.is_empty() {
                    payload_ss = byte.ss;
                }
                crc = checksum::update(crc, byte.value);
                payload.push(byte.value);
                if payload.len() < header.word_count as usize {
                    PacketState::Payload {
                        header,
                        header_ss,
                        payload,
                        payload_ss,
                        crc,
                    }
                } else {
                    sink.event(Csi2Event {
                        kind: EventKind::PayloadRun { len: payload.len() },
                        ss: payload_ss,
                        es: byte.es,
                    });
                    sink.payload(PayloadChunk {
                        data: payload.clone(),
                        ss: payload_ss,
                        es: byte.es,
                    });
                    PacketState::Footer {
                        header,
                        header_ss,
                        payload,
                        crc,
                        footer_ss: 0,
                        low: None,
                    }
                }
            }

            PacketState::Footer {
                header,
                header_ss,
                payload,
                crc,
                mut footer_ss,
                low,
            } => match low {
                None => {
                    footer_ss = byte.ss;
                    PacketState::Footer {
                        header,
                        header_ss,
                        payload,
                        crc,
                        footer_ss,
                        low: Some(byte.value),
                    }
                }
                Some(low) => {
                    let received = u16::from_le_bytes([low, byte.value]);
                    let valid = received == crc;
                    sink.event(Csi2Event {
                        kind: EventKind::Footer {
                            received,
                            computed: crc,
                            valid,
                        },
                        ss: footer_ss,
                        es: byte.es,
                    });
                    debug!(
                        "long packet {} vc{} wc={} checksum {}",
                        header.data_type,
                        header.virtual_channel,
                        header.word_count,
                        if valid { "ok" } else { "BAD" }
                    );
                    sink.packet(Packet::Long {
                        data_type: header.data_type,
                        virtual_channel: header.virtual_channel,
                        word_count: header.word_count,
                        payload,
                        checksum: received,
                        checksum_valid: valid,
                        ss: header_ss,
                        es: byte.es,
                    });
                    PacketState::EotOrNextSot
                }
            },

            PacketState::EotOrNextSot => match byte.value {
                EOT_BYTE => {
                    sink.event(Csi2Event {
                        kind: EventKind::Eot,
                        ss: byte.ss,
                        es: byte.es,
                    });
                    PacketState::Idle
                }
                SOT_BYTE => {
                    sink.event(Csi2Event {
                        kind: EventKind::Sot,
                        ss: byte.ss,
                        es: byte.es,
                    });
                    PacketState::Header {
                        buf: [0; 4],
                        have: 0,
                        ss: 0,
                    }
                }
                other => {
                    trace!("trail: discarding 0x{other:02X}");
                    PacketState::EotOrNextSot
                }
            },
        };
    }

    fn finish_header<S: EventSink>(
        &mut self,
        buf: [u8; 4],
        ss: u64,
        es: u64,
        sink: &mut S,
    ) -> PacketState {
        let data = match ecc::verify([buf[0], buf[1], buf[2]], buf[3]) {
            EccCheck::Valid => [buf[0], buf[1], buf[2]],
            EccCheck::Corrected { data, bit } => {
                sink.event(Csi2Event {
                    kind: EventKind::EccCorrected { bit },
                    ss,
                    es,
                });
                data
            }
            EccCheck::Uncorrectable => {
                sink.event(Csi2Event {
                    kind: EventKind::ProtocolError {
                        kind: ProtocolErrorKind::HeaderEcc,
                    },
                    ss,
                    es,
                });
                return PacketState::Idle;
            }
        };

        let header = PacketHeader::from_bytes([data[0], data[1], data[2], buf[3]]);
        sink.event(Csi2Event {
            kind: EventKind::DataTypeLabel {
                data_type: header.data_type,
            },
            ss,
            es,
        });
        sink.event(Csi2Event {
            kind: EventKind::VirtualChannelLabel {
                virtual_channel: header.virtual_channel,
            },
            ss,
            es,
        });

        if header.data_type.is_short() {
            sink.event(Csi2Event {
                kind: EventKind::ShortPacket {
                    data_type: header.data_type,
                    virtual_channel: header.virtual_channel,
                    short_data: header.word_count,
                },
                ss,
                es,
            });
            debug!(
                "short packet {} vc{} data=0x{:04X}",
                header.data_type, header.virtual_channel, header.word_count
            );
            sink.packet(Packet::Short {
                data_type: header.data_type,
                virtual_channel: header.virtual_channel,
                short_data: header.word_count,
                ss,
                es,
            });
            PacketState::EotOrNextSot
        } else {
            sink.event(Csi2Event {
                kind: EventKind::LongPacketHeader {
                    data_type: header.data_type,
                    virtual_channel: header.virtual_channel,
                    word_count: header.word_count,
                },
                ss,
                es,
            });
            if header.word_count == 0 {
                PacketState::Footer {
                    header,
                    header_ss: ss,
                    payload: Vec::new(),
                    crc: checksum::INIT,
                    footer_ss: 0,
                    low: None,
                }
            } else {
                PacketState::Payload {
                    header,
                    header_ss: ss,
                    payload: Vec::with_capacity(header.word_count as usize),
                    payload_ss: 0,
                    crc: checksum::INIT,
                }
            }
        }
    }

    /// The burst ended (lane 0 back to LP-11, or end of capture). Anything
    /// mid-packet is reported truncated; `Idle` and the post-packet trail
    /// end cleanly.
    pub fn end_burst<S: EventSink>(&mut self, ts: u64, sink: &mut S) {
        let fault = match std::mem::replace(&mut self.state, PacketState::Idle) {
            PacketState::Idle | PacketState::EotOrNextSot => None,
            PacketState::Header { have, .. } => {
                if have == 0 && self.sot_pending {
                    // Burst died before a single byte merged; nothing was
                    // promised, nothing is missing.
                    None
                } else {
                    Some(ProtocolErrorKind::TruncatedHeader { got: have })
                }
            }
            PacketState::Payload {
                header, payload, ..
            } => Some(ProtocolErrorKind::TruncatedPayload {
                expected: header.word_count,
                got: payload.len(),
            }),
            PacketState::Footer { .. } => Some(ProtocolErrorKind::TruncatedFooter),
        };
        self.sot_pending = false;

        if let Some(kind) = fault {
            debug!("burst end at {ts}: {kind}");
            sink.event(Csi2Event {
                kind: EventKind::ProtocolError { kind },
                ss: ts,
                es: ts,
            });
        }
    }
}
