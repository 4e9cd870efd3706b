//! Long-packet payload checksum
//!
//! CRC-16 over the payload bytes: polynomial x^16 + x^12 + x^5 + 1
//! processed LSB-first (reflected 0x1021 = 0x8408), initial value 0xFFFF,
//! no final xor. The footer carries the result low byte first.

/// Initial CRC accumulator value.
pub const INIT: u16 = 0xFFFF;

const POLY: u16 = 0x8408;

/// Fold one payload byte into the running checksum.
pub fn update(mut crc: u16, byte: u8) -> u16 {
    crc ^= byte as u16;
    for _ in 0..8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ POLY;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// Checksum of a complete payload.
pub fn checksum(data: &[u8]) -> u16 {
    data.iter().fold(INIT, |crc, &b| update(crc, b))
}
