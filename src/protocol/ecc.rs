//! Packet header ECC
//!
//! The 4th header byte carries a 6-bit Hamming-style code over the 24
//! preceding header bits (data ID + word count). Every data-bit column of
//! the generator has odd weight, so any single-bit fault (in the data or
//! in the code itself) produces a unique syndrome and is corrected, while
//! any double-bit fault produces an even-weight syndrome and is detected
//! as uncorrectable.

/// Parity coverage masks over header data bits d0..d23, one per ECC bit.
const PARITY_MASKS: [u32; 6] = [
    0xF1_2CB7, // P0
    0xF2_555B, // P1
    0x74_9A6D, // P2
    0xB8_E38E, // P3
    0xDF_03F0, // P4
    0xEF_FC00, // P5
];

/// Outcome of checking a received header against its ECC byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccCheck {
    /// Header is intact.
    Valid,
    /// A single-bit fault was corrected. `data` is the repaired header;
    /// `bit` 0..=23 indexes the data bits, 24..=29 the ECC bits.
    Corrected { data: [u8; 3], bit: u8 },
    /// Two or more bits are faulty; the header cannot be recovered.
    Uncorrectable,
}

fn parity(word: u32) -> u8 {
    (word.count_ones() & 1) as u8
}

/// Syndrome column for data bit `d`: the set of parity bits covering it.
fn column(d: u8) -> u8 {
    let mut col = 0u8;
    for (i, mask) in PARITY_MASKS.iter().enumerate() {
        if mask >> d & 1 != 0 {
            col |= 1 << i;
        }
    }
    col
}

/// Compute the ECC byte for the first three header bytes.
pub fn compute(data: [u8; 3]) -> u8 {
    let bits = u32::from_le_bytes([data[0], data[1], data[2], 0]);
    let mut ecc = 0u8;
    for (i, mask) in PARITY_MASKS.iter().enumerate() {
        ecc |= parity(bits & mask) << i;
    }
    ecc
}

/// Check a received header against its ECC byte, correcting a single-bit
/// fault if possible.
pub fn verify(data: [u8; 3], ecc: u8) -> EccCheck {
    let syndrome = (compute(data) ^ ecc) & 0x3F;
    if syndrome == 0 {
        return EccCheck::Valid;
    }

    // A one-bit syndrome means the fault is in the ECC byte itself; the
    // header data is fine.
    if syndrome.count_ones() == 1 {
        let bit = 24 + syndrome.trailing_zeros() as u8;
        return EccCheck::Corrected { data, bit };
    }

    for d in 0..24u8 {
        if column(d) == syndrome {
            let bits = u32::from_le_bytes([data[0], data[1], data[2], 0]) ^ (1 << d);
            let fixed = bits.to_le_bytes();
            return EccCheck::Corrected {
                data: [fixed[0], fixed[1], fixed[2]],
                bit: d,
            };
        }
    }

    EccCheck::Uncorrectable
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [u8; 3] = [0x2A, 0x20, 0x00]; // RAW8, VC0, WC=0x20

    #[test]
    fn test_intact_header() {
        let ecc = compute(HEADER);
        assert_eq!(verify(HEADER, ecc), EccCheck::Valid);
    }

    #[test]
    fn test_every_single_data_bit_corrected() {
        let ecc = compute(HEADER);
        for d in 0..24u8 {
            let mut corrupt = HEADER;
            corrupt[(d / 8) as usize] ^= 1 << (d % 8);
            match verify(corrupt, ecc) {
                EccCheck::Corrected { data, bit } => {
                    assert_eq!(data, HEADER, "bit {}", d);
                    assert_eq!(bit, d);
                }
                other => panic!("bit {}: expected correction, got {:?}", d, other),
            }
        }
    }

    #[test]
    fn test_every_single_ecc_bit_corrected() {
        let ecc = compute(HEADER);
        for b in 0..6u8 {
            match verify(HEADER, ecc ^ (1 << b)) {
                EccCheck::Corrected { data, bit } => {
                    assert_eq!(data, HEADER);
                    assert_eq!(bit, 24 + b);
                }
                other => panic!("ecc bit {}: expected correction, got {:?}", b, other),
            }
        }
    }

    #[test]
    fn test_double_bit_detected() {
        let ecc = compute(HEADER);
        let mut corrupt = HEADER;
        corrupt[0] ^= 0x01;
        corrupt[2] ^= 0x80;
        assert_eq!(verify(corrupt, ecc), EccCheck::Uncorrectable);
    }

    #[test]
    fn test_columns_are_distinct() {
        // Correction relies on every data-bit syndrome being unique and
        // distinct from the single-parity syndromes.
        let mut seen = std::collections::HashSet::new();
        for d in 0..24u8 {
            let col = column(d);
            assert!(col.count_ones() >= 2);
            assert!(seen.insert(col), "duplicate column for bit {}", d);
        }
    }
}
