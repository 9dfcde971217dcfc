//! Checksum routines.
//!
//! | Routine | Used by |
//! |---------|---------|
//! | [`crc16`] | Märklin CAN config data streams |
//! | [`xor`] | DIY protocol frames |

/// CRC-16/CCITT polynomial.
pub const CRC16_POLY: u16 = 0x1021;
/// CRC-16/CCITT initial value.
pub const CRC16_INIT: u16 = 0xFFFF;
/// Streams are checksummed in groups of this many bytes.
pub const CRC16_BLOCK: usize = 8;

/// Feed one byte into a running CRC-16 (MSB first, no reflection).
#[inline]
pub fn crc16_update(mut crc: u16, byte: u8) -> u16 {
    crc ^= (byte as u16) << 8;
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ CRC16_POLY
        } else {
            crc << 1
        };
    }
    crc
}

/// CRC-16 over `data`, zero padded to a multiple of [`CRC16_BLOCK`].
///
/// The unused tail of the last 8-byte group counts as zero bytes, so a
/// payload and the same payload with explicit trailing zero padding yield
/// the same value.
///
/// ```rust
/// use rs_trackside::codec::crc16;
///
/// assert_eq!(crc16(&[0u8; 8]), 0x313E);
/// assert_eq!(crc16(&[1, 2, 3]), crc16(&[1, 2, 3, 0, 0, 0, 0, 0]));
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = data.iter().fold(CRC16_INIT, |crc, &b| crc16_update(crc, b));
    let rem = data.len() % CRC16_BLOCK;
    if rem != 0 {
        for _ in rem..CRC16_BLOCK {
            crc = crc16_update(crc, 0);
        }
    }
    crc
}

/// XOR of every byte in `data`.
#[inline]
pub fn xor(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_zero_block() {
        assert_eq!(crc16(&[0u8; 8]), 0x313E);
    }

    #[test]
    fn crc16_empty_is_init() {
        assert_eq!(crc16(&[]), CRC16_INIT);
    }

    #[test]
    fn crc16_pads_partial_group() {
        assert_eq!(crc16(&[1, 2, 3]), 0xD8EE);
        assert_eq!(crc16(&[1, 2, 3]), crc16(&[1, 2, 3, 0, 0, 0, 0, 0]));
    }

    #[test]
    fn crc16_full_group_unpadded() {
        let data = *b"12345678";
        let mut crc = CRC16_INIT;
        for b in data {
            crc = crc16_update(crc, b);
        }
        assert_eq!(crc16(&data), crc);
    }

    #[test]
    fn xor_checksum() {
        assert_eq!(xor(&[]), 0);
        assert_eq!(xor(&[0x12, 0x00, 0x05]), 0x17);
        assert_eq!(xor(&[0xFF, 0xFF]), 0);
    }
}
