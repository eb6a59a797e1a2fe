//! 7-bit/8-bit conversion for the Firmata sysex link.
//!
//! Sysex data bytes must keep their top bit clear, so every 8-bit byte travels
//! as a pair: the low seven bits first, then the remaining top bit.

/// Expand every byte into a `(b & 0x7F, b >> 7)` pair
pub fn encode_8_to_7(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(b & 0x7F);
        out.push(b >> 7);
    }
    out
}

/// Fold `(lo, hi)` pairs back into bytes. A trailing odd byte is dropped.
pub fn decode_7_to_8(bytes: &[u8]) -> Vec<u8> {
    bytes
        .chunks_exact(2)
        .map(|pair| pair[0].wrapping_add(pair[1].wrapping_mul(128)))
        .collect()
}

/// Reinterpret a status byte sent by the firmware as signed
pub fn to_signed(value: u8) -> i8 {
    value as i8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_high_byte() {
        assert_eq!(encode_8_to_7(&[0xFF]), [0x7F, 0x01]);
        assert_eq!(encode_8_to_7(&[0x80, 0x7F, 0x00]), [0x00, 0x01, 0x7F, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_decode_high_byte() {
        assert_eq!(decode_7_to_8(&[0x7F, 0x01]), [0xFF]);
        assert_eq!(decode_7_to_8(&[0x08, 0x00, 0x2A, 0x01]), [0x08, 0xAA]);
    }

    #[test]
    fn test_decode_drops_trailing_odd_byte() {
        assert_eq!(decode_7_to_8(&[0x01, 0x00, 0x05]), [0x01]);
        assert!(decode_7_to_8(&[]).is_empty());
    }

    #[test]
    fn test_every_byte_survives_encoding() {
        let all: Vec<u8> = (0..=255).collect();
        let encoded = encode_8_to_7(&all);
        assert!(encoded.iter().all(|b| b & 0x80 == 0));
        assert_eq!(decode_7_to_8(&encoded), all);
    }

    #[test]
    fn test_even_seven_bit_input_survives_decoding() {
        let pairs: Vec<u8> = (0..128u8).flat_map(|lo| [lo, lo & 1]).collect();
        assert_eq!(encode_8_to_7(&decode_7_to_8(&pairs)), pairs);
    }

    #[test]
    fn test_to_signed() {
        assert_eq!(to_signed(0), 0);
        assert_eq!(to_signed(3), 3);
        assert_eq!(to_signed(0xFF), -1);
        assert_eq!(to_signed(0xFE), -2);
        assert_eq!(to_signed(0xFD), -3);
        assert_eq!(to_signed(0x80), -128);
    }
}
