//! EBML variable-length integer codec.
//!
//! The number of leading zero bits before the first set bit of the first byte
//! determines the total encoded length (1-8 bytes). Element ids keep the
//! marker bit as part of the value; element sizes strip it.

/// Decode a variable-length integer starting at `data[0]`.
/// Returns the value and the number of bytes consumed, or `None` when the
/// first byte is zero (length > 8) or the buffer is truncated.
pub fn read_vint(data: &[u8], keep_marker: bool) -> Option<(u64, usize)> {
    let first = *data.first()?;
    if first == 0 {
        return None;
    }

    let length = (first.leading_zeros() + 1) as usize;
    if length > data.len() {
        return None;
    }

    let mut value = if keep_marker {
        first as u64
    } else {
        // Mask away the marker bit. The mask is computed in u64 so the
        // 8-byte case (shift by 8) stays in range.
        first as u64 & (0xFF >> length)
    };
    for &b in &data[1..length] {
        value = (value << 8) | b as u64;
    }

    Some((value, length))
}

/// Shortest length in bytes needed to encode `value` with its marker bit.
/// Values wider than 56 bits are clamped to 8 bytes (the marker leaves no
/// room for a 57th significant bit; encoding truncates).
pub fn vint_length(value: u64) -> usize {
    for length in 1..=8usize {
        // Each byte holds 7 value bits once the marker is accounted for.
        if value < (1u64 << (7 * length)) {
            return length;
        }
    }
    8
}

/// Encode `value` in its shortest form, marker bit included.
pub fn write_vint(value: u64) -> Vec<u8> {
    write_vint_width(value, vint_length(value)).unwrap_or_else(|| vec![0xFF])
}

/// Encode `value` padded to exactly `width` bytes (1-8). Used when rewriting a
/// header in place: the byte length must stay fixed even though the value
/// changed. Returns `None` when the value no longer fits, in which case the
/// caller must fall back to a full re-insertion.
pub fn write_vint_width(value: u64, width: usize) -> Option<Vec<u8>> {
    if width == 0 || width > 8 {
        return None;
    }
    if width < 8 && value >= (1u64 << (7 * width)) {
        return None;
    }

    // An 8-byte field holds 56 value bits; wider values truncate.
    let value = if width == 8 {
        value & ((1u64 << 56) - 1)
    } else {
        value
    };

    let mut out = vec![0u8; width];
    let mut v = value;
    for i in (0..width).rev() {
        out[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    // Marker bit: the most-significant bit position encodes the length.
    out[0] |= 0x80 >> (width - 1);
    Some(out)
}

/// Encode an element id. Ids carry their marker bit as part of the stored
/// value, so they are emitted verbatim in big-endian order.
pub fn write_id(id: u64) -> Vec<u8> {
    let mut length = 1usize;
    while length < 8 && id >= (1u64 << (8 * length)) {
        length += 1;
    }
    let mut out = vec![0u8; length];
    let mut v = id;
    for i in (0..length).rev() {
        out[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    out
}

/// Byte length of an encoded element id.
pub fn id_length(id: u64) -> usize {
    let mut length = 1usize;
    while length < 8 && id >= (1u64 << (8 * length)) {
        length += 1;
    }
    length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_size() {
        // 0x81 = marker + value 1
        assert_eq!(read_vint(&[0x81], false), Some((1, 1)));
        assert_eq!(read_vint(&[0xFF], false), Some((0x7F, 1)));
    }

    #[test]
    fn two_byte_size() {
        // 0x4000 pattern: marker 01, value in remaining 14 bits
        assert_eq!(read_vint(&[0x40, 0x7F], false), Some((0x7F, 2)));
        assert_eq!(read_vint(&[0x5B, 0xCD], false), Some((0x1BCD, 2)));
    }

    #[test]
    fn id_keeps_marker() {
        // Matroska Segment id
        assert_eq!(
            read_vint(&[0x18, 0x53, 0x80, 0x67], true),
            Some((0x1853_8067, 4))
        );
        // Void id
        assert_eq!(read_vint(&[0xEC], true), Some((0xEC, 1)));
    }

    #[test]
    fn malformed_first_byte() {
        assert_eq!(read_vint(&[0x00, 0x01], false), None);
        assert_eq!(read_vint(&[], false), None);
    }

    #[test]
    fn truncated_buffer() {
        assert_eq!(read_vint(&[0x40], false), None);
        assert_eq!(read_vint(&[0x10, 0x00, 0x00], false), None);
    }

    #[test]
    fn round_trip_shortest() {
        for &v in &[
            0u64,
            1,
            0x7E,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            0x1F_FFFF,
            0xFFFF_FFFF,
            (1u64 << 56) - 1,
        ] {
            let enc = write_vint(v);
            assert_eq!(enc.len(), vint_length(v), "length for {v:#x}");
            let (decoded, consumed) = read_vint(&enc, false).unwrap();
            assert_eq!(decoded, v, "round trip for {v:#x}");
            assert_eq!(consumed, enc.len());
        }
    }

    #[test]
    fn minimal_encoding_boundaries() {
        assert_eq!(vint_length(0x7F), 1);
        assert_eq!(vint_length(0x80), 2);
        assert_eq!(vint_length(0x3FFF), 2);
        assert_eq!(vint_length(0x4000), 3);
    }

    #[test]
    fn padded_width_round_trip() {
        let enc = write_vint_width(5, 4).unwrap();
        assert_eq!(enc.len(), 4);
        assert_eq!(read_vint(&enc, false), Some((5, 4)));
    }

    #[test]
    fn padded_width_rejects_overflow() {
        assert_eq!(write_vint_width(0x80, 1), None);
        assert!(write_vint_width(0x7F, 1).is_some());
    }

    #[test]
    fn id_round_trip() {
        for &id in &[0xECu64, 0x7373, 0x63C0, 0x1853_8067, 0x1254_C367] {
            let enc = write_id(id);
            assert_eq!(enc.len(), id_length(id));
            assert_eq!(read_vint(&enc, true), Some((id, enc.len())));
        }
    }
}
