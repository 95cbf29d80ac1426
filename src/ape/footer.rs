use byteorder::{ByteOrder, LittleEndian};

pub const MAGIC: &[u8; 8] = b"APETAGEX";
pub const FOOTER_SIZE: u64 = 32;

/// Flag bits of the footer's flag field.
pub const FLAG_HAS_HEADER: u32 = 1 << 31;
pub const FLAG_IS_HEADER: u32 = 1 << 29;

/// The 32-byte trailer of an APE tag region. An optional mirrored header
/// copy carries the same fields with the header flag bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApeFooter {
    pub version: u32,
    /// Tag size in bytes: items plus this footer, excluding a header copy.
    pub tag_size: u32,
    pub item_count: u32,
    pub flags: u32,
}

impl ApeFooter {
    /// Parse a footer (or header copy) from exactly 32 bytes. Returns `None`
    /// when the magic is absent.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FOOTER_SIZE as usize || &data[0..8] != MAGIC {
            return None;
        }
        Some(ApeFooter {
            version: LittleEndian::read_u32(&data[8..12]),
            tag_size: LittleEndian::read_u32(&data[12..16]),
            item_count: LittleEndian::read_u32(&data[16..20]),
            flags: LittleEndian::read_u32(&data[20..24]),
        })
    }

    pub fn has_header(&self) -> bool {
        self.flags & FLAG_HAS_HEADER != 0
    }

    pub fn is_header(&self) -> bool {
        self.flags & FLAG_IS_HEADER != 0
    }

    /// Size of the whole tag region: header copy (when present) plus
    /// items plus footer.
    pub fn complete_tag_size(&self) -> u64 {
        self.tag_size as u64 + if self.has_header() { FOOTER_SIZE } else { 0 }
    }

    /// Render the 32 bytes. `as_header` emits the mirrored header copy.
    pub fn render(&self, as_header: bool) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..8].copy_from_slice(MAGIC);
        LittleEndian::write_u32(&mut out[8..12], self.version);
        LittleEndian::write_u32(&mut out[12..16], self.tag_size);
        LittleEndian::write_u32(&mut out[16..20], self.item_count);
        let flags = if as_header {
            self.flags | FLAG_IS_HEADER
        } else {
            self.flags & !FLAG_IS_HEADER
        };
        LittleEndian::write_u32(&mut out[20..24], flags);
        // Bytes 24..32 stay reserved zeros.
        out
    }
}
