use byteorder::{ByteOrder, LittleEndian};

/// Item type encoded in bits 1-2 of the item flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApeItemType {
    Text = 0,
    Binary = 1,
    Locator = 2,
    Reserved = 3,
}

impl ApeItemType {
    pub fn from_flags(flags: u32) -> Self {
        match (flags >> 1) & 3 {
            0 => ApeItemType::Text,
            1 => ApeItemType::Binary,
            2 => ApeItemType::Locator,
            _ => ApeItemType::Reserved,
        }
    }
}

/// A text (or locator) APE item: an uppercase key mapped to one or more
/// UTF-8 values. Binary and reserved records never become items; their raw
/// bytes are preserved verbatim by the tag instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApeItem {
    pub key: String,
    pub values: Vec<String>,
    pub read_only: bool,
    pub item_type: ApeItemType,
}

impl ApeItem {
    pub fn text(key: &str, value: &str) -> Self {
        ApeItem {
            key: key.to_ascii_uppercase(),
            values: vec![value.to_string()],
            read_only: false,
            item_type: ApeItemType::Text,
        }
    }

    /// Render the on-disk record: LE value length, LE flags, NUL-terminated
    /// key, NUL-joined values.
    pub fn render(&self) -> Vec<u8> {
        let value = self.values.join("\0");
        let value_bytes = value.as_bytes();

        let mut flags = (self.item_type as u32) << 1;
        if self.read_only {
            flags |= 1;
        }

        let mut out = Vec::with_capacity(8 + self.key.len() + 1 + value_bytes.len());
        let mut len_buf = [0u8; 4];
        LittleEndian::write_u32(&mut len_buf, value_bytes.len() as u32);
        out.extend_from_slice(&len_buf);
        LittleEndian::write_u32(&mut len_buf, flags);
        out.extend_from_slice(&len_buf);
        out.extend_from_slice(self.key.as_bytes());
        out.push(0);
        out.extend_from_slice(value_bytes);
        out
    }
}

/// One record decoded from the item list.
#[derive(Debug)]
pub enum ParsedItem {
    Item(ApeItem),
    /// Binary/reserved record kept byte-for-byte: (uppercased key, full
    /// record including length, flags, key and value).
    Raw(String, Vec<u8>),
}

/// Decode the record starting at `data[pos]`. Returns the record and the
/// position just past it, or `None` when the record would overrun the buffer
/// (the corruption guard: parsing stops, what was collected stands).
pub fn parse_item(data: &[u8], pos: usize) -> Option<(ParsedItem, usize)> {
    if pos + 8 > data.len() {
        return None;
    }
    let value_len = LittleEndian::read_u32(&data[pos..pos + 4]) as usize;
    let flags = LittleEndian::read_u32(&data[pos + 4..pos + 8]);

    let key_start = pos + 8;
    let key_end = data[key_start..].iter().position(|&b| b == 0)? + key_start;
    let next = key_end + 1 + value_len;
    if next > data.len() {
        return None;
    }

    let key = String::from_utf8_lossy(&data[key_start..key_end]).to_ascii_uppercase();
    let item_type = ApeItemType::from_flags(flags);

    match item_type {
        ApeItemType::Text | ApeItemType::Locator => {
            let value = &data[key_end + 1..next];
            let values: Vec<String> = value
                .split(|&b| b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect();
            if values.is_empty() {
                // A stray NUL or zero-length value: the item is dropped
                // rather than rendered as an empty record.
                return Some((ParsedItem::Raw(key, Vec::new()), next));
            }
            Some((
                ParsedItem::Item(ApeItem {
                    key,
                    values,
                    read_only: flags & 1 != 0,
                    item_type,
                }),
                next,
            ))
        }
        ApeItemType::Binary | ApeItemType::Reserved => {
            Some((ParsedItem::Raw(key, data[pos..next].to_vec()), next))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_parse_round_trip() {
        let item = ApeItem {
            key: "ARTIST".into(),
            values: vec!["One".into(), "Two".into()],
            read_only: false,
            item_type: ApeItemType::Text,
        };
        let bytes = item.render();
        let (parsed, next) = parse_item(&bytes, 0).unwrap();
        assert_eq!(next, bytes.len());
        match parsed {
            ParsedItem::Item(p) => assert_eq!(p, item),
            ParsedItem::Raw(..) => panic!("expected a text item"),
        }
    }

    #[test]
    fn key_is_uppercased() {
        let bytes = ApeItem::text("artist", "x").render();
        let (parsed, _) = parse_item(&bytes, 0).unwrap();
        match parsed {
            ParsedItem::Item(p) => assert_eq!(p.key, "ARTIST"),
            ParsedItem::Raw(..) => panic!("expected a text item"),
        }
    }

    #[test]
    fn binary_record_is_kept_verbatim() {
        let mut record = Vec::new();
        record.extend_from_slice(&4u32.to_le_bytes());
        record.extend_from_slice(&(1u32 << 1).to_le_bytes()); // binary type
        record.extend_from_slice(b"COVER ART\0");
        record.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let (parsed, next) = parse_item(&record, 0).unwrap();
        assert_eq!(next, record.len());
        match parsed {
            ParsedItem::Raw(key, raw) => {
                assert_eq!(key, "COVER ART");
                assert_eq!(raw, record);
            }
            ParsedItem::Item(_) => panic!("expected a raw record"),
        }
    }

    #[test]
    fn overrunning_record_stops_parsing() {
        let mut record = Vec::new();
        record.extend_from_slice(&100u32.to_le_bytes()); // claims 100 bytes
        record.extend_from_slice(&0u32.to_le_bytes());
        record.extend_from_slice(b"KEY\0ab");
        assert!(parse_item(&record, 0).is_none());
    }

    #[test]
    fn empty_value_drops_item() {
        let bytes = ApeItem {
            key: "TITLE".into(),
            values: vec![],
            read_only: false,
            item_type: ApeItemType::Text,
        }
        .render();
        let (parsed, _) = parse_item(&bytes, 0).unwrap();
        assert!(matches!(parsed, ParsedItem::Raw(_, raw) if raw.is_empty()));
    }

    #[test]
    fn locator_reads_as_text() {
        let item = ApeItem {
            key: "BUY URL".into(),
            values: vec!["http://example.com".into()],
            read_only: false,
            item_type: ApeItemType::Locator,
        };
        let (parsed, _) = parse_item(&item.render(), 0).unwrap();
        match parsed {
            ParsedItem::Item(p) => {
                assert_eq!(p.item_type, ApeItemType::Locator);
                assert_eq!(p.values, vec!["http://example.com"]);
            }
            ParsedItem::Raw(..) => panic!("expected a locator item"),
        }
    }
}
