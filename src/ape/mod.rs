pub mod footer;
pub mod item;

use memchr::memmem;

use crate::common::error::Result;
use crate::common::io::TagFile;
use crate::tag::Tag;

pub use footer::{ApeFooter, FLAG_HAS_HEADER, FOOTER_SIZE, MAGIC};
pub use item::{ApeItem, ApeItemType, ParsedItem};

const APE_VERSION: u32 = 2000;

/// How far back from end-of-file the fallback footer scan looks. Covers tags
/// followed by trailing junk a strict fixed-offset check would miss.
const SCAN_WINDOW: u64 = 8192;

/// An APEv2 tag: insertion-ordered text items plus verbatim binary records.
///
/// Iteration order is stable, so rendering the same tag twice produces
/// byte-identical output.
#[derive(Debug, Clone, Default)]
pub struct ApeTag {
    items: Vec<ApeItem>,
    /// Binary/reserved records, re-emitted unchanged on save: (key, full
    /// on-disk record).
    unknown: Vec<(String, Vec<u8>)>,
}

impl ApeTag {
    pub fn new() -> Self {
        ApeTag::default()
    }

    /// Parse `item_count` records from the item region. Corrupt trailing
    /// records stop the walk; whatever parsed before them is kept.
    pub fn parse(data: &[u8], item_count: u32) -> Self {
        let mut tag = ApeTag::new();
        let mut pos = 0usize;

        for _ in 0..item_count {
            let Some((parsed, next)) = item::parse_item(data, pos) else {
                log::debug!("APE item list truncated at offset {pos}, keeping partial tag");
                break;
            };
            match parsed {
                ParsedItem::Item(it) => tag.items.push(it),
                ParsedItem::Raw(_, raw) if raw.is_empty() => {} // dropped empty item
                ParsedItem::Raw(key, raw) => tag.unknown.push((key, raw)),
            }
            pos = next;
        }

        tag
    }

    /// Render the complete tag region: optional mirrored header, text items,
    /// verbatim records, footer.
    pub fn render(&self, write_header: bool) -> Vec<u8> {
        let mut body = Vec::new();
        let mut count = 0u32;

        for it in &self.items {
            if it.values.is_empty() {
                continue;
            }
            body.extend_from_slice(&it.render());
            count += 1;
        }
        for (_, raw) in &self.unknown {
            body.extend_from_slice(raw);
            count += 1;
        }

        let footer = ApeFooter {
            version: APE_VERSION,
            tag_size: (body.len() as u64 + FOOTER_SIZE) as u32,
            item_count: count,
            flags: if write_header { FLAG_HAS_HEADER } else { 0 },
        };

        let mut out = Vec::with_capacity(body.len() + 64);
        if write_header {
            out.extend_from_slice(&footer.render(true));
        }
        out.extend_from_slice(&body);
        out.extend_from_slice(&footer.render(false));
        out
    }

    pub fn get(&self, key: &str) -> Option<&ApeItem> {
        let key = key.to_ascii_uppercase();
        self.items.iter().find(|it| it.key == key)
    }

    /// Set a value under `key`. With `replace` any existing item is removed
    /// first; without it the value is appended to the existing item's list.
    /// A binary record under the same key is displaced either way, keeping
    /// keys unique across the whole tag.
    pub fn set(&mut self, key: &str, value: &str, replace: bool) {
        let key = key.to_ascii_uppercase();
        if replace {
            self.remove(&key);
        } else {
            self.unknown.retain(|(k, _)| k != &key);
        }
        if let Some(it) = self.items.iter_mut().find(|it| it.key == key) {
            it.values.push(value.to_string());
        } else {
            self.items.push(ApeItem::text(&key, value));
        }
    }

    pub fn remove(&mut self, key: &str) {
        let key = key.to_ascii_uppercase();
        self.items.retain(|it| it.key != key);
        self.unknown.retain(|(k, _)| k != &key);
    }

    pub fn item_count(&self) -> usize {
        self.items.iter().filter(|it| !it.values.is_empty()).count() + self.unknown.len()
    }

    fn first_value(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|it| it.values.first().cloned())
    }

    fn numeric(&self, key: &str) -> u32 {
        self.first_value(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Store `value` as its decimal string, removing the field for zero.
    fn set_numeric(&mut self, key: &str, value: u32) {
        if value == 0 {
            self.remove(key);
        } else {
            self.set(key, itoa::Buffer::new().format(value), true);
        }
    }
}

impl Tag for ApeTag {
    fn title(&self) -> Option<String> {
        self.first_value("TITLE")
    }
    fn artist(&self) -> Option<String> {
        self.first_value("ARTIST")
    }
    fn album(&self) -> Option<String> {
        self.first_value("ALBUM")
    }
    fn comment(&self) -> Option<String> {
        self.first_value("COMMENT")
    }
    fn genre(&self) -> Option<String> {
        self.first_value("GENRE")
    }
    fn year(&self) -> u32 {
        self.numeric("YEAR")
    }
    fn track(&self) -> u32 {
        self.numeric("TRACK")
    }

    fn set_title(&mut self, v: &str) {
        self.set("TITLE", v, true);
    }
    fn set_artist(&mut self, v: &str) {
        self.set("ARTIST", v, true);
    }
    fn set_album(&mut self, v: &str) {
        self.set("ALBUM", v, true);
    }
    fn set_comment(&mut self, v: &str) {
        self.set("COMMENT", v, true);
    }
    fn set_genre(&mut self, v: &str) {
        self.set("GENRE", v, true);
    }
    fn set_year(&mut self, v: u32) {
        self.set_numeric("YEAR", v);
    }
    fn set_track(&mut self, v: u32) {
        self.set_numeric("TRACK", v);
    }

    fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    fn properties(&self) -> Vec<(String, Vec<String>)> {
        self.items
            .iter()
            .filter(|it| !it.values.is_empty())
            .map(|it| (it.key.clone(), it.values.clone()))
            .collect()
    }

    fn set_property(&mut self, key: &str, values: &[String]) {
        self.remove(key);
        for v in values {
            self.set(key, v, false);
        }
    }

    fn remove_property(&mut self, key: &str) {
        self.remove(key);
    }
}

/// Where an APE tag region sits in a file.
#[derive(Debug, Clone, Copy)]
pub struct ApeLocation {
    /// Offset of the region start (header copy when present).
    pub offset: u64,
    /// Total region length: header copy + items + footer.
    pub size: u64,
    pub footer: ApeFooter,
}

fn footer_at(file: &mut TagFile, pos: u64) -> Result<Option<ApeLocation>> {
    let data = file.read_block_at(pos, FOOTER_SIZE as usize)?;
    let Some(footer) = ApeFooter::parse(&data) else {
        return Ok(None);
    };
    if footer.is_header() {
        return Ok(None);
    }
    let size = footer.complete_tag_size();
    let end = pos + FOOTER_SIZE;
    if size < FOOTER_SIZE || size > end {
        log::debug!("APE footer at {pos} declares a size larger than the file prefix");
        return Ok(None);
    }
    Ok(Some(ApeLocation {
        offset: end - size,
        size,
        footer,
    }))
}

/// Locate an APE tag: at end-of-file, immediately before an ID3v1 trailer,
/// or (fallback) anywhere in the trailing scan window.
pub fn find(file: &mut TagFile) -> Result<Option<ApeLocation>> {
    let len = file.length()?;

    if len >= FOOTER_SIZE {
        if let Some(loc) = footer_at(file, len - FOOTER_SIZE)? {
            return Ok(Some(loc));
        }
    }

    // An ID3v1 trailer may sit after the APE tag.
    if len >= 128 + FOOTER_SIZE {
        let trailer = file.read_block_at(len - 128, 3)?;
        if trailer == *b"TAG" {
            if let Some(loc) = footer_at(file, len - 128 - FOOTER_SIZE)? {
                return Ok(Some(loc));
            }
        }
    }

    // Trailing-junk fallback: scan the tail window for the footer magic.
    let window_start = len.saturating_sub(SCAN_WINDOW);
    let window = file.read_block_at(window_start, (len - window_start) as usize)?;
    let mut pos = window.len();
    while let Some(hit) = memmem::rfind(&window[..pos], MAGIC) {
        if let Some(loc) = footer_at(file, window_start + hit as u64)? {
            return Ok(Some(loc));
        }
        pos = hit;
    }

    Ok(None)
}

/// Read the APE tag, if any. Structural corruption yields a partial or empty
/// tag, never an error.
pub fn read(file: &mut TagFile) -> Result<Option<ApeTag>> {
    let Some(loc) = find(file)? else {
        return Ok(None);
    };
    let items_start = loc.offset
        + if loc.footer.has_header() {
            FOOTER_SIZE
        } else {
            0
        };
    let items_len = (loc.size - FOOTER_SIZE).saturating_sub(items_start - loc.offset);
    let data = file.read_block_at(items_start, items_len as usize)?;
    Ok(Some(ApeTag::parse(&data, loc.footer.item_count)))
}

/// Render and splice the tag over its old region. A freshly created tag goes
/// immediately before an existing ID3v1 trailer, otherwise at end-of-file.
pub fn save(file: &mut TagFile, tag: &ApeTag, write_header: bool) -> Result<()> {
    let rendered = tag.render(write_header);

    if let Some(loc) = find(file)? {
        return file.insert(&rendered, loc.offset, loc.size);
    }

    let len = file.length()?;
    if len >= 128 {
        let trailer = file.read_block_at(len - 128, 3)?;
        if trailer == *b"TAG" {
            return file.insert(&rendered, len - 128, 0);
        }
    }
    file.insert(&rendered, len, 0)
}

/// Remove the tag region entirely. A file without one is left unchanged.
pub fn strip(file: &mut TagFile) -> Result<()> {
    if let Some(loc) = find(file)? {
        file.remove_block(loc.offset, loc.size)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn temp_file_with(content: &[u8]) -> (tempfile::TempPath, TagFile) {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content).unwrap();
        f.flush().unwrap();
        let path = f.into_temp_path();
        let tf = TagFile::open(&path).unwrap();
        (path, tf)
    }

    #[test]
    fn render_parse_round_trip_two_items() {
        let mut tag = ApeTag::new();
        tag.set("TITLE", "Song A", true);
        tag.set("ARTIST", "Artist B", true);

        let region = tag.render(true);
        let footer = ApeFooter::parse(&region[region.len() - 32..]).unwrap();
        assert_eq!(footer.item_count, 2);
        assert_eq!(footer.complete_tag_size() as usize, region.len());

        let items = &region[32..region.len() - 32];
        let parsed = ApeTag::parse(items, footer.item_count);
        assert_eq!(parsed.title().as_deref(), Some("Song A"));
        assert_eq!(parsed.artist().as_deref(), Some("Artist B"));
        assert_eq!(parsed.item_count(), 2);
    }

    #[test]
    fn rendered_size_matches_declared_size() {
        let mut tag = ApeTag::new();
        tag.set("TITLE", "x", true);
        for write_header in [false, true] {
            let region = tag.render(write_header);
            let footer = ApeFooter::parse(&region[region.len() - 32..]).unwrap();
            assert_eq!(footer.complete_tag_size() as usize, region.len());
        }
    }

    #[test]
    fn set_without_replace_appends_value() {
        let mut tag = ApeTag::new();
        tag.set("ARTIST", "One", true);
        tag.set("ARTIST", "Two", false);
        assert_eq!(tag.get("ARTIST").unwrap().values, vec!["One", "Two"]);

        tag.set("ARTIST", "Solo", true);
        assert_eq!(tag.get("ARTIST").unwrap().values, vec!["Solo"]);
    }

    #[test]
    fn zero_year_removes_field() {
        let mut tag = ApeTag::new();
        tag.set_year(1999);
        assert_eq!(tag.year(), 1999);
        assert_eq!(tag.first_value("YEAR").as_deref(), Some("1999"));
        tag.set_year(0);
        assert!(tag.get("YEAR").is_none());
    }

    #[test]
    fn save_appends_to_untagged_file() {
        let (path, mut tf) = temp_file_with(b"AUDIO-DATA");
        let mut tag = ApeTag::new();
        tag.set_title("Hello");
        save(&mut tf, &tag, true).unwrap();

        let now = std::fs::read(&path).unwrap();
        assert!(now.starts_with(b"AUDIO-DATA"));

        let read_back = read(&mut tf).unwrap().unwrap();
        assert_eq!(read_back.title().as_deref(), Some("Hello"));
    }

    #[test]
    fn save_goes_before_id3v1_trailer() {
        let mut content = b"AUDIO".to_vec();
        let mut v1 = vec![0u8; 128];
        v1[0..3].copy_from_slice(b"TAG");
        content.extend_from_slice(&v1);
        let (path, mut tf) = temp_file_with(&content);

        let mut tag = ApeTag::new();
        tag.set_title("Hello");
        save(&mut tf, &tag, false).unwrap();

        let now = std::fs::read(&path).unwrap();
        assert_eq!(&now[now.len() - 128..now.len() - 125], b"TAG");
        assert!(find(&mut tf).unwrap().is_some());
    }

    #[test]
    fn double_save_is_idempotent() {
        let (path, mut tf) = temp_file_with(b"AUDIO");
        let mut tag = ApeTag::new();
        tag.set_title("Same");
        tag.set_artist("Artist");

        save(&mut tf, &tag, true).unwrap();
        let first = std::fs::read(&path).unwrap();
        save(&mut tf, &tag, true).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn strip_restores_original_bytes() {
        let (path, mut tf) = temp_file_with(b"AUDIO");
        let mut tag = ApeTag::new();
        tag.set_title("Gone");
        save(&mut tf, &tag, true).unwrap();
        strip(&mut tf).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"AUDIO");
    }

    #[test]
    fn binary_records_survive_round_trip() {
        let mut record = Vec::new();
        record.extend_from_slice(&3u32.to_le_bytes());
        record.extend_from_slice(&(1u32 << 1).to_le_bytes());
        record.extend_from_slice(b"COVER ART\0abc");

        let mut tag = ApeTag::new();
        tag.set_title("T");
        tag.unknown.push(("COVER ART".into(), record.clone()));

        let region = tag.render(false);
        let footer = ApeFooter::parse(&region[region.len() - 32..]).unwrap();
        let parsed = ApeTag::parse(&region[..region.len() - 32], footer.item_count);
        assert_eq!(parsed.unknown.len(), 1);
        assert_eq!(parsed.unknown[0].1, record);
    }

    #[test]
    fn text_set_displaces_binary_record_with_same_key() {
        let mut record = Vec::new();
        record.extend_from_slice(&3u32.to_le_bytes());
        record.extend_from_slice(&(1u32 << 1).to_le_bytes());
        record.extend_from_slice(b"COVER ART\0abc");

        let mut tag = ApeTag::new();
        tag.unknown.push(("COVER ART".into(), record));

        // Keys stay unique whether or not the set replaces.
        for replace in [false, true] {
            let mut tag = tag.clone();
            tag.set("Cover Art", "front.jpg", replace);
            assert_eq!(tag.item_count(), 1);
            assert!(tag.unknown.is_empty());
            assert_eq!(
                tag.get("COVER ART").unwrap().values,
                vec!["front.jpg"]
            );
        }
    }

    #[test]
    fn corrupt_tail_yields_partial_tag() {
        let mut tag = ApeTag::new();
        tag.set("TITLE", "Kept", true);
        tag.set("ARTIST", "Lost", true);
        let region = tag.render(false);
        let items = &region[..region.len() - 32];
        // Truncate inside the second record.
        let cut = &items[..items.len() - 3];
        let parsed = ApeTag::parse(cut, 2);
        assert_eq!(parsed.title().as_deref(), Some("Kept"));
        assert!(parsed.artist().is_none());
    }
}
