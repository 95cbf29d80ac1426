pub mod ids;

use crate::common::error::Result;
use crate::ebml::{vint, EbmlDocument};
use crate::tag::Tag;

/// One SimpleTag: a named string or binary value, with an optional language.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleTag {
    pub name: String,
    pub value: SimpleTagValue,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimpleTagValue {
    Text(String),
    Binary(Vec<u8>),
}

impl SimpleTag {
    pub fn text(name: &str, value: &str) -> Self {
        SimpleTag {
            name: name.to_string(),
            value: SimpleTagValue::Text(value.to_string()),
            language: None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match &self.value {
            SimpleTagValue::Text(s) => Some(s.as_str()),
            SimpleTagValue::Binary(_) => None,
        }
    }
}

/// One Tag element: a scope (target type value) plus its SimpleTags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagEntry {
    /// Matroska TargetTypeValue; `None` when the entry carries no Targets.
    pub target_type: Option<u64>,
    pub simple_tags: Vec<SimpleTag>,
}

impl TagEntry {
    fn find(&self, name: &str) -> Option<&SimpleTag> {
        self.simple_tags.iter().find(|st| st.name == name)
    }
}

/// The in-memory model of a Matroska Tags element: every Tag entry in file
/// order. Entries the facade does not touch survive a save unchanged.
#[derive(Debug, Clone, Default)]
pub struct MatroskaTag {
    pub entries: Vec<TagEntry>,
}

impl MatroskaTag {
    pub fn new() -> Self {
        MatroskaTag::default()
    }

    /// The entry providing `name`, per scope precedence: among entries that
    /// carry a target type, the lowest (most specific) value wins: track
    /// (30) over album (50). Entries without scope information are the
    /// fallback, first encountered first.
    fn entry_for(&self, name: &str) -> Option<&TagEntry> {
        self.entries
            .iter()
            .filter(|e| e.find(name).is_some() && e.target_type.is_some())
            .min_by_key(|e| e.target_type.unwrap_or(u64::MAX))
            .or_else(|| self.entries.iter().find(|e| e.find(name).is_some()))
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.entry_for(name)?
            .find(name)?
            .as_text()
            .map(str::to_string)
    }

    /// Replace `name` in the entry that currently provides it, falling back
    /// to the first entry, creating one when the tag is empty.
    pub fn set_string(&mut self, name: &str, value: &str) {
        let idx = self
            .entry_for(name)
            .and_then(|target| self.entries.iter().position(|e| std::ptr::eq(e, target)))
            .unwrap_or(0);

        if self.entries.is_empty() {
            self.entries.push(TagEntry::default());
        }
        let last = self.entries.len() - 1;
        let entry = &mut self.entries[idx.min(last)];
        if let Some(st) = entry.simple_tags.iter_mut().find(|st| st.name == name) {
            st.value = SimpleTagValue::Text(value.to_string());
        } else {
            entry.simple_tags.push(SimpleTag::text(name, value));
        }
    }

    pub fn remove_field(&mut self, name: &str) {
        for entry in &mut self.entries {
            entry.simple_tags.retain(|st| st.name != name);
        }
        self.entries
            .retain(|e| !e.simple_tags.is_empty() || e.target_type.is_some());
    }
}

impl Tag for MatroskaTag {
    fn title(&self) -> Option<String> {
        self.get_string("TITLE")
    }
    fn artist(&self) -> Option<String> {
        self.get_string("ARTIST")
    }
    fn album(&self) -> Option<String> {
        self.get_string("ALBUM")
    }
    fn comment(&self) -> Option<String> {
        self.get_string("COMMENT")
    }
    fn genre(&self) -> Option<String> {
        self.get_string("GENRE")
    }
    fn year(&self) -> u32 {
        let date = self.get_string("DATE_RELEASE").unwrap_or_default();
        let digits: String = date.trim().chars().take_while(char::is_ascii_digit).collect();
        digits.parse().unwrap_or(0)
    }
    fn track(&self) -> u32 {
        self.get_string("PART_NUMBER")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn set_title(&mut self, v: &str) {
        self.set_string("TITLE", v);
    }
    fn set_artist(&mut self, v: &str) {
        self.set_string("ARTIST", v);
    }
    fn set_album(&mut self, v: &str) {
        self.set_string("ALBUM", v);
    }
    fn set_comment(&mut self, v: &str) {
        self.set_string("COMMENT", v);
    }
    fn set_genre(&mut self, v: &str) {
        self.set_string("GENRE", v);
    }
    fn set_year(&mut self, v: u32) {
        if v == 0 {
            self.remove_field("DATE_RELEASE");
        } else {
            self.set_string("DATE_RELEASE", itoa::Buffer::new().format(v));
        }
    }
    fn set_track(&mut self, v: u32) {
        if v == 0 {
            self.remove_field("PART_NUMBER");
        } else {
            self.set_string("PART_NUMBER", itoa::Buffer::new().format(v));
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.simple_tags.is_empty())
    }

    fn properties(&self) -> Vec<(String, Vec<String>)> {
        let mut props: Vec<(String, Vec<String>)> = Vec::new();
        for entry in &self.entries {
            for st in &entry.simple_tags {
                if let Some(text) = st.as_text() {
                    match props.iter_mut().find(|(k, _)| k == &st.name) {
                        Some((_, vs)) => vs.push(text.to_string()),
                        None => props.push((st.name.clone(), vec![text.to_string()])),
                    }
                }
            }
        }
        props
    }

    fn set_property(&mut self, key: &str, values: &[String]) {
        match values.first() {
            Some(v) => self.set_string(key, v),
            None => self.remove_field(key),
        }
    }

    fn remove_property(&mut self, key: &str) {
        self.remove_field(key);
    }
}

/// A Matroska file handler: the EBML document plus the parsed tag model.
#[derive(Debug)]
pub struct MatroskaFile {
    doc: EbmlDocument,
    tag: MatroskaTag,
}

impl MatroskaFile {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let mut doc = EbmlDocument::open(path)?;

        // DocType is advisory: unknown values are tolerated with a note.
        let root = doc.root();
        if let Some(header) = doc.get_child(root, ids::EBML_HEADER)? {
            if let Some(doc_type) = doc.get_child(header, ids::DOC_TYPE)? {
                let dt = doc.read_string(doc_type)?;
                if dt != "matroska" && dt != "webm" {
                    log::warn!("unexpected EBML DocType {dt:?}, continuing anyway");
                }
            }
        }

        let tag = read_tag(&mut doc)?;
        Ok(MatroskaFile { doc, tag })
    }

    pub fn tag(&self) -> &MatroskaTag {
        &self.tag
    }

    pub fn tag_mut(&mut self) -> &mut MatroskaTag {
        &mut self.tag
    }

    pub fn is_valid(&self) -> bool {
        self.doc.is_valid()
    }

    /// Re-render the Tags element and replace it in place. A file without a
    /// Tags element gets one appended to the Segment (reusing void space
    /// when the tree finds some).
    pub fn save(&mut self) -> Result<()> {
        let content = render_tags_content(&self.tag);

        let root = self.doc.root();
        let Some(segment) = self.doc.get_child(root, ids::SEGMENT)? else {
            return Err(crate::common::error::TagError::Matroska(
                "file has no Segment element".into(),
            ));
        };

        match self.doc.get_child(segment, ids::TAGS)? {
            Some(tags) => self.doc.set_binary(tags, &content),
            None => self.doc.add_element(segment, ids::TAGS, &content).map(|_| ()),
        }
    }

    /// Remove the Tags element, leaving a void placeholder so the rest of
    /// the file does not shift.
    pub fn strip(&mut self) -> Result<()> {
        let root = self.doc.root();
        let Some(segment) = self.doc.get_child(root, ids::SEGMENT)? else {
            return Ok(());
        };
        if let Some(tags) = self.doc.get_child(segment, ids::TAGS)? {
            self.doc.remove_child(segment, tags, true)?;
        }
        self.tag = MatroskaTag::new();
        Ok(())
    }
}

/// Walk Segment > Tags > Tag, building the in-memory model.
fn read_tag(doc: &mut EbmlDocument) -> Result<MatroskaTag> {
    let mut model = MatroskaTag::new();

    let root = doc.root();
    let Some(segment) = doc.get_child(root, ids::SEGMENT)? else {
        return Ok(model);
    };
    let Some(tags) = doc.get_child(segment, ids::TAGS)? else {
        return Ok(model);
    };

    for tag_elem in doc.get_children(tags, ids::TAG)? {
        let mut entry = TagEntry::default();

        if let Some(targets) = doc.get_child(tag_elem, ids::TARGETS)? {
            if let Some(ttv) = doc.get_child(targets, ids::TARGET_TYPE_VALUE)? {
                entry.target_type = Some(doc.read_unsigned(ttv)?);
            } else {
                // An empty Targets element still scopes the entry; Matroska's
                // default target type is album-level.
                entry.target_type = Some(ids::TARGET_ALBUM);
            }
        }

        for st_elem in doc.get_children(tag_elem, ids::SIMPLE_TAG)? {
            let Some(name_elem) = doc.get_child(st_elem, ids::TAG_NAME)? else {
                continue;
            };
            let name = doc.read_string(name_elem)?;

            let value = if let Some(s) = doc.get_child(st_elem, ids::TAG_STRING)? {
                SimpleTagValue::Text(doc.read_string(s)?)
            } else if let Some(b) = doc.get_child(st_elem, ids::TAG_BINARY)? {
                SimpleTagValue::Binary(doc.read_binary(b)?)
            } else {
                continue;
            };

            let language = match doc.get_child(st_elem, ids::TAG_LANGUAGE)? {
                Some(l) => Some(doc.read_string(l)?),
                None => None,
            };

            entry.simple_tags.push(SimpleTag {
                name,
                value,
                language,
            });
        }

        model.entries.push(entry);
    }

    Ok(model)
}

/// Encode one element: id, shortest size field, content.
fn make_element(id: u64, content: &[u8]) -> Vec<u8> {
    let mut out = vint::write_id(id);
    out.extend_from_slice(&vint::write_vint(content.len() as u64));
    out.extend_from_slice(content);
    out
}

fn encode_target_type(value: u64) -> Vec<u8> {
    let mut width = 1usize;
    while width < 8 && value >= (1u64 << (8 * width)) {
        width += 1;
    }
    let mut out = vec![0u8; width];
    let mut v = value;
    for i in (0..width).rev() {
        out[i] = (v & 0xFF) as u8;
        v >>= 8;
    }
    out
}

/// Render the content of the Tags element (the Tag children, not the Tags
/// header itself).
fn render_tags_content(tag: &MatroskaTag) -> Vec<u8> {
    let mut content = Vec::new();

    for entry in &tag.entries {
        if entry.simple_tags.is_empty() && entry.target_type.is_none() {
            continue;
        }
        let mut tag_body = Vec::new();

        if let Some(ttv) = entry.target_type {
            let targets =
                make_element(ids::TARGET_TYPE_VALUE, &encode_target_type(ttv));
            tag_body.extend_from_slice(&make_element(ids::TARGETS, &targets));
        }

        for st in &entry.simple_tags {
            let mut st_body = make_element(ids::TAG_NAME, st.name.as_bytes());
            if let Some(lang) = &st.language {
                st_body.extend_from_slice(&make_element(ids::TAG_LANGUAGE, lang.as_bytes()));
            }
            match &st.value {
                SimpleTagValue::Text(s) => {
                    st_body.extend_from_slice(&make_element(ids::TAG_STRING, s.as_bytes()));
                }
                SimpleTagValue::Binary(b) => {
                    st_body.extend_from_slice(&make_element(ids::TAG_BINARY, b));
                }
            }
            tag_body.extend_from_slice(&make_element(ids::SIMPLE_TAG, &st_body));
        }

        content.extend_from_slice(&make_element(ids::TAG, &tag_body));
    }

    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn simple_tag_bytes(name: &str, value: &str) -> Vec<u8> {
        let mut body = make_element(ids::TAG_NAME, name.as_bytes());
        body.extend_from_slice(&make_element(ids::TAG_STRING, value.as_bytes()));
        make_element(ids::SIMPLE_TAG, &body)
    }

    fn tag_entry_bytes(target_type: Option<u64>, simple_tags: &[Vec<u8>]) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(ttv) = target_type {
            let targets = make_element(ids::TARGET_TYPE_VALUE, &encode_target_type(ttv));
            body.extend_from_slice(&make_element(ids::TARGETS, &targets));
        }
        for st in simple_tags {
            body.extend_from_slice(st);
        }
        make_element(ids::TAG, &body)
    }

    /// A minimal Matroska file: EBML header with DocType, Segment with the
    /// given Tags content (plus a dummy sibling so splices have bytes to
    /// shift).
    fn mkv_bytes(tags_content: &[u8]) -> Vec<u8> {
        let header = make_element(ids::DOC_TYPE, b"matroska");
        let mut segment_body = make_element(ids::TAGS, tags_content);
        segment_body.extend_from_slice(&make_element(0x1F43_B675, b"CLUSTERDATA"));

        let mut out = make_element(ids::EBML_HEADER, &header);
        out.extend_from_slice(&make_element(ids::SEGMENT, &segment_body));
        out
    }

    fn write_temp(data: &[u8]) -> tempfile::TempPath {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
        f.into_temp_path()
    }

    #[test]
    fn reads_simple_tags() {
        let entry = tag_entry_bytes(
            Some(ids::TARGET_ALBUM),
            &[
                simple_tag_bytes("TITLE", "My Album"),
                simple_tag_bytes("ARTIST", "Someone"),
            ],
        );
        let path = write_temp(&mkv_bytes(&entry));
        let mkv = MatroskaFile::open(&path).unwrap();

        assert_eq!(mkv.tag().title().as_deref(), Some("My Album"));
        assert_eq!(mkv.tag().artist().as_deref(), Some("Someone"));
        assert_eq!(mkv.tag().entries[0].target_type, Some(ids::TARGET_ALBUM));
    }

    #[test]
    fn track_scope_wins_over_album_scope() {
        let album = tag_entry_bytes(
            Some(ids::TARGET_ALBUM),
            &[simple_tag_bytes("TITLE", "Album Title")],
        );
        let track = tag_entry_bytes(
            Some(ids::TARGET_TRACK),
            &[simple_tag_bytes("TITLE", "Track Title")],
        );
        let path = write_temp(&mkv_bytes(&[album, track].concat()));
        let mkv = MatroskaFile::open(&path).unwrap();

        assert_eq!(mkv.tag().title().as_deref(), Some("Track Title"));
    }

    #[test]
    fn untargeted_entry_is_the_fallback() {
        let untargeted = tag_entry_bytes(None, &[simple_tag_bytes("GENRE", "Jazz")]);
        let album = tag_entry_bytes(
            Some(ids::TARGET_ALBUM),
            &[simple_tag_bytes("TITLE", "Album Title")],
        );
        let path = write_temp(&mkv_bytes(&[untargeted, album].concat()));
        let mkv = MatroskaFile::open(&path).unwrap();

        assert_eq!(mkv.tag().genre().as_deref(), Some("Jazz"));
        assert_eq!(mkv.tag().title().as_deref(), Some("Album Title"));
    }

    #[test]
    fn set_updates_the_providing_entry() {
        let album = tag_entry_bytes(
            Some(ids::TARGET_ALBUM),
            &[simple_tag_bytes("TITLE", "Album Title")],
        );
        let track = tag_entry_bytes(
            Some(ids::TARGET_TRACK),
            &[simple_tag_bytes("TITLE", "Track Title")],
        );
        let path = write_temp(&mkv_bytes(&[album, track].concat()));
        let mut mkv = MatroskaFile::open(&path).unwrap();

        mkv.tag_mut().set_title("Renamed");
        assert_eq!(mkv.tag().title().as_deref(), Some("Renamed"));

        // The track-scoped entry took the edit; the album entry is untouched.
        let album_entry = &mkv.tag().entries[0];
        let track_entry = &mkv.tag().entries[1];
        assert_eq!(album_entry.find("TITLE").unwrap().as_text(), Some("Album Title"));
        assert_eq!(track_entry.find("TITLE").unwrap().as_text(), Some("Renamed"));
    }

    #[test]
    fn year_and_track_mapping() {
        let entry = tag_entry_bytes(
            Some(ids::TARGET_TRACK),
            &[
                simple_tag_bytes("DATE_RELEASE", "2004"),
                simple_tag_bytes("PART_NUMBER", "7"),
            ],
        );
        let path = write_temp(&mkv_bytes(&entry));
        let mkv = MatroskaFile::open(&path).unwrap();
        assert_eq!(mkv.tag().year(), 2004);
        assert_eq!(mkv.tag().track(), 7);
    }

    #[test]
    fn save_round_trips_edits() {
        let entry = tag_entry_bytes(
            Some(ids::TARGET_ALBUM),
            &[simple_tag_bytes("TITLE", "Old")],
        );
        let path = write_temp(&mkv_bytes(&entry));

        let mut mkv = MatroskaFile::open(&path).unwrap();
        mkv.tag_mut().set_title("New Title");
        mkv.tag_mut().set_artist("New Artist");
        mkv.save().unwrap();
        drop(mkv);

        let mkv = MatroskaFile::open(&path).unwrap();
        assert_eq!(mkv.tag().title().as_deref(), Some("New Title"));
        assert_eq!(mkv.tag().artist().as_deref(), Some("New Artist"));
        assert_eq!(mkv.tag().entries[0].target_type, Some(ids::TARGET_ALBUM));
    }

    #[test]
    fn save_creates_tags_when_missing() {
        // Segment with only a cluster, no Tags element.
        let header = make_element(ids::DOC_TYPE, b"matroska");
        let segment_body = make_element(0x1F43_B675, b"CLUSTERDATA");
        let mut data = make_element(ids::EBML_HEADER, &header);
        data.extend_from_slice(&make_element(ids::SEGMENT, &segment_body));
        let path = write_temp(&data);

        let mut mkv = MatroskaFile::open(&path).unwrap();
        assert!(mkv.tag().is_empty());
        mkv.tag_mut().set_title("Fresh");
        mkv.save().unwrap();
        drop(mkv);

        let mkv = MatroskaFile::open(&path).unwrap();
        assert_eq!(mkv.tag().title().as_deref(), Some("Fresh"));
    }

    #[test]
    fn strip_leaves_void_and_no_tags() {
        let entry = tag_entry_bytes(
            Some(ids::TARGET_ALBUM),
            &[simple_tag_bytes("TITLE", "Gone")],
        );
        let data = mkv_bytes(&entry);
        let path = write_temp(&data);

        let mut mkv = MatroskaFile::open(&path).unwrap();
        mkv.strip().unwrap();
        drop(mkv);

        // Same file length (void placeholder), no tags on reopen.
        assert_eq!(std::fs::read(&path).unwrap().len(), data.len());
        let mkv = MatroskaFile::open(&path).unwrap();
        assert!(mkv.tag().is_empty());
    }

    #[test]
    fn language_survives_round_trip() {
        let mut st_body = make_element(ids::TAG_NAME, b"COMMENT");
        st_body.extend_from_slice(&make_element(ids::TAG_LANGUAGE, b"fre"));
        st_body.extend_from_slice(&make_element(ids::TAG_STRING, "bonjour".as_bytes()));
        let entry = make_element(
            ids::TAG,
            &make_element(ids::SIMPLE_TAG, &st_body),
        );
        let path = write_temp(&mkv_bytes(&entry));

        let mut mkv = MatroskaFile::open(&path).unwrap();
        mkv.save().unwrap();
        drop(mkv);

        let mkv = MatroskaFile::open(&path).unwrap();
        let st = &mkv.tag().entries[0].simple_tags[0];
        assert_eq!(st.language.as_deref(), Some("fre"));
        assert_eq!(st.as_text(), Some("bonjour"));
    }
}
