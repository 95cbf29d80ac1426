pub mod genres;

use crate::common::error::Result;
use crate::common::io::TagFile;
use crate::tag::Tag;

pub const TAG_SIZE: u64 = 128;

/// An ID3v1 tag: the fixed 128-byte trailer at end-of-file.
///
/// Text fields hold at most 30 bytes of Latin-1 (year: 4). ID3v1.1 steals the
/// last two comment bytes for a track number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Id3v1Tag {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: String,
    pub comment: String,
    pub track_number: u8,
    /// Index into the genre table; 255 means none.
    pub genre_index: u8,
}

impl Id3v1Tag {
    pub fn new() -> Self {
        Id3v1Tag {
            genre_index: 255,
            ..Id3v1Tag::default()
        }
    }

    /// Parse a 128-byte block. Returns `None` when the magic is absent.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < TAG_SIZE as usize || &data[0..3] != b"TAG" {
            return None;
        }

        let mut tag = Id3v1Tag {
            title: decode_field(&data[3..33]),
            artist: decode_field(&data[33..63]),
            album: decode_field(&data[63..93]),
            year: decode_field(&data[93..97]),
            comment: String::new(),
            track_number: 0,
            genre_index: data[127],
        };

        // ID3v1.1: comment byte 28 is zero and byte 29 carries the track.
        if data[125] == 0 && data[126] != 0 {
            tag.comment = decode_field(&data[97..125]);
            tag.track_number = data[126];
        } else {
            tag.comment = decode_field(&data[97..127]);
        }

        Some(tag)
    }

    /// Render the fixed 128-byte layout. A non-zero track number produces the
    /// ID3v1.1 variant.
    pub fn render(&self) -> [u8; 128] {
        let mut out = [0u8; 128];
        out[0..3].copy_from_slice(b"TAG");
        encode_field(&mut out[3..33], &self.title);
        encode_field(&mut out[33..63], &self.artist);
        encode_field(&mut out[63..93], &self.album);
        encode_field(&mut out[93..97], &self.year);

        if self.track_number != 0 {
            encode_field(&mut out[97..125], &self.comment);
            out[125] = 0;
            out[126] = self.track_number;
        } else {
            encode_field(&mut out[97..127], &self.comment);
        }

        out[127] = self.genre_index;
        out
    }
}

impl Tag for Id3v1Tag {
    fn title(&self) -> Option<String> {
        non_empty(&self.title)
    }
    fn artist(&self) -> Option<String> {
        non_empty(&self.artist)
    }
    fn album(&self) -> Option<String> {
        non_empty(&self.album)
    }
    fn comment(&self) -> Option<String> {
        non_empty(&self.comment)
    }
    fn genre(&self) -> Option<String> {
        genres::name(self.genre_index).map(str::to_string)
    }
    fn year(&self) -> u32 {
        self.year.trim().parse().unwrap_or(0)
    }
    fn track(&self) -> u32 {
        self.track_number as u32
    }

    fn set_title(&mut self, v: &str) {
        self.title = v.to_string();
    }
    fn set_artist(&mut self, v: &str) {
        self.artist = v.to_string();
    }
    fn set_album(&mut self, v: &str) {
        self.album = v.to_string();
    }
    fn set_comment(&mut self, v: &str) {
        self.comment = v.to_string();
    }
    fn set_genre(&mut self, v: &str) {
        self.genre_index = genres::index(v);
    }
    fn set_year(&mut self, v: u32) {
        self.year = if v == 0 {
            String::new()
        } else {
            itoa::Buffer::new().format(v).to_string()
        };
    }
    fn set_track(&mut self, v: u32) {
        self.track_number = v.min(255) as u8;
    }

    fn is_empty(&self) -> bool {
        self.title.is_empty()
            && self.artist.is_empty()
            && self.album.is_empty()
            && self.year.is_empty()
            && self.comment.is_empty()
            && self.track_number == 0
            && self.genre_index == 255
    }

    fn properties(&self) -> Vec<(String, Vec<String>)> {
        let mut props = Vec::new();
        let mut push = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                props.push((key.to_string(), vec![v]));
            }
        };
        push("TITLE", self.title());
        push("ARTIST", self.artist());
        push("ALBUM", self.album());
        push("COMMENT", self.comment());
        push("GENRE", self.genre());
        if !self.year.is_empty() {
            props.push(("YEAR".to_string(), vec![self.year.clone()]));
        }
        if self.track_number != 0 {
            props.push((
                "TRACK".to_string(),
                vec![itoa::Buffer::new().format(self.track_number).to_string()],
            ));
        }
        props
    }

    fn set_property(&mut self, key: &str, values: &[String]) {
        let Some(value) = values.first() else {
            self.remove_property(key);
            return;
        };
        match key.to_ascii_uppercase().as_str() {
            "TITLE" => self.title = value.clone(),
            "ARTIST" => self.artist = value.clone(),
            "ALBUM" => self.album = value.clone(),
            "COMMENT" => self.comment = value.clone(),
            "GENRE" => self.set_genre(value),
            "YEAR" => self.year = value.clone(),
            "TRACK" => self.track_number = value.parse().unwrap_or(0),
            other => log::debug!("ID3v1 cannot store property {other}"),
        }
    }

    fn remove_property(&mut self, key: &str) {
        match key.to_ascii_uppercase().as_str() {
            "TITLE" => self.title.clear(),
            "ARTIST" => self.artist.clear(),
            "ALBUM" => self.album.clear(),
            "COMMENT" => self.comment.clear(),
            "GENRE" => self.genre_index = 255,
            "YEAR" => self.year.clear(),
            "TRACK" => self.track_number = 0,
            _ => {}
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Decode a fixed-width Latin-1 field, trimming NULs and trailing spaces.
fn decode_field(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&data[..end]);
    decoded.trim_end().to_string()
}

/// Encode into a fixed-width Latin-1 field, truncating and NUL-padding.
fn encode_field(dest: &mut [u8], text: &str) {
    let (encoded, _, _) = encoding_rs::WINDOWS_1252.encode(text);
    let len = encoded.len().min(dest.len());
    dest[..len].copy_from_slice(&encoded[..len]);
}

/// Offset of the ID3v1 trailer, if the file ends with one.
pub fn find(file: &mut TagFile) -> Result<Option<u64>> {
    let len = file.length()?;
    if len < TAG_SIZE {
        return Ok(None);
    }
    let magic = file.read_block_at(len - TAG_SIZE, 3)?;
    Ok(if magic == *b"TAG" {
        Some(len - TAG_SIZE)
    } else {
        None
    })
}

pub fn read(file: &mut TagFile) -> Result<Option<Id3v1Tag>> {
    let Some(offset) = find(file)? else {
        return Ok(None);
    };
    let data = file.read_block_at(offset, TAG_SIZE as usize)?;
    Ok(Id3v1Tag::parse(&data))
}

/// Overwrite an existing trailer in place, or append one.
pub fn save(file: &mut TagFile, tag: &Id3v1Tag) -> Result<()> {
    let rendered = tag.render();
    match find(file)? {
        Some(offset) => file.write_block_at(offset, &rendered),
        None => {
            let len = file.length()?;
            file.insert(&rendered, len, 0)
        }
    }
}

/// Drop the trailing 128 bytes when they hold an ID3v1 tag.
pub fn strip(file: &mut TagFile) -> Result<()> {
    if let Some(offset) = find(file)? {
        file.truncate(offset)?;
    }
    Ok(())
}
