use crate::ape::{self, ApeTag};
use crate::common::error::Result;
use crate::common::io::TagFile;
use crate::id3v1::{self, Id3v1Tag};
use crate::tag::Tag;

/// Which tag formats a save updates. Formats not written are left in place
/// unless `strip_unwritten` is set.
#[derive(Debug, Clone, Copy)]
pub struct SavePolicy {
    pub write_ape: bool,
    pub write_id3v1: bool,
    pub strip_unwritten: bool,
}

impl Default for SavePolicy {
    fn default() -> Self {
        SavePolicy {
            write_ape: true,
            write_id3v1: true,
            strip_unwritten: false,
        }
    }
}

/// An MPEG audio file that may carry an APE tag and an ID3v1 trailer at the
/// same time.
///
/// Reads prefer the richer APE tag and fall back to ID3v1 independently per
/// field; writes follow the [`SavePolicy`].
#[derive(Debug)]
pub struct MpegFile {
    file: TagFile,
    ape: Option<ApeTag>,
    id3v1: Option<Id3v1Tag>,
}

impl MpegFile {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let mut file = TagFile::open(path)?;
        let ape = ape::read(&mut file)?;
        let id3v1 = id3v1::read(&mut file)?;
        Ok(MpegFile { file, ape, id3v1 })
    }

    pub fn ape_tag(&self) -> Option<&ApeTag> {
        self.ape.as_ref()
    }

    /// The APE tag, created empty on first access.
    pub fn ape_tag_mut(&mut self) -> &mut ApeTag {
        self.ape.get_or_insert_with(ApeTag::new)
    }

    pub fn id3v1_tag(&self) -> Option<&Id3v1Tag> {
        self.id3v1.as_ref()
    }

    pub fn id3v1_tag_mut(&mut self) -> &mut Id3v1Tag {
        self.id3v1.get_or_insert_with(Id3v1Tag::new)
    }

    // Per-field priority: the richer format wins, the simpler one fills
    // gaps. Each field falls back independently.

    pub fn title(&self) -> Option<String> {
        pick(self.ape.as_ref().and_then(Tag::title), || {
            self.id3v1.as_ref().and_then(Tag::title)
        })
    }

    pub fn artist(&self) -> Option<String> {
        pick(self.ape.as_ref().and_then(Tag::artist), || {
            self.id3v1.as_ref().and_then(Tag::artist)
        })
    }

    pub fn album(&self) -> Option<String> {
        pick(self.ape.as_ref().and_then(Tag::album), || {
            self.id3v1.as_ref().and_then(Tag::album)
        })
    }

    pub fn comment(&self) -> Option<String> {
        pick(self.ape.as_ref().and_then(Tag::comment), || {
            self.id3v1.as_ref().and_then(Tag::comment)
        })
    }

    pub fn genre(&self) -> Option<String> {
        pick(self.ape.as_ref().and_then(Tag::genre), || {
            self.id3v1.as_ref().and_then(Tag::genre)
        })
    }

    pub fn year(&self) -> u32 {
        match self.ape.as_ref().map_or(0, Tag::year) {
            0 => self.id3v1.as_ref().map_or(0, Tag::year),
            y => y,
        }
    }

    pub fn track(&self) -> u32 {
        match self.ape.as_ref().map_or(0, Tag::track) {
            0 => self.id3v1.as_ref().map_or(0, Tag::track),
            t => t,
        }
    }

    /// Write the selected formats. ID3v1 goes first so a fresh APE region
    /// lands before the trailer.
    pub fn save(&mut self, policy: SavePolicy) -> Result<()> {
        if policy.write_id3v1 {
            if let Some(tag) = &self.id3v1 {
                id3v1::save(&mut self.file, tag)?;
            }
        } else if policy.strip_unwritten {
            id3v1::strip(&mut self.file)?;
            self.id3v1 = None;
        }

        if policy.write_ape {
            if let Some(tag) = &self.ape {
                ape::save(&mut self.file, tag, true)?;
            }
        } else if policy.strip_unwritten {
            ape::strip(&mut self.file)?;
            self.ape = None;
        }

        Ok(())
    }
}

fn pick(rich: Option<String>, simple: impl FnOnce() -> Option<String>) -> Option<String> {
    match rich {
        Some(v) if !v.is_empty() => Some(v),
        _ => simple(),
    }
}
