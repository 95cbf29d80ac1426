//! Multi-format audio metadata library.
//!
//! Reads and writes tags embedded in audio container files without decoding
//! the audio itself: APEv2 footers, ID3v1 trailers, and Matroska/EBML tag
//! elements. Every format goes through the same file-splice primitive
//! ([`common::io::TagFile::insert`]), so edits avoid whole-file rewrites
//! wherever padding or void elements can be reused.
//!
//! A file handle must not be shared between threads or between two tag trees
//! at once; open one document per file and serialize access externally if
//! concurrent use is possible.

pub mod ape;
pub mod common;
pub mod ebml;
pub mod id3v1;
pub mod matroska;
pub mod mpeg;
pub mod tag;

pub use common::error::{Result, TagError};
pub use common::io::TagFile;
pub use tag::Tag;
