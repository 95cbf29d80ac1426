//! EBML/Matroska element ids (marker bit included, as stored on disk).

pub const EBML_HEADER: u64 = 0x1A45_DFA3;
pub const DOC_TYPE: u64 = 0x4282;

pub const SEGMENT: u64 = 0x1853_8067;

pub const TAGS: u64 = 0x1254_C367;
pub const TAG: u64 = 0x7373;
pub const TARGETS: u64 = 0x63C0;
pub const TARGET_TYPE_VALUE: u64 = 0x68CA;
pub const SIMPLE_TAG: u64 = 0x67C8;
pub const TAG_NAME: u64 = 0x45A3;
pub const TAG_STRING: u64 = 0x4487;
pub const TAG_BINARY: u64 = 0x4485;
pub const TAG_LANGUAGE: u64 = 0x447A;

/// Well-known target type values.
pub const TARGET_TRACK: u64 = 30;
pub const TARGET_ALBUM: u64 = 50;
