use thiserror::Error;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is open read-only")]
    ReadOnly,

    #[error("file handle is invalid")]
    InvalidFile,

    #[error("APE error: {0}")]
    Ape(String),

    #[error("ID3v1 error: {0}")]
    Id3v1(String),

    #[error("EBML error: {0}")]
    Ebml(String),

    #[error("EBML malformed variable-length integer")]
    EbmlMalformedVint,

    #[error("Matroska error: {0}")]
    Matroska(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Value error: {0}")]
    ValueError(String),
}

pub type Result<T> = std::result::Result<T, TagError>;
