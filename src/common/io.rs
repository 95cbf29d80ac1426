use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::error::{Result, TagError};

/// File handle every tag adapter performs its I/O through.
///
/// Wraps a `std::fs::File` and exposes offset-addressed block reads/writes plus
/// the splice primitive (`insert`) that replaces a byte region with
/// differently-sized content while shifting everything after it.
#[derive(Debug)]
pub struct TagFile {
    file: File,
    read_only: bool,
    valid: bool,
}

impl TagFile {
    /// Open a file for read/write access, falling back to read-only if the
    /// file cannot be opened writable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => Ok(TagFile {
                file,
                read_only: false,
                valid: true,
            }),
            Err(_) => Ok(TagFile {
                file: File::open(path)?,
                read_only: true,
                valid: true,
            }),
        }
    }

    /// Open a file strictly read-only.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Ok(TagFile {
            file: File::open(path)?,
            read_only: true,
            valid: true,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    /// Current file length in bytes.
    pub fn length(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Read up to `n` bytes starting at `offset`. Returns fewer bytes when the
    /// range extends past end-of-file.
    pub fn read_block_at(&mut self, offset: u64, n: usize) -> Result<Vec<u8>> {
        let len = self.length()?;
        if offset >= len {
            return Ok(Vec::new());
        }
        let n = n.min((len - offset) as usize);
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; n];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrite bytes at `offset` without changing the file length.
    pub fn write_block_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }

    /// Replace `replace_len` bytes at `offset` with `data`, shifting all
    /// subsequent content by `data.len() - replace_len`.
    ///
    /// Bytes before `offset` and after the replaced region are preserved
    /// exactly; only their position moves.
    pub fn insert(&mut self, data: &[u8], offset: u64, replace_len: u64) -> Result<()> {
        self.check_writable()?;

        let file_len = self.length()?;
        if offset > file_len || offset + replace_len > file_len {
            return Err(TagError::ValueError(
                "splice region extends beyond end of file".into(),
            ));
        }

        // Same-size replacement needs no shifting.
        if data.len() as u64 == replace_len {
            if !data.is_empty() {
                self.write_block_at(offset, data)?;
            }
            return Ok(());
        }

        // Read everything after the replaced region, then rewrite the tail.
        self.file.seek(SeekFrom::Start(offset + replace_len))?;
        let mut trailing = Vec::new();
        self.file.read_to_end(&mut trailing)?;

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.write_all(&trailing)?;
        self.file.flush()?;

        let new_len = offset + data.len() as u64 + trailing.len() as u64;
        self.file.set_len(new_len)?;

        Ok(())
    }

    /// Remove `len` bytes at `offset`, shifting subsequent content backward.
    pub fn remove_block(&mut self, offset: u64, len: u64) -> Result<()> {
        self.insert(&[], offset, len)
    }

    /// Discard everything from `offset` to end-of-file.
    pub fn truncate(&mut self, offset: u64) -> Result<()> {
        self.check_writable()?;
        self.file.set_len(offset)?;
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.valid {
            return Err(TagError::InvalidFile);
        }
        if self.read_only {
            return Err(TagError::ReadOnly);
        }
        Ok(())
    }
}
