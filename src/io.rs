//! Positioned file I/O.
//!
//! The store only ever needs a byte-addressable handle: read at an offset,
//! write at an offset, truncate, flush. Reads and writes go through the
//! platform's positioned syscalls so they take `&self` and never disturb a
//! shared seek position.

#![forbid(unsafe_code)]

use std::fs::File;
use std::path::Path;

use crate::error::Result;

#[cfg(unix)]
mod stdio_unix {
    use std::fs::{File, OpenOptions};
    use std::io::{self, ErrorKind};
    use std::os::unix::fs::FileExt;
    use std::path::Path;

    pub fn open_rw(path: &Path, create_new: bool) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(create_new)
            .open(path)
    }

    /// Reads an exact number of bytes at `off` using pread semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    /// Writes all bytes at `off` using pwrite semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod stdio_win {
    use std::fs::{File, OpenOptions};
    use std::io::{self, ErrorKind};
    use std::os::windows::fs::FileExt;
    use std::path::Path;

    pub fn open_rw(path: &Path, create_new: bool) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(create_new)
            .open(path)
    }

    /// Reads an exact number of bytes at `off` using seek_read semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    /// Writes all bytes at `off` using seek_write semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(unix)]
use stdio_unix as stdio;
#[cfg(windows)]
use stdio_win as stdio;

/// Read-write file handle with positioned I/O.
#[derive(Debug)]
pub struct StdFileIo {
    inner: File,
}

impl StdFileIo {
    /// Opens an existing file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let inner = stdio::open_rw(path.as_ref(), false)?;
        Ok(Self { inner })
    }

    /// Creates a brand-new file for read-write access. Fails if it exists.
    pub fn create_new(path: impl AsRef<Path>) -> Result<Self> {
        let inner = stdio::open_rw(path.as_ref(), true)?;
        Ok(Self { inner })
    }

    /// Reads exactly `dst.len()` bytes starting at `off`.
    pub fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        stdio::read_exact(&self.inner, off, dst)?;
        Ok(())
    }

    /// Writes all of `src` starting at `off`.
    pub fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        stdio::write_all(&self.inner, off, src)?;
        Ok(())
    }

    /// Synchronizes file data and metadata to disk.
    pub fn sync_all(&self) -> Result<()> {
        self.inner.sync_all()?;
        Ok(())
    }

    /// Current length of the file in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    /// True when the file holds no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncates or extends the file to `len` bytes.
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.inner.set_len(len)?;
        Ok(())
    }
}
