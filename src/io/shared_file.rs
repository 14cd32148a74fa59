//! A file written and read at explicit offsets by every rank.
//!
//! Rank 0 creates (and truncates) the file; the other ranks open it once
//! creation is agreed. Each rank then writes only its own byte ranges, so no
//! two ranks ever touch the same bytes.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::comm::communicator::{Communicator, CommunicatorExt};
use crate::core::block::BlockId;
use crate::core::error::TessError;

/// Failure reading or writing a persisted tessellation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IoFormatError {
    /// The storage layer failed.
    #[error("I/O error on {path}: {message}")]
    Io {
        /// File
        path: String,
        /// Underlying error
        message: String,
    },

    /// The file does not start with the expected magic.
    #[error("{path} is not a {expected} file")]
    BadMagic {
        /// File
        path: String,
        /// Expected magic
        expected: &'static str,
    },

    /// The file ends before a referenced range.
    #[error("{path} is truncated: {len} bytes wanted at offset {offset}")]
    Truncated {
        /// File
        path: String,
        /// Start of the missing range
        offset: u64,
        /// Length of the missing range
        len: u64,
    },

    /// The header cannot be parsed or is inconsistent.
    #[error("Malformed header: {message}")]
    Header {
        /// Description
        message: String,
    },

    /// A dataset named in the format is absent from the header.
    #[error("Dataset {name} is missing")]
    MissingDataset {
        /// Dataset name
        name: String,
    },

    /// A dataset or block record has the wrong size.
    #[error("Dataset {name} holds {actual} elements, expected {expected}")]
    ShapeMismatch {
        /// Dataset name
        name: String,
        /// Expected element count
        expected: u64,
        /// Actual element count
        actual: u64,
    },

    /// A block is not present in the file.
    #[error("Block {gid} is not in the file")]
    UnknownBlock {
        /// Requested block
        gid: BlockId,
    },

    /// A block record failed to encode or decode.
    #[error("Block record codec failure: {message}")]
    Codec {
        /// Description
        message: String,
    },
}

impl From<bincode::Error> for IoFormatError {
    fn from(e: bincode::Error) -> Self {
        Self::Codec {
            message: e.to_string(),
        }
    }
}

/// A file accessed at explicit offsets.
#[derive(Debug)]
pub struct SharedFile {
    path: PathBuf,
    file: File,
}

impl SharedFile {
    fn io_error(path: &Path, e: &std::io::Error) -> IoFormatError {
        IoFormatError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        }
    }

    /// Collectively creates `path` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`IoFormatError::Io`] (or a collective abort) if any rank
    /// cannot create or open the file.
    pub fn create<C>(comm: &C, path: &Path) -> Result<Self, TessError>
    where
        C: Communicator + ?Sized,
    {
        let created: Result<(), TessError> = if comm.rank() == 0 {
            File::create(path)
                .map(drop)
                .map_err(|e| Self::io_error(path, &e).into())
        } else {
            Ok(())
        };
        comm.agree(created)?;
        let opened: Result<Self, TessError> = OpenOptions::new()
            .write(true)
            .read(true)
            .open(path)
            .map(|file| Self {
                path: path.to_path_buf(),
                file,
            })
            .map_err(|e| Self::io_error(path, &e).into());
        comm.agree(opened)
    }

    /// Opens `path` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`IoFormatError::Io`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, IoFormatError> {
        File::open(path)
            .map(|file| Self {
                path: path.to_path_buf(),
                file,
            })
            .map_err(|e| Self::io_error(path, &e))
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length.
    ///
    /// # Errors
    ///
    /// Returns [`IoFormatError::Io`] if metadata is unavailable.
    pub fn byte_len(&self) -> Result<u64, IoFormatError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| Self::io_error(&self.path, &e))
    }

    /// Writes `bytes` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`IoFormatError::Io`] on failure.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<(), IoFormatError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut f = &self.file;
        f.seek(SeekFrom::Start(offset))
            .and_then(|_| f.write_all(bytes))
            .map_err(|e| Self::io_error(&self.path, &e))
    }

    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`IoFormatError::Truncated`] if the file is too short and
    /// [`IoFormatError::Io`] on other failures.
    pub fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>, IoFormatError> {
        let truncated = || IoFormatError::Truncated {
            path: self.path.display().to_string(),
            offset,
            len,
        };
        // Lengths come from file contents; check them before allocating.
        match offset.checked_add(len) {
            Some(end) if end <= self.byte_len()? => {}
            _ => return Err(truncated()),
        }
        let size = usize::try_from(len).map_err(|_| truncated())?;
        let mut buf = vec![0_u8; size];
        if size == 0 {
            return Ok(buf);
        }
        let mut f = &self.file;
        f.seek(SeekFrom::Start(offset))
            .and_then(|_| f.read_exact(&mut buf))
            .map_err(|e| {
                if e.kind() == ErrorKind::UnexpectedEof {
                    IoFormatError::Truncated {
                        path: self.path.display().to_string(),
                        offset,
                        len,
                    }
                } else {
                    Self::io_error(&self.path, &e)
                }
            })?;
        Ok(buf)
    }

    /// Reads a little-endian `u64` at `offset`.
    ///
    /// # Errors
    ///
    /// As [`Self::read_at`].
    pub fn read_u64(&self, offset: u64) -> Result<u64, IoFormatError> {
        let bytes = self.read_at(offset, 8)?;
        let mut word = [0_u8; 8];
        word.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(word))
    }

    /// Flushes written data to storage.
    ///
    /// # Errors
    ///
    /// Returns [`IoFormatError::Io`] on failure.
    pub fn sync(&self) -> Result<(), IoFormatError> {
        self.file
            .sync_data()
            .map_err(|e| Self::io_error(&self.path, &e))
    }
}

/// Checks the 8-byte magic at the start of `file`.
///
/// # Errors
///
/// Returns [`IoFormatError::BadMagic`] on mismatch.
pub fn check_magic(file: &SharedFile, magic: &'static [u8; 8]) -> Result<(), IoFormatError> {
    let found = file.read_at(0, 8).map_err(|e| match e {
        IoFormatError::Truncated { path, .. } => IoFormatError::BadMagic {
            path,
            expected: std::str::from_utf8(magic).unwrap_or("tess"),
        },
        other => other,
    })?;
    if found == magic {
        Ok(())
    } else {
        Err(IoFormatError::BadMagic {
            path: file.path().display().to_string(),
            expected: std::str::from_utf8(magic).unwrap_or("tess"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::single::SingleProcess;
    use crate::comm::thread_world::ThreadWorld;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tess-shared-{}-{name}", std::process::id()))
    }

    #[test]
    fn ranks_write_disjoint_ranges() {
        let path = scratch("disjoint");
        ThreadWorld::run(4, |comm| {
            let file = SharedFile::create(&comm, &path).unwrap();
            let rank = u8::try_from(comm.rank()).unwrap();
            file.write_at(u64::from(rank) * 3, &[rank; 3]).unwrap();
            comm.barrier().unwrap();
        });
        let file = SharedFile::open(&path).unwrap();
        assert_eq!(file.byte_len().unwrap(), 12);
        assert_eq!(file.read_at(3, 3).unwrap(), vec![1, 1, 1]);
        assert_eq!(file.read_at(9, 3).unwrap(), vec![3, 3, 3]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn short_reads_are_truncation() {
        let path = scratch("short");
        let file = SharedFile::create(&SingleProcess, &path).unwrap();
        file.write_at(0, b"TESSCOL1").unwrap();
        assert!(check_magic(&file, b"TESSCOL1").is_ok());
        assert!(matches!(
            check_magic(&file, b"TESSBLK1"),
            Err(IoFormatError::BadMagic { .. })
        ));
        assert!(matches!(
            file.read_at(4, 16),
            Err(IoFormatError::Truncated { offset: 4, len: 16, .. })
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn ranges_past_the_end_fail_before_reading() {
        let path = scratch("past-end");
        let file = SharedFile::create(&SingleProcess, &path).unwrap();
        file.write_at(0, &[7; 32]).unwrap();
        assert!(matches!(
            file.read_at(8, 1 << 62),
            Err(IoFormatError::Truncated { offset: 8, .. })
        ));
        assert!(matches!(
            file.read_at(u64::MAX, 2),
            Err(IoFormatError::Truncated { .. })
        ));
        assert_eq!(file.read_at(16, 16).unwrap(), vec![7; 16]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SharedFile::open(&scratch("absent")).unwrap_err();
        assert!(matches!(err, IoFormatError::Io { .. }));
    }
}
