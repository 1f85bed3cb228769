//! Caller-supplied content sources.
//!
//! A buffer can be declared from a source instead of being allocated: it
//! starts out unloaded, counts as dumped, and the first restore reads its
//! bytes from the source. No dump file is written for it until the buffer
//! is dumped again after having been loaded.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use outcore_common::types::BufferId;
use outcore_common::utils::error::{Error, Result};
use serde::{Deserialize, Serialize};

use super::object::BufferState;

/// Opens fresh readers over some content.
///
/// Every call must yield a reader positioned at the first byte.
pub trait StreamFactory: Send + Sync {
    /// Opens a new reader.
    ///
    /// # Errors
    ///
    /// Returns the I/O error that prevented opening the content.
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;
}

impl<F> StreamFactory for F
where
    F: Fn() -> io::Result<Box<dyn Read + Send>> + Send + Sync,
{
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        self()
    }
}

/// Raw file reader factory.
#[derive(Debug, Clone)]
struct FileFactory {
    path: PathBuf,
}

impl StreamFactory for FileFactory {
    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(&self.path)?)))
    }
}

/// Layout of the bytes behind a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// The buffer's bytes, verbatim.
    Raw,
    /// Anything else (in-memory content, caller-defined encodings).
    #[default]
    Other,
}

impl FileFormat {
    /// Returns the format name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a source-backed buffer is first read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingMode {
    /// Load as soon as the source is set.
    #[default]
    Direct,
    /// Load on the first lock.
    Lazy,
}

impl LoadingMode {
    /// Returns the mode name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Lazy => "lazy",
        }
    }
}

impl fmt::Display for LoadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content source for [`BufferObject::set_source`](super::BufferObject::set_source).
#[derive(Clone)]
pub struct BufferSource {
    factory: Arc<dyn StreamFactory>,
    path: Option<PathBuf>,
    format: FileFormat,
}

impl BufferSource {
    /// Wraps a reader factory.
    pub fn new(factory: impl StreamFactory + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            path: None,
            format: FileFormat::Other,
        }
    }

    /// Reads the buffer verbatim from a raw file.
    ///
    /// The file is opened on every load, never while setting the source.
    pub fn raw_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            factory: Arc::new(FileFactory { path: path.clone() }),
            path: Some(path),
            format: FileFormat::Raw,
        }
    }

    /// Records the file the content comes from.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Records the content's format.
    #[must_use]
    pub fn with_format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns the recorded file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the recorded format.
    #[must_use]
    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Opens a new reader over the content.
    ///
    /// # Errors
    ///
    /// Returns the factory's I/O error.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        self.factory.open()
    }

    /// Fills `out` from a fresh reader.
    pub(crate) fn read_into(&self, id: BufferId, out: &mut [u8]) -> Result<()> {
        let mut reader = self.open().map_err(|source| Error::RestoreIo { id, source })?;
        reader.read_exact(out).map_err(|source| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                Error::RestoreIo {
                    id,
                    source: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source holds fewer than {} bytes", out.len()),
                    ),
                }
            } else {
                Error::RestoreIo { id, source }
            }
        })
    }
}

impl fmt::Debug for BufferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSource")
            .field("path", &self.path)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Where a buffer's content can currently be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Logical size in bytes.
    pub size: usize,
    /// Residency state.
    pub state: BufferState,
    /// File holding the content: the source's file or the dump file.
    pub path: Option<PathBuf>,
    /// Format of the content at `path`.
    pub format: FileFormat,
    /// `true` while the content still comes from a caller-supplied source.
    pub user_source: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_closure_factory() {
        let source = BufferSource::new(|| -> io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(Cursor::new(vec![1u8, 2, 3])))
        });
        assert_eq!(source.format(), FileFormat::Other);
        assert!(source.path().is_none());

        let mut out = [0u8; 3];
        source.read_into(BufferId::new(1), &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);

        let mut too_long = [0u8; 4];
        let err = source.read_into(BufferId::new(1), &mut too_long).unwrap_err();
        assert!(err.is_data_loss());
    }

    #[test]
    fn test_raw_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.raw");
        std::fs::write(&path, b"voxels").unwrap();

        let source = BufferSource::raw_file(&path);
        assert_eq!(source.format(), FileFormat::Raw);
        assert_eq!(source.path(), Some(path.as_path()));

        let mut out = [0u8; 6];
        source.read_into(BufferId::new(2), &mut out).unwrap();
        assert_eq!(&out, b"voxels");
        // Every load opens a fresh reader.
        source.read_into(BufferId::new(2), &mut out).unwrap();

        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            source.read_into(BufferId::new(2), &mut out),
            Err(Error::RestoreIo { .. })
        ));
    }

    #[test]
    fn test_loading_mode_serde() {
        assert_eq!(LoadingMode::default(), LoadingMode::Direct);
        let mode: LoadingMode = serde_json::from_str(r#""lazy""#).unwrap();
        assert_eq!(mode, LoadingMode::Lazy);
        assert_eq!(mode.to_string(), "lazy");
    }
}
