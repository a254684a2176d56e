// src/source.rs
//! Byte sources handed to decoders.
//!
//! A [`DecodeSource`] is a seekable stream with a single mark. The fallback chain sets the
//! mark once and rewinds to it before every attempt, so each decoder sees byte-identical
//! input. A [`SourceLocator`] is the reopenable recipe a deferred handle keeps around until it
//! is materialized.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};

/// Anything a decoder can read from and we can rewind.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

// ---------- DecodeSource ----------

pub struct DecodeSource {
    inner: Box<dyn ReadSeek>,
    mark: Option<u64>,
    len: u64,
}

impl DecodeSource {
    /// Wraps an in-memory buffer.
    pub fn from_bytes(bytes: Arc<[u8]>) -> Self {
        let len = bytes.len() as u64;
        Self {
            inner: Box::new(Cursor::new(bytes)),
            mark: None,
            len,
        }
    }

    /// Wraps any seekable reader. The length is measured by seeking to the end and back.
    pub fn from_seekable<R: Read + Seek + 'static>(mut reader: R) -> Result<Self> {
        let start = reader.stream_position().map_err(|_| Error::NotSeekable)?;
        let end = reader.seek(SeekFrom::End(0)).map_err(|_| Error::NotSeekable)?;
        reader
            .seek(SeekFrom::Start(start))
            .map_err(|_| Error::NotSeekable)?;
        Ok(Self {
            inner: Box::new(reader),
            mark: None,
            len: end.saturating_sub(start),
        })
    }

    /// Buffering adapter for streams that cannot seek: reads everything up front.
    pub fn buffered<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::from_bytes(bytes.into()))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_seekable(BufReader::new(file))
    }

    /// Bytes available from the position the source was created at.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remembers the current position. Only the first call has any effect.
    pub fn mark(&mut self) -> Result<()> {
        if self.mark.is_none() {
            let pos = self.inner.stream_position().map_err(|_| Error::NotSeekable)?;
            self.mark = Some(pos);
        }
        Ok(())
    }

    pub fn is_marked(&self) -> bool {
        self.mark.is_some()
    }

    /// Rewinds to the mark.
    pub fn reset(&mut self) -> Result<()> {
        let mark = self
            .mark
            .ok_or_else(|| Error::custom("reset called on a source that was never marked"))?;
        self.inner
            .seek(SeekFrom::Start(mark))
            .map_err(|_| Error::NotSeekable)?;
        Ok(())
    }

    /// Reads everything from the current position. Handy for decoders that want a slice.
    pub fn read_remaining(&mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.len as usize);
        self.inner.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

impl Read for DecodeSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for DecodeSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

impl fmt::Debug for DecodeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeSource")
            .field("len", &self.len)
            .field("mark", &self.mark)
            .finish()
    }
}

// ---------- SourceLocator ----------

/// How to (re)open the bytes behind a resource.
#[derive(Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Bytes(Arc<[u8]>),
    File(PathBuf),
}

impl SourceLocator {
    pub fn from_bytes<B: Into<Arc<[u8]>>>(bytes: B) -> Self {
        SourceLocator::Bytes(bytes.into())
    }

    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        SourceLocator::File(path.into())
    }

    /// Drains a plain reader into memory so the result can be reopened any number of times.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(SourceLocator::Bytes(bytes.into()))
    }

    pub fn open(&self) -> Result<DecodeSource> {
        match self {
            SourceLocator::Bytes(bytes) => Ok(DecodeSource::from_bytes(bytes.clone())),
            SourceLocator::File(path) => DecodeSource::open(path)
                .map_err(|e| e.context(format!("opening {}", path.display()))),
        }
    }

    /// Content fingerprint for in-memory sources, path for files.
    pub fn fingerprint(&self) -> String {
        match self {
            SourceLocator::Bytes(bytes) => format!("mem:{:016x}", xxh3_64(bytes)),
            SourceLocator::File(path) => format!("file:{}", path.display()),
        }
    }
}

// Don't dump whole buffers into logs.
impl fmt::Debug for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            SourceLocator::File(path) => write!(f, "File({})", path.display()),
        }
    }
}

impl From<Vec<u8>> for SourceLocator {
    fn from(bytes: Vec<u8>) -> Self {
        SourceLocator::Bytes(bytes.into())
    }
}

impl From<&[u8]> for SourceLocator {
    fn from(bytes: &[u8]) -> Self {
        SourceLocator::Bytes(bytes.into())
    }
}

impl From<PathBuf> for SourceLocator {
    fn from(path: PathBuf) -> Self {
        SourceLocator::File(path)
    }
}
