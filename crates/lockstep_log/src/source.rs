//! Log and frame sources.
//!
//! Fetching and decoding recorded data is someone else's job; the harness
//! only needs these narrow seams. The `Dir*` implementations read a local
//! mirror laid out as `<root>/<dongle>/<start time>/<segment>/`.
//!
//! Frame containers (`<log_type>.frames`) are a flat sequence of
//! little-endian `u32` length prefixes, each followed by one frame.

use crate::message::MessageKind;
use crate::route::{CameraStream, SegmentRef};
use crate::segment::LogSegment;
use bytes::{Buf, Bytes};
use indexmap::IndexMap;
use lockstep_core::{CoreError, CoreResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Name of the log file inside a segment directory
pub const RLOG_FILE: &str = "rlog.jsonl";

/// Loads the full message list of a segment
pub trait LogSource {
    /// Load `segment`
    ///
    /// # Errors
    ///
    /// Returns error if the segment cannot be fetched or decoded
    fn load(&self, segment: &SegmentRef) -> CoreResult<LogSegment>;
}

/// Random access to the decoded frames of one camera stream.
///
/// Reads never depend on earlier reads, so a reader can be shared by
/// every replay of the same segment.
pub trait FrameReader: Send + Sync {
    /// Number of frames in the stream
    fn frame_count(&self) -> usize;

    /// Frame at `index`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` past the end, or an I/O error
    fn get(&self, index: usize) -> CoreResult<Bytes>;

    /// Backing file, when there is one
    fn path(&self) -> Option<&Path> {
        None
    }
}

/// Opens frame readers for a segment's camera streams
pub trait FrameSource {
    /// Open `stream` of `segment`; `readahead` loads every frame up front
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened
    fn open(
        &self,
        segment: &SegmentRef,
        stream: CameraStream,
        readahead: bool,
    ) -> CoreResult<Box<dyn FrameReader>>;
}

/// Frame readers keyed by the camera-state kind they belong to
#[derive(Default)]
pub struct FrameSet {
    readers: IndexMap<MessageKind, Box<dyn FrameReader>>,
}

impl FrameSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `streams` of `segment` from `source`
    ///
    /// # Errors
    ///
    /// Returns the first failure to open a stream
    pub fn open(
        source: &dyn FrameSource,
        segment: &SegmentRef,
        streams: &[CameraStream],
        readahead: bool,
    ) -> CoreResult<Self> {
        let mut set = Self::new();
        for &stream in streams {
            let reader = source.open(segment, stream, readahead)?;
            tracing::debug!(
                stream = stream.log_type(),
                frames = reader.frame_count(),
                "opened frame stream"
            );
            set.insert(stream.state_kind(), reader);
        }
        Ok(set)
    }

    /// Add a reader under `kind`
    pub fn insert(&mut self, kind: impl Into<MessageKind>, reader: Box<dyn FrameReader>) {
        self.readers.insert(kind.into(), reader);
    }

    /// Reader for `kind`
    #[must_use]
    pub fn get(&self, kind: &str) -> Option<&dyn FrameReader> {
        self.readers.get(kind).map(|r| r.as_ref())
    }

    /// Iterate kinds and readers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&MessageKind, &dyn FrameReader)> {
        self.readers.iter().map(|(k, r)| (k, r.as_ref()))
    }

    /// Number of streams
    #[must_use]
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    /// Whether no streams are open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

impl std::fmt::Debug for FrameSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.readers.iter().map(|(k, r)| (k, r.frame_count())))
            .finish()
    }
}

/// Frames held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryFrameReader {
    frames: Vec<Bytes>,
}

impl MemoryFrameReader {
    /// Wrap decoded frames
    #[must_use]
    pub fn new(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }
}

impl FrameReader for MemoryFrameReader {
    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn get(&self, index: usize) -> CoreResult<Bytes> {
        self.frames.get(index).cloned().ok_or_else(|| frame_not_found(index))
    }
}

fn frame_not_found(index: usize) -> CoreError {
    CoreError::NotFound {
        kind: "frame".to_string(),
        id: index.to_string(),
    }
}

/// Frames read from a length-prefixed container file
#[derive(Debug)]
pub struct FileFrameReader {
    path: PathBuf,
    /// Offset and length of each frame body
    index: Vec<(u64, usize)>,
    preloaded: Option<Vec<Bytes>>,
}

impl FileFrameReader {
    /// Index the container at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is truncated
    pub fn open(path: &Path, readahead: bool) -> CoreResult<Self> {
        let raw = std::fs::read(path).map_err(|e| CoreError::io(path.display().to_string(), &e))?;
        let data = Bytes::from(raw);
        let mut cursor = data.clone();
        let mut index = Vec::new();

        while cursor.has_remaining() {
            if cursor.remaining() < 4 {
                return Err(truncated(path));
            }
            let len = cursor.get_u32_le() as usize;
            if cursor.remaining() < len {
                return Err(truncated(path));
            }
            let offset = (data.len() - cursor.remaining()) as u64;
            index.push((offset, len));
            cursor.advance(len);
        }

        let preloaded = readahead.then(|| {
            index
                .iter()
                .map(|&(offset, len)| data.slice(offset as usize..offset as usize + len))
                .collect()
        });

        Ok(Self {
            path: path.to_path_buf(),
            index,
            preloaded,
        })
    }

    /// Write `frames` as a container at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn write(path: &Path, frames: &[Bytes]) -> CoreResult<()> {
        let mut out = Vec::new();
        for frame in frames {
            let len = u32::try_from(frame.len()).map_err(|_| CoreError::InvalidConfig {
                reason: format!("frame of {} bytes is too large", frame.len()),
            })?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(frame);
        }
        std::fs::write(path, out).map_err(|e| CoreError::io(path.display().to_string(), &e))
    }
}

fn truncated(path: &Path) -> CoreError {
    CoreError::Decode {
        reason: format!("truncated frame container {}", path.display()),
    }
}

impl FrameReader for FileFrameReader {
    fn frame_count(&self) -> usize {
        self.index.len()
    }

    fn get(&self, index: usize) -> CoreResult<Bytes> {
        if let Some(frames) = &self.preloaded {
            return frames.get(index).cloned().ok_or_else(|| frame_not_found(index));
        }

        let &(offset, len) = self.index.get(index).ok_or_else(|| frame_not_found(index))?;
        let io_err = |e: std::io::Error| CoreError::io(self.path.display().to_string(), &e);
        let mut file = File::open(&self.path).map_err(io_err)?;
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).map_err(io_err)?;
        Ok(Bytes::from(buf))
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Reads segments from a local mirror
#[derive(Debug, Clone)]
pub struct DirLogSource {
    root: PathBuf,
}

impl DirLogSource {
    /// Mirror rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LogSource for DirLogSource {
    fn load(&self, segment: &SegmentRef) -> CoreResult<LogSegment> {
        let path = segment.dir(&self.root).join(RLOG_FILE);
        let log = LogSegment::read_from(&path)?;
        tracing::info!(segment = %segment, messages = log.len(), "loaded segment");
        Ok(log)
    }
}

/// Reads frame containers from a local mirror
#[derive(Debug, Clone)]
pub struct DirFrameSource {
    root: PathBuf,
}

impl DirFrameSource {
    /// Mirror rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FrameSource for DirFrameSource {
    fn open(
        &self,
        segment: &SegmentRef,
        stream: CameraStream,
        readahead: bool,
    ) -> CoreResult<Box<dyn FrameReader>> {
        let path = segment
            .dir(&self.root)
            .join(format!("{}.frames", stream.log_type()));
        Ok(Box::new(FileFrameReader::open(&path, readahead)?))
    }
}
