//! lockstep Log
//!
//! Recorded messages, segment and frame sources, and selection of the
//! message subset a determinism replay runs on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod message;
pub mod route;
pub mod segment;
pub mod source;
pub mod subset;

pub use message::{LogMessage, MessageBuilder, MessageKind, kinds};
pub use route::{CameraStream, DEFAULT_BASE_URL, SegmentRef};
pub use segment::LogSegment;
pub use source::{
    DirFrameSource, DirLogSource, FileFrameReader, FrameReader, FrameSet, FrameSource,
    LogSource, MemoryFrameReader,
};
pub use subset::{
    CycleCounters, NavInclusion, Subset, SubsetConfig, SubsetFill, TrimmedLog, build_subset,
    synthesize_calibration, trim_to_max_frames,
};
