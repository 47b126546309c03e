//! Route and segment addressing.

use lockstep_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default artifact store for CI routes
pub const DEFAULT_BASE_URL: &str = "https://commadataci.blob.core.windows.net/openpilotci/";

/// One segment of a recorded route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentRef {
    /// Route name, `<dongle>|<start time>`
    pub route: String,
    /// Segment index within the route
    pub segment: u32,
}

impl SegmentRef {
    /// Create a segment reference
    pub fn new(route: impl Into<String>, segment: u32) -> Self {
        Self {
            route: route.into(),
            segment,
        }
    }

    /// Route with `|` turned into a path separator
    #[must_use]
    pub fn route_path(&self) -> String {
        self.route.replace('|', "/")
    }

    /// Artifact URL for `log_type` (`rlog`, `fcamera`, ...)
    #[must_use]
    pub fn url(&self, base: &str, log_type: &str) -> String {
        let ext = if log_type.ends_with("camera") { "hevc" } else { "bz2" };
        format!(
            "{}{}/{}/{}.{}",
            base,
            self.route_path(),
            self.segment,
            log_type,
            ext
        )
    }

    /// Local directory holding this segment's artifacts under `root`
    #[must_use]
    pub fn dir(&self, root: &Path) -> PathBuf {
        root.join(self.route_path()).join(self.segment.to_string())
    }
}

impl std::fmt::Display for SegmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}--{}", self.route, self.segment)
    }
}

/// Parses the canonical `<route>--<segment>` form
impl FromStr for SegmentRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidConfig {
            reason: format!("not a segment name: {}", s),
        };
        let (route, segment) = s.rsplit_once("--").ok_or_else(invalid)?;
        if route.is_empty() || !route.contains('|') {
            return Err(invalid());
        }
        let segment = segment.parse().map_err(|_| invalid())?;
        Ok(Self::new(route, segment))
    }
}

/// Camera streams recorded alongside the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraStream {
    /// Road-facing camera
    Road,
    /// Driver-facing camera
    Driver,
    /// Wide road-facing camera
    WideRoad,
}

impl CameraStream {
    /// Every stream
    pub const ALL: [CameraStream; 3] = [Self::Road, Self::Driver, Self::WideRoad];

    /// Artifact name of the stream
    #[must_use]
    pub const fn log_type(self) -> &'static str {
        match self {
            Self::Road => "fcamera",
            Self::Driver => "dcamera",
            Self::WideRoad => "ecamera",
        }
    }

    /// Kind of the frame metadata messages for this stream
    #[must_use]
    pub const fn state_kind(self) -> &'static str {
        match self {
            Self::Road => crate::message::kinds::ROAD_CAMERA_STATE,
            Self::Driver => crate::message::kinds::DRIVER_CAMERA_STATE,
            Self::WideRoad => crate::message::kinds::WIDE_ROAD_CAMERA_STATE,
        }
    }
}
