//! Harness configuration.
//!
//! Defaults reproduce the model-replay fuzz setup: five frame pairs from a
//! fixed CI segment, compared on the model's raw predictions.

use crate::determinism::LoopConfig;
use crate::extract::FieldExtractor;
use crate::process::ProcessConfig;
use indexmap::IndexSet;
use lockstep_core::{CoreError, CoreResult};
use lockstep_log::{CameraStream, MessageKind, NavInclusion, SegmentRef, SubsetConfig, kinds};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// CI route the harness replays by default
pub const TEST_ROUTE: &str = "2f4452b03ccb98f0|2022-12-03--13-45-30";
/// Segment of [`TEST_ROUTE`] replayed by default
pub const SEGMENT: u32 = 6;
/// Frame pairs per replay
pub const MAX_FRAMES: usize = 5;
/// Navigation messages kept per kind
pub const NAV_FRAMES: usize = 50;

/// Disables navigation-message inclusion when set
pub const NO_NAV_VAR: &str = "NO_NAV";
/// Makes the model publish its raw output buffer
pub const SEND_RAW_PRED_VAR: &str = "SEND_RAW_PRED";

/// Flags read from the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessEnv {
    /// `NO_NAV` is present
    pub no_nav: bool,
    /// Raw predictions requested from the process
    pub send_raw_pred: bool,
}

impl Default for HarnessEnv {
    fn default() -> Self {
        Self {
            no_nav: false,
            send_raw_pred: true,
        }
    }
}

impl HarnessEnv {
    /// Read flags from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read flags through `lookup`.
    ///
    /// `NO_NAV` counts when present with any value. Raw predictions are on
    /// unless `SEND_RAW_PRED` is explicitly `0`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            no_nav: lookup(NO_NAV_VAR).is_some(),
            send_raw_pred: lookup(SEND_RAW_PRED_VAR).as_deref() != Some("0"),
        }
    }
}

/// Everything the harness needs to set up a determinism run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Segment to replay
    pub segment: SegmentRef,
    /// Registered process name
    pub process: String,
    /// Frame pairs per replay
    pub max_frames: usize,
    /// Kinds counted in lockstep
    pub pairing_types: IndexSet<MessageKind>,
    /// Kinds included in full
    pub passthrough_types: IndexSet<MessageKind>,
    /// Kind of the synthesized initial message
    pub calibration_type: MessageKind,
    /// Carry navigation messages
    pub nav_enabled: bool,
    /// Navigation messages kept per kind
    pub nav_frames: usize,
    /// Request raw predictions from the process
    pub send_raw_pred: bool,
    /// Camera streams to open
    pub streams: Vec<CameraStream>,
    /// Load all frames when opening a stream
    pub readahead: bool,
    /// Compared output field, `kind.field`
    pub output_field: String,
    /// Replay an underfilled subset instead of failing
    pub allow_underfilled: bool,
    /// Loop bounds
    pub looping: LoopConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            segment: SegmentRef::new(TEST_ROUTE, SEGMENT),
            process: "modeld".to_string(),
            max_frames: MAX_FRAMES,
            pairing_types: [kinds::ROAD_CAMERA_STATE, kinds::WIDE_ROAD_CAMERA_STATE]
                .into_iter()
                .map(MessageKind::from)
                .collect(),
            passthrough_types: [kinds::ROAD_ENCODE_IDX, kinds::WIDE_ROAD_ENCODE_IDX]
                .into_iter()
                .map(MessageKind::from)
                .collect(),
            calibration_type: MessageKind::from(kinds::LIVE_CALIBRATION),
            nav_enabled: true,
            nav_frames: NAV_FRAMES,
            send_raw_pred: true,
            streams: CameraStream::ALL.to_vec(),
            readahead: true,
            output_field: "modelV2.rawPredictions".to_string(),
            allow_underfilled: false,
            looping: LoopConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Load from a JSON file; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::io(path.display().to_string(), &e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Apply environment flags
    #[must_use]
    pub fn with_env(mut self, env: HarnessEnv) -> Self {
        if env.no_nav {
            self.nav_enabled = false;
        }
        self.send_raw_pred = self.send_raw_pred && env.send_raw_pred;
        self
    }

    /// Subset selection parameters
    #[must_use]
    pub fn subset_config(&self) -> SubsetConfig {
        let mut config = SubsetConfig::new(self.max_frames, self.pairing_types.iter().cloned())
            .with_passthrough(self.passthrough_types.iter().cloned())
            .with_calibration(self.calibration_type.clone());
        if self.nav_enabled {
            config = config.with_nav(NavInclusion::new(self.nav_frames));
        }
        config
    }

    /// Parsed output field
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a malformed field path
    pub fn extractor(&self) -> CoreResult<FieldExtractor> {
        self.output_field.parse()
    }

    /// `process` with the harness flags in its environment
    #[must_use]
    pub fn prepare_process(&self, process: &ProcessConfig) -> ProcessConfig {
        let mut process = process.clone();
        if self.send_raw_pred {
            process.env.insert(SEND_RAW_PRED_VAR.to_string(), "1".to_string());
        }
        process
    }
}
