//! Process definitions for replay.

use indexmap::{IndexMap, IndexSet};
use lockstep_core::{CoreError, CoreResult};
use lockstep_log::{CameraStream, MessageKind, kinds};
use serde::{Deserialize, Serialize};

/// How to run one process under replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Process name
    pub name: String,
    /// Program and arguments
    pub command: Vec<String>,
    /// Message kinds the process consumes
    pub inputs: IndexSet<MessageKind>,
    /// Message kinds the process emits
    pub outputs: IndexSet<MessageKind>,
    /// Camera streams the process decodes
    pub frame_streams: Vec<CameraStream>,
    /// Extra environment for the process
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl ProcessConfig {
    /// Create a process definition with no inputs or outputs
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            inputs: IndexSet::new(),
            outputs: IndexSet::new(),
            frame_streams: Vec::new(),
            env: IndexMap::new(),
        }
    }

    /// Set consumed kinds
    #[must_use]
    pub fn with_inputs<'a>(mut self, inputs: impl IntoIterator<Item = &'a str>) -> Self {
        self.inputs = inputs.into_iter().map(MessageKind::from).collect();
        self
    }

    /// Set emitted kinds
    #[must_use]
    pub fn with_outputs<'a>(mut self, outputs: impl IntoIterator<Item = &'a str>) -> Self {
        self.outputs = outputs.into_iter().map(MessageKind::from).collect();
        self
    }

    /// Set decoded camera streams
    #[must_use]
    pub fn with_frame_streams(mut self, streams: Vec<CameraStream>) -> Self {
        self.frame_streams = streams;
        self
    }

    /// Set one environment variable
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// The vision model
    #[must_use]
    pub fn modeld() -> Self {
        Self::new("modeld", vec!["./selfdrive/modeld/modeld".to_string()])
            .with_inputs([
                kinds::ROAD_CAMERA_STATE,
                kinds::WIDE_ROAD_CAMERA_STATE,
                kinds::LIVE_CALIBRATION,
                "lateralPlan",
                "driverMonitoringState",
                kinds::NAV_MODEL,
                kinds::NAV_INSTRUCTION,
            ])
            .with_outputs([kinds::MODEL_V2, "cameraOdometry"])
            .with_frame_streams(vec![CameraStream::Road, CameraStream::WideRoad])
    }
}

/// Name-keyed process definitions
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: IndexMap<String, ProcessConfig>,
}

impl ProcessRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in processes
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ProcessConfig::modeld());
        registry
    }

    /// Add or replace a definition
    pub fn register(&mut self, config: ProcessConfig) {
        self.processes.insert(config.name.clone(), config);
    }

    /// Look up a definition
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name
    pub fn get(&self, name: &str) -> CoreResult<&ProcessConfig> {
        self.processes.get(name).ok_or_else(|| CoreError::NotFound {
            kind: "process".to_string(),
            id: name.to_string(),
        })
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }
}
