//! End-to-end determinism harness.
//!
//! Ties subset selection, frame opening and the determinism loop together
//! for one registered process.

use crate::config::HarnessConfig;
use crate::determinism::{DeterminismLoop, LoopOutcome, StopToken};
use crate::engine::ReplayEngine;
use crate::extract::FieldExtractor;
use crate::process::{ProcessConfig, ProcessRegistry};
use lockstep_core::CoreResult;
use lockstep_log::{
    FrameSet, FrameSource, LogMessage, LogSegment, Subset, SubsetConfig, build_subset,
};

/// Build the subset for `segment` and replay it through `process` once
///
/// # Errors
///
/// Returns subset construction or engine failures
pub fn model_replay<E: ReplayEngine + ?Sized>(
    segment: &LogSegment,
    frames: &FrameSet,
    engine: &mut E,
    process: &ProcessConfig,
    subset_config: &SubsetConfig,
) -> CoreResult<Vec<LogMessage>> {
    let subset = build_subset(segment, subset_config)?;
    engine.replay(process, subset.messages(), frames)
}

/// Configured harness for one process
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
    process: ProcessConfig,
    extractor: FieldExtractor,
}

impl Harness {
    /// Resolve the configured process and output field
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown process or `InvalidConfig`
    pub fn new(config: HarnessConfig, registry: &ProcessRegistry) -> CoreResult<Self> {
        let process = config.prepare_process(registry.get(&config.process)?);
        let extractor = config.extractor()?;
        config.subset_config().validate()?;
        Ok(Self {
            config,
            process,
            extractor,
        })
    }

    /// Harness configuration
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Process as it will be replayed, harness flags included
    #[must_use]
    pub fn process(&self) -> &ProcessConfig {
        &self.process
    }

    /// Build the subset, rejecting an underfilled one unless allowed
    ///
    /// # Errors
    ///
    /// Returns subset construction errors or `UnderfilledSubset`
    pub fn prepare(&self, segment: &LogSegment) -> CoreResult<Subset> {
        let subset = build_subset(segment, &self.config.subset_config())?;
        if let Err(err) = subset.ensure_filled() {
            if !self.config.allow_underfilled {
                return Err(err);
            }
            tracing::warn!(error = %err, "replaying underfilled subset");
        }
        Ok(subset)
    }

    /// Open the configured camera streams of the configured segment
    ///
    /// # Errors
    ///
    /// Returns the first stream that fails to open
    pub fn open_frames(&self, source: &dyn FrameSource) -> CoreResult<FrameSet> {
        FrameSet::open(
            source,
            &self.config.segment,
            &self.config.streams,
            self.config.readahead,
        )
    }

    /// Prepare the subset once, then loop replays over it
    ///
    /// # Errors
    ///
    /// Returns preparation errors, engine failures or the first mismatch
    pub fn run<E: ReplayEngine + ?Sized>(
        &self,
        segment: &LogSegment,
        frames: &FrameSet,
        engine: &mut E,
        token: StopToken,
    ) -> CoreResult<LoopOutcome> {
        let subset = self.prepare(segment)?;
        tracing::info!(
            process = %self.process.name,
            segment = %self.config.segment,
            messages = subset.len(),
            field = %self.extractor,
            "starting determinism loop"
        );

        DeterminismLoop::new(&self.process, self.extractor.clone())
            .with_config(self.config.looping.clone())
            .with_stop_token(token)
            .run(subset.messages(), frames, engine)
    }
}
