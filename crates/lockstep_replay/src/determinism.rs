//! Replay-determinism loop.
//!
//! Replays the same frozen input over and over and compares each run's
//! extracted record with the previous one. The first difference is fatal;
//! nothing is retried. With no iteration bound the loop only ends on a
//! mismatch, an error or a stop request.

use crate::diff::first_mismatch;
use crate::engine::ReplayEngine;
use crate::extract::{FieldExtractor, PredictionRecord};
use crate::process::ProcessConfig;
use lockstep_core::{CoreError, CoreResult};
use lockstep_log::{FrameSet, LogMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag asking the loop to stop before its next iteration
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Token that has not been triggered
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Loop configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Stop cleanly after this many replays (`None` = run forever)
    pub max_iterations: Option<u64>,
    /// Fail if a replay yields fewer extracted values than this
    pub min_outputs: Option<usize>,
}

impl LoopConfig {
    /// Run forever
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the number of replays
    #[must_use]
    pub fn with_max_iterations(mut self, max: u64) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Require at least `min` extracted values per replay
    #[must_use]
    pub fn with_min_outputs(mut self, min: usize) -> Self {
        self.min_outputs = Some(min);
        self
    }
}

/// Why a loop ended without a mismatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// `max_iterations` reached
    IterationLimit,
    /// Stop token triggered
    Cancelled,
}

/// Result of a loop that ended without a mismatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    /// Replays completed
    pub iterations: u64,
    /// Why the loop ended
    pub stop_reason: StopReason,
    /// Last extracted record, if any replay ran
    pub baseline: Option<PredictionRecord>,
}

/// Repeated replay-and-compare over a fixed input
pub struct DeterminismLoop<'a> {
    process: &'a ProcessConfig,
    extractor: FieldExtractor,
    config: LoopConfig,
    token: StopToken,
}

impl<'a> DeterminismLoop<'a> {
    /// Loop over `process`, comparing the field `extractor` selects
    #[must_use]
    pub fn new(process: &'a ProcessConfig, extractor: FieldExtractor) -> Self {
        Self {
            process,
            extractor,
            config: LoopConfig::default(),
            token: StopToken::new(),
        }
    }

    /// Set loop configuration
    #[must_use]
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an externally controlled stop token
    #[must_use]
    pub fn with_stop_token(mut self, token: StopToken) -> Self {
        self.token = token;
        self
    }

    /// Handle for stopping the loop from elsewhere
    #[must_use]
    pub fn stop_token(&self) -> StopToken {
        self.token.clone()
    }

    /// Run until a mismatch, an error, a stop request or the iteration bound
    ///
    /// # Errors
    ///
    /// Returns `NonDeterministicOutput` on the first differing run, and
    /// passes engine failures through untouched
    pub fn run<E: ReplayEngine + ?Sized>(
        &self,
        messages: &[LogMessage],
        frames: &FrameSet,
        engine: &mut E,
    ) -> CoreResult<LoopOutcome> {
        self.run_with_callback(messages, frames, engine, |_, _| {})
    }

    /// Like [`run`](Self::run), calling `callback` after every replay that
    /// matched its predecessor
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run)
    pub fn run_with_callback<E, F>(
        &self,
        messages: &[LogMessage],
        frames: &FrameSet,
        engine: &mut E,
        mut callback: F,
    ) -> CoreResult<LoopOutcome>
    where
        E: ReplayEngine + ?Sized,
        F: FnMut(u64, &PredictionRecord),
    {
        let mut baseline: Option<PredictionRecord> = None;
        let mut iteration: u64 = 0;

        loop {
            if self.token.is_stopped() {
                tracing::info!(iterations = iteration, "determinism loop cancelled");
                return Ok(LoopOutcome {
                    iterations: iteration,
                    stop_reason: StopReason::Cancelled,
                    baseline,
                });
            }
            if self.config.max_iterations.is_some_and(|max| iteration >= max) {
                tracing::info!(iterations = iteration, "determinism loop reached iteration limit");
                return Ok(LoopOutcome {
                    iterations: iteration,
                    stop_reason: StopReason::IterationLimit,
                    baseline,
                });
            }

            iteration += 1;
            let output = engine.replay(self.process, messages, frames)?;
            let record = self.extractor.extract(&output);
            tracing::info!(
                iteration,
                outputs = output.len(),
                values = record.len(),
                "replay finished"
            );

            if let Some(min) = self.config.min_outputs {
                if record.len() < min {
                    return Err(CoreError::UnderfilledSubset {
                        kind: self.extractor.kind.to_string(),
                        reached: record.len(),
                        required: min,
                    });
                }
            }

            if let Some(previous) = &baseline {
                if let Some(mismatch) = first_mismatch(previous, &record) {
                    tracing::error!(
                        iteration,
                        index = mismatch.index,
                        field = %self.extractor,
                        "non-deterministic output"
                    );
                    return Err(mismatch.into_error(iteration));
                }
            }

            callback(iteration, &record);
            baseline = Some(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::MonoTime;
    use lockstep_log::kinds;
    use serde_json::{Value, json};

    fn input() -> Vec<LogMessage> {
        vec![
            LogMessage::new(MonoTime::from_nanos(0), kinds::LIVE_CALIBRATION, json!({})),
            LogMessage::new(MonoTime::from_nanos(1), kinds::ROAD_CAMERA_STATE, json!({"frameId": 0})),
            LogMessage::new(MonoTime::from_nanos(2), kinds::WIDE_ROAD_CAMERA_STATE, json!({"frameId": 0})),
        ]
    }

    fn model(raw: Value) -> LogMessage {
        LogMessage::new(MonoTime::zero(), kinds::MODEL_V2, json!({ "rawPredictions": raw }))
    }

    /// One modelV2 per camera message, predictions derived from the input only
    fn deterministic(
        _: &ProcessConfig,
        msgs: &[LogMessage],
        _: &FrameSet,
    ) -> CoreResult<Vec<LogMessage>> {
        Ok(msgs
            .iter()
            .filter(|m| m.is(kinds::ROAD_CAMERA_STATE) || m.is(kinds::WIDE_ROAD_CAMERA_STATE))
            .map(|m| model(json!(m.log_mono_time().as_nanos() * 10)))
            .collect())
    }

    fn bounded(process: &ProcessConfig, n: u64) -> DeterminismLoop<'_> {
        DeterminismLoop::new(process, FieldExtractor::raw_predictions())
            .with_config(LoopConfig::new().with_max_iterations(n))
    }

    #[test]
    fn test_deterministic_engine_survives_bound() {
        let process = ProcessConfig::modeld();
        let mut engine = deterministic;
        let outcome = bounded(&process, 25).run(&input(), &FrameSet::new(), &mut engine).unwrap();
        assert_eq!(outcome.iterations, 25);
        assert_eq!(outcome.stop_reason, StopReason::IterationLimit);
        assert_eq!(outcome.baseline.unwrap().values(), &[json!(10), json!(20)]);
    }

    #[test]
    fn test_engine_sees_identical_input_every_time() {
        let process = ProcessConfig::modeld();
        let mut seen: Vec<Vec<LogMessage>> = Vec::new();
        let mut engine = |p: &ProcessConfig, msgs: &[LogMessage], f: &FrameSet| {
            seen.push(msgs.to_vec());
            deterministic(p, msgs, f)
        };
        bounded(&process, 5).run(&input(), &FrameSet::new(), &mut engine).unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen.iter().all(|s| s == &input()));
    }

    #[test]
    fn test_nondeterministic_engine_is_caught() {
        let process = ProcessConfig::modeld();
        let mut call = 0u64;
        // third value drifts on the fourth run
        let mut engine = |_: &ProcessConfig, _: &[LogMessage], _: &FrameSet| {
            call += 1;
            let drift = if call >= 4 { 1 } else { 0 };
            Ok::<_, CoreError>(vec![
                model(json!(1)),
                model(json!(2)),
                model(json!(3 + drift)),
                model(json!(4)),
            ])
        };
        let result = DeterminismLoop::new(&process, FieldExtractor::raw_predictions())
            .run(&input(), &FrameSet::new(), &mut engine);

        assert_eq!(
            result.unwrap_err(),
            CoreError::NonDeterministicOutput {
                iteration: 4,
                index: 2,
                previous: "3".to_string(),
                current: "4".to_string(),
            }
        );
    }

    #[test]
    fn test_length_change_is_a_mismatch() {
        let process = ProcessConfig::modeld();
        let mut call = 0usize;
        let mut engine = |_: &ProcessConfig, _: &[LogMessage], _: &FrameSet| {
            call += 1;
            Ok::<_, CoreError>((0..call.min(2)).map(|i| model(json!(i))).collect())
        };
        let err = bounded(&process, 10)
            .run(&input(), &FrameSet::new(), &mut engine)
            .unwrap_err();
        match err {
            CoreError::NonDeterministicOutput { iteration, index, previous, current } => {
                assert_eq!(iteration, 2);
                assert_eq!(index, 1);
                assert_eq!(previous, crate::diff::MISSING);
                assert_eq!(current, "1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_engine_error_propagates_without_retry() {
        let process = ProcessConfig::modeld();
        let mut calls = 0;
        let mut engine = |p: &ProcessConfig, _: &[LogMessage], _: &FrameSet| {
            calls += 1;
            Err::<Vec<LogMessage>, _>(CoreError::Replay {
                process: p.name.clone(),
                reason: "crashed".to_string(),
            })
        };
        let err = bounded(&process, 10)
            .run(&input(), &FrameSet::new(), &mut engine)
            .unwrap_err();
        assert!(matches!(err, CoreError::Replay { .. }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_stop_token_ends_loop_between_iterations() {
        let process = ProcessConfig::modeld();
        let looper = DeterminismLoop::new(&process, FieldExtractor::raw_predictions());
        let token = looper.stop_token();
        let mut engine = deterministic;

        let outcome = looper
            .run_with_callback(&input(), &FrameSet::new(), &mut engine, |iteration, _| {
                if iteration == 3 {
                    token.stop();
                }
            })
            .unwrap();
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
    }

    #[test]
    fn test_pre_stopped_token_runs_nothing() {
        let process = ProcessConfig::modeld();
        let token = StopToken::new();
        token.stop();
        let mut engine = |_: &ProcessConfig, _: &[LogMessage], _: &FrameSet| -> CoreResult<Vec<LogMessage>> {
            panic!("engine must not run")
        };
        let outcome = DeterminismLoop::new(&process, FieldExtractor::raw_predictions())
            .with_stop_token(token)
            .run(&input(), &FrameSet::new(), &mut engine)
            .unwrap();
        assert_eq!(outcome.iterations, 0);
        assert!(outcome.baseline.is_none());
    }

    #[test]
    fn test_min_outputs_flags_short_run() {
        let process = ProcessConfig::modeld();
        let mut engine = deterministic;
        let err = DeterminismLoop::new(&process, FieldExtractor::raw_predictions())
            .with_config(LoopConfig::new().with_min_outputs(5))
            .run(&input(), &FrameSet::new(), &mut engine)
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::UnderfilledSubset {
                kind: "modelV2".to_string(),
                reached: 2,
                required: 5,
            }
        );
    }

    #[test]
    fn test_dyn_engine() {
        let process = ProcessConfig::modeld();
        let mut boxed: Box<dyn ReplayEngine> = Box::new(deterministic);
        let outcome = bounded(&process, 2)
            .run(&input(), &FrameSet::new(), boxed.as_mut())
            .unwrap();
        assert_eq!(outcome.iterations, 2);
    }
}
