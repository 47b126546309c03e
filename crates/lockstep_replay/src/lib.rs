//! lockstep Replay
//!
//! Replays a frozen message subset through a process again and again and
//! fails on the first run whose extracted output differs from its
//! predecessor.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod determinism;
pub mod diff;
pub mod engine;
pub mod extract;
pub mod harness;
pub mod process;

pub use config::{HarnessConfig, HarnessEnv, MAX_FRAMES, NAV_FRAMES, SEGMENT, TEST_ROUTE};
pub use determinism::{DeterminismLoop, LoopConfig, LoopOutcome, StopReason, StopToken};
pub use diff::{Mismatch, first_mismatch};
pub use engine::{ReplayEngine, SubprocessEngine};
pub use extract::{FieldExtractor, PredictionRecord};
pub use harness::{Harness, model_replay};
pub use process::{ProcessConfig, ProcessRegistry};
