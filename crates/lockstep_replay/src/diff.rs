//! Comparison of prediction records across runs.

use crate::extract::PredictionRecord;
use lockstep_core::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rendering of a value one record has and the other lacks
pub const MISSING: &str = "<missing>";

/// First point where two records disagree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Element index
    pub index: usize,
    /// Baseline value, `None` if the baseline is shorter
    pub previous: Option<Value>,
    /// Current value, `None` if the current record is shorter
    pub current: Option<Value>,
}

impl Mismatch {
    /// Whether the records differ only in length at this index
    #[must_use]
    pub fn is_length_mismatch(&self) -> bool {
        self.previous.is_none() || self.current.is_none()
    }

    /// Convert into the loop's fatal error
    #[must_use]
    pub fn into_error(self, iteration: u64) -> CoreError {
        CoreError::NonDeterministicOutput {
            iteration,
            index: self.index,
            previous: render(self.previous.as_ref()),
            current: render(self.current.as_ref()),
        }
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => MISSING.to_string(),
    }
}

/// Compare element-wise, then by length.
///
/// Returns `None` only if both records are identical.
#[must_use]
pub fn first_mismatch(previous: &PredictionRecord, current: &PredictionRecord) -> Option<Mismatch> {
    let differing = previous
        .values()
        .iter()
        .zip(current.values())
        .position(|(p, c)| p != c);

    if let Some(index) = differing {
        return Some(Mismatch {
            index,
            previous: previous.get(index).cloned(),
            current: current.get(index).cloned(),
        });
    }

    if previous.len() != current.len() {
        let index = previous.len().min(current.len());
        return Some(Mismatch {
            index,
            previous: previous.get(index).cloned(),
            current: current.get(index).cloned(),
        });
    }

    None
}
