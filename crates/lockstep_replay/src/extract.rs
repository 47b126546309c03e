//! Output field extraction.

use lockstep_core::CoreError;
use lockstep_log::{LogMessage, MessageKind, kinds};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Values of one output field across a replay, in emission order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionRecord {
    values: Vec<Value>,
}

impl PredictionRecord {
    /// Wrap extracted values
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Extracted values
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of values
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was extracted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}

/// Picks one payload field out of every message of one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldExtractor {
    /// Output kind
    pub kind: MessageKind,
    /// Field path inside the payload
    pub path: Vec<String>,
}

impl FieldExtractor {
    /// Extract `path` from messages of `kind`
    pub fn new<S: Into<String>>(
        kind: impl Into<MessageKind>,
        path: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            kind: kind.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }

    /// Raw model outputs
    #[must_use]
    pub fn raw_predictions() -> Self {
        Self::new(kinds::MODEL_V2, ["rawPredictions"])
    }

    /// Extract from `output`; a message missing the field contributes `null`
    #[must_use]
    pub fn extract(&self, output: &[LogMessage]) -> PredictionRecord {
        PredictionRecord::new(
            output
                .iter()
                .filter(|m| m.which() == &self.kind)
                .map(|m| m.field(self.path.as_slice()).cloned().unwrap_or(Value::Null))
                .collect(),
        )
    }
}

impl std::fmt::Display for FieldExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        for key in &self.path {
            write!(f, ".{}", key)?;
        }
        Ok(())
    }
}

/// Parses `<kind>.<field>[.<field>...]`
impl FromStr for FieldExtractor {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let kind = parts.next().filter(|k| !k.is_empty());
        let path: Vec<&str> = parts.collect();
        match kind {
            Some(kind) if !path.is_empty() && path.iter().all(|p| !p.is_empty()) => {
                Ok(Self::new(kind, path))
            }
            _ => Err(CoreError::InvalidConfig {
                reason: format!("output field must look like kind.field, got {:?}", s),
            }),
        }
    }
}
