//! Recorded log messages.
//!
//! A message is read-only once it leaves the log reader. Derived messages
//! go through [`MessageBuilder`], which owns a full copy of the original.

use lockstep_core::MonoTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;

/// Well-known message kinds
pub mod kinds {
    /// Road-facing camera frame metadata
    pub const ROAD_CAMERA_STATE: &str = "roadCameraState";
    /// Wide road-facing camera frame metadata
    pub const WIDE_ROAD_CAMERA_STATE: &str = "wideRoadCameraState";
    /// Driver-facing camera frame metadata
    pub const DRIVER_CAMERA_STATE: &str = "driverCameraState";
    /// Encoder index for the road stream
    pub const ROAD_ENCODE_IDX: &str = "roadEncodeIdx";
    /// Encoder index for the wide road stream
    pub const WIDE_ROAD_ENCODE_IDX: &str = "wideRoadEncodeIdx";
    /// Camera calibration
    pub const LIVE_CALIBRATION: &str = "liveCalibration";
    /// Model output
    pub const MODEL_V2: &str = "modelV2";
    /// Navigation model output
    pub const NAV_MODEL: &str = "navModel";
    /// Navigation instruction
    pub const NAV_INSTRUCTION: &str = "navInstruction";
}

/// Discriminant of a message's payload variant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageKind(String);

impl MessageKind {
    /// Create a kind from its tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Tag as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MessageKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageKind {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for MessageKind {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single recorded message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(rename = "logMonoTime")]
    log_mono_time: MonoTime,
    which: MessageKind,
    #[serde(default)]
    payload: Value,
}

impl LogMessage {
    /// Create a message
    pub fn new(log_mono_time: MonoTime, which: impl Into<MessageKind>, payload: Value) -> Self {
        Self {
            log_mono_time,
            which: which.into(),
            payload,
        }
    }

    /// Monotonic time the message was published at
    #[must_use]
    pub const fn log_mono_time(&self) -> MonoTime {
        self.log_mono_time
    }

    /// Payload variant
    #[must_use]
    pub fn which(&self) -> &MessageKind {
        &self.which
    }

    /// Whether the payload variant is `kind`
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.which.as_str() == kind
    }

    /// Payload body
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Look up a nested payload field by path
    #[must_use]
    pub fn field<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.payload, |value, key| value.get(key.as_ref()))
    }

    /// Copy into a mutable builder
    #[must_use]
    pub fn as_builder(&self) -> MessageBuilder {
        MessageBuilder {
            log_mono_time: self.log_mono_time,
            which: self.which.clone(),
            payload: self.payload.clone(),
        }
    }
}

/// Owned, mutable copy of a message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageBuilder {
    log_mono_time: MonoTime,
    which: MessageKind,
    payload: Value,
}

impl MessageBuilder {
    /// Overwrite the timestamp
    #[must_use]
    pub fn with_log_mono_time(mut self, time: MonoTime) -> Self {
        self.log_mono_time = time;
        self
    }

    /// Overwrite the timestamp in place
    pub fn set_log_mono_time(&mut self, time: MonoTime) {
        self.log_mono_time = time;
    }

    /// Mutable access to the payload
    pub fn payload_mut(&mut self) -> &mut Value {
        &mut self.payload
    }

    /// Freeze into an immutable message
    #[must_use]
    pub fn build(self) -> LogMessage {
        LogMessage {
            log_mono_time: self.log_mono_time,
            which: self.which,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calibration() -> LogMessage {
        LogMessage::new(
            MonoTime::from_nanos(500),
            kinds::LIVE_CALIBRATION,
            json!({"rpyCalib": [0.0, 0.01, -0.02], "calStatus": 1}),
        )
    }

    #[test]
    fn test_message_accessors() {
        let msg = calibration();
        assert_eq!(msg.log_mono_time(), MonoTime::from_nanos(500));
        assert_eq!(msg.which().as_str(), "liveCalibration");
        assert!(msg.is(kinds::LIVE_CALIBRATION));
        assert!(!msg.is(kinds::MODEL_V2));
    }

    #[test]
    fn test_field_path() {
        let msg = LogMessage::new(
            MonoTime::zero(),
            kinds::MODEL_V2,
            json!({"rawPredictions": "AAEC", "meta": {"engagedProb": 0.5}}),
        );
        assert_eq!(msg.field(&["rawPredictions"]), Some(&json!("AAEC")));
        assert_eq!(msg.field(&["meta", "engagedProb"]), Some(&json!(0.5)));
        assert_eq!(msg.field(&["meta", "missing"]), None);
        assert_eq!(msg.field::<&str>(&[]), Some(msg.payload()));
    }

    #[test]
    fn test_builder_does_not_alias_original() {
        let original = calibration();
        let mut builder = original.as_builder();
        builder.set_log_mono_time(MonoTime::from_nanos(1));
        builder.payload_mut()["calStatus"] = json!(0);
        let derived = builder.build();

        assert_eq!(derived.log_mono_time(), MonoTime::from_nanos(1));
        assert_eq!(derived.field(&["calStatus"]), Some(&json!(0)));
        assert_eq!(original.log_mono_time(), MonoTime::from_nanos(500));
        assert_eq!(original.field(&["calStatus"]), Some(&json!(1)));
    }

    #[test]
    fn test_message_json_shape() {
        let msg = calibration();
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains("\"logMonoTime\":500"));
        assert!(text.contains("\"which\":\"liveCalibration\""));
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let msg: LogMessage =
            serde_json::from_str(r#"{"logMonoTime": 3, "which": "roadEncodeIdx"}"#).unwrap();
        assert_eq!(msg.payload(), &Value::Null);
    }
}
