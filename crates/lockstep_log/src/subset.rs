//! Replay subset selection.
//!
//! Cuts a recorded segment down to the shortest time-ordered prefix that
//! drives the process under test through a fixed number of cycles. A cycle
//! is one occurrence of every pairing kind (the synchronized camera
//! streams). Passthrough kinds are appended whole, and a calibration
//! message stamped with the segment's first timestamp is prepended so it is
//! delivered before anything else.
//!
//! Layout of a built subset:
//!
//! ```text
//! [calibration] [time-ordered scan ...] [passthrough ...] [navigation ...]
//! ```

use crate::message::{LogMessage, MessageKind, kinds};
use crate::segment::LogSegment;
use indexmap::{IndexMap, IndexSet};
use lockstep_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Navigation messages to carry along with the subset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavInclusion {
    /// Navigation kinds
    pub types: IndexSet<MessageKind>,
    /// Messages kept per kind, earliest in reader order first
    pub max_per_type: usize,
}

impl NavInclusion {
    /// Default navigation kinds with the given per-kind cap
    #[must_use]
    pub fn new(max_per_type: usize) -> Self {
        Self {
            types: [kinds::NAV_MODEL, kinds::NAV_INSTRUCTION]
                .into_iter()
                .map(MessageKind::from)
                .collect(),
            max_per_type,
        }
    }
}

/// Subset selection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetConfig {
    /// Processing cycles to exercise
    pub max_frames: usize,
    /// Kinds counted in lockstep
    pub pairing_types: IndexSet<MessageKind>,
    /// Kinds included in full regardless of the cutoff
    pub passthrough_types: IndexSet<MessageKind>,
    /// Kind of the synthesized initial message
    pub calibration_type: MessageKind,
    /// Optional navigation inclusion
    pub nav: Option<NavInclusion>,
}

impl SubsetConfig {
    /// Create a config with the given cycle count and pairing kinds
    pub fn new<K, I>(max_frames: usize, pairing_types: I) -> Self
    where
        K: Into<MessageKind>,
        I: IntoIterator<Item = K>,
    {
        Self {
            max_frames,
            pairing_types: pairing_types.into_iter().map(Into::into).collect(),
            passthrough_types: IndexSet::new(),
            calibration_type: MessageKind::from(kinds::LIVE_CALIBRATION),
            nav: None,
        }
    }

    /// Set passthrough kinds
    #[must_use]
    pub fn with_passthrough<K, I>(mut self, passthrough_types: I) -> Self
    where
        K: Into<MessageKind>,
        I: IntoIterator<Item = K>,
    {
        self.passthrough_types = passthrough_types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the calibration kind
    #[must_use]
    pub fn with_calibration(mut self, kind: impl Into<MessageKind>) -> Self {
        self.calibration_type = kind.into();
        self
    }

    /// Carry navigation messages
    #[must_use]
    pub fn with_nav(mut self, nav: NavInclusion) -> Self {
        self.nav = Some(nav);
        self
    }

    /// Check the parameters are usable
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on a zero cycle count or no pairing kinds
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_frames == 0 {
            return Err(CoreError::InvalidConfig {
                reason: "max_frames must be positive".to_string(),
            });
        }
        if self.pairing_types.is_empty() {
            return Err(CoreError::InvalidConfig {
                reason: "at least one pairing type is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-kind counters for the pairing kinds
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CycleCounters {
    counts: IndexMap<MessageKind, usize>,
}

impl CycleCounters {
    /// Zeroed counters for `kinds`
    pub fn new<I: IntoIterator<Item = MessageKind>>(kinds: I) -> Self {
        Self {
            counts: kinds.into_iter().map(|k| (k, 0)).collect(),
        }
    }

    /// Count `kind` if tracked; returns whether it was
    pub fn record(&mut self, kind: &MessageKind) -> bool {
        match self.counts.get_mut(kind) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Current count for `kind`
    #[must_use]
    pub fn get(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    /// Whether every tracked kind sits exactly at `target`
    #[must_use]
    pub fn all_at(&self, target: usize) -> bool {
        self.counts.values().all(|&c| c == target)
    }

    /// Iterate kinds and counts in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&MessageKind, usize)> {
        self.counts.iter().map(|(k, &c)| (k, c))
    }
}

/// Output of the time-ordered scan plus passthrough messages
#[derive(Debug, Clone, PartialEq)]
pub struct TrimmedLog {
    /// Scanned messages followed by passthrough messages
    pub messages: Vec<LogMessage>,
    /// How many leading messages came from the scan
    pub scanned: usize,
    /// Pairing counts when the scan stopped
    pub counters: CycleCounters,
}

/// Scan `segment` in time order until every pairing kind has been seen
/// exactly `max_frames` times, then append every passthrough message in
/// reader order.
///
/// Running out of messages first is not an error; the returned counters
/// tell the caller how far the scan got. A pairing kind that overshoots
/// before the others catch up keeps the condition false, so the scan then
/// runs to the end of the segment.
#[must_use]
pub fn trim_to_max_frames(
    segment: &LogSegment,
    max_frames: usize,
    pairing_types: &IndexSet<MessageKind>,
    passthrough_types: &IndexSet<MessageKind>,
) -> TrimmedLog {
    let mut counters = CycleCounters::new(pairing_types.iter().cloned());
    let mut messages = Vec::new();

    for msg in segment.sorted_by_time() {
        messages.push(msg.clone());
        counters.record(msg.which());

        if counters.all_at(max_frames) {
            break;
        }
    }

    let scanned = messages.len();
    if !passthrough_types.is_empty() {
        messages.extend(
            segment
                .messages()
                .iter()
                .filter(|m| passthrough_types.contains(m.which()))
                .cloned(),
        );
    }

    TrimmedLog {
        messages,
        scanned,
        counters,
    }
}

/// Copy of the first `calibration_type` message in reader order, restamped
/// with the time of the segment's first message in reader order.
///
/// # Errors
///
/// Returns `EmptySegment` or `MissingRequiredMessage`
pub fn synthesize_calibration(
    segment: &LogSegment,
    calibration_type: &MessageKind,
) -> CoreResult<LogMessage> {
    let anchor = segment.first().ok_or(CoreError::EmptySegment)?;
    let calibration = segment
        .first_of(calibration_type.as_str())
        .ok_or_else(|| CoreError::MissingRequiredMessage {
            kind: calibration_type.to_string(),
        })?;

    Ok(calibration
        .as_builder()
        .with_log_mono_time(anchor.log_mono_time())
        .build())
}

/// How far the scan got towards the configured cycle count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetFill {
    /// Configured cycle count
    pub required: usize,
    /// Count reached per pairing kind
    pub reached: IndexMap<MessageKind, usize>,
}

impl SubsetFill {
    fn from_counters(required: usize, counters: &CycleCounters) -> Self {
        Self {
            required,
            reached: counters.iter().map(|(k, c)| (k.clone(), c)).collect(),
        }
    }

    /// Whether every pairing kind hit the cycle count exactly
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.reached.values().all(|&c| c == self.required)
    }

    /// First pairing kind that missed the cycle count, with its count
    #[must_use]
    pub fn shortfall(&self) -> Option<(&MessageKind, usize)> {
        self.reached
            .iter()
            .find(|&(_, &c)| c != self.required)
            .map(|(k, &c)| (k, c))
    }

    /// Lowest count among the pairing kinds
    #[must_use]
    pub fn cycles(&self) -> usize {
        self.reached.values().copied().min().unwrap_or(0)
    }
}

/// A replay-ready message list
#[derive(Debug, Clone, PartialEq)]
pub struct Subset {
    messages: Vec<LogMessage>,
    scanned: usize,
    fill: SubsetFill,
}

impl Subset {
    /// All messages in delivery order
    #[must_use]
    pub fn messages(&self) -> &[LogMessage] {
        &self.messages
    }

    /// Consume into the message list
    #[must_use]
    pub fn into_messages(self) -> Vec<LogMessage> {
        self.messages
    }

    /// Total message count, including the synthesized calibration
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false for a built subset
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Synthesized calibration message
    #[must_use]
    pub fn calibration(&self) -> &LogMessage {
        &self.messages[0]
    }

    /// Time-ordered scan portion
    #[must_use]
    pub fn scanned(&self) -> &[LogMessage] {
        &self.messages[1..=self.scanned]
    }

    /// Passthrough and navigation messages appended after the scan
    #[must_use]
    pub fn appended(&self) -> &[LogMessage] {
        &self.messages[self.scanned + 1..]
    }

    /// Pairing fill report
    #[must_use]
    pub fn fill(&self) -> &SubsetFill {
        &self.fill
    }

    /// Fail unless every pairing kind reached the cycle count
    ///
    /// # Errors
    ///
    /// Returns `UnderfilledSubset` naming the first kind that fell short
    pub fn ensure_filled(&self) -> CoreResult<()> {
        match self.fill.shortfall() {
            None => Ok(()),
            Some((kind, reached)) => Err(CoreError::UnderfilledSubset {
                kind: kind.to_string(),
                reached,
                required: self.fill.required,
            }),
        }
    }
}

/// Build the replay subset for `segment`.
///
/// # Errors
///
/// Returns `InvalidConfig`, `EmptySegment` or `MissingRequiredMessage`.
/// An underfilled scan is reported through [`Subset::fill`], not as an error.
pub fn build_subset(segment: &LogSegment, config: &SubsetConfig) -> CoreResult<Subset> {
    config.validate()?;
    if segment.is_empty() {
        return Err(CoreError::EmptySegment);
    }

    let calibration = synthesize_calibration(segment, &config.calibration_type)?;
    let trimmed = trim_to_max_frames(
        segment,
        config.max_frames,
        &config.pairing_types,
        &config.passthrough_types,
    );

    let mut messages = Vec::with_capacity(trimmed.messages.len() + 1);
    messages.push(calibration);
    messages.extend(trimmed.messages);

    if let Some(nav) = &config.nav {
        let mut taken: IndexMap<&MessageKind, usize> = IndexMap::new();
        for msg in segment.messages() {
            if !nav.types.contains(msg.which()) {
                continue;
            }
            let count = taken.entry(msg.which()).or_insert(0);
            if *count < nav.max_per_type {
                *count += 1;
                messages.push(msg.clone());
            }
        }
        tracing::debug!(?taken, "navigation messages appended");
    }

    let fill = SubsetFill::from_counters(config.max_frames, &trimmed.counters);
    tracing::info!(
        total = messages.len(),
        scanned = trimmed.scanned,
        cycles = fill.cycles(),
        complete = fill.is_complete(),
        "built replay subset"
    );

    Ok(Subset {
        messages,
        scanned: trimmed.scanned,
        fill,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::MonoTime;
    use proptest::prelude::*;
    use serde_json::json;

    const A: &str = kinds::ROAD_CAMERA_STATE;
    const B: &str = kinds::WIDE_ROAD_CAMERA_STATE;

    fn msg(t: u64, kind: &str, id: u64) -> LogMessage {
        LogMessage::new(MonoTime::from_nanos(t), kind, json!({ "id": id }))
    }

    fn camera_config(max_frames: usize) -> SubsetConfig {
        SubsetConfig::new(max_frames, [A, B])
            .with_passthrough([kinds::ROAD_ENCODE_IDX, kinds::WIDE_ROAD_ENCODE_IDX])
    }

    /// Calibration at t=0 followed by `frames` interleaved A/B pairs.
    fn interleaved(frames: u64) -> LogSegment {
        let mut msgs = vec![msg(0, kinds::LIVE_CALIBRATION, 0)];
        for i in 0..frames {
            msgs.push(msg(2 * i + 1, A, 100 + i));
            msgs.push(msg(2 * i + 2, B, 200 + i));
        }
        LogSegment::new(msgs)
    }

    fn count(msgs: &[LogMessage], kind: &str) -> usize {
        msgs.iter().filter(|m| m.is(kind)).count()
    }

    #[test]
    fn test_example_scenario() {
        let segment = interleaved(6);
        let subset = build_subset(&segment, &SubsetConfig::new(5, [A, B])).unwrap();

        // calibration + 5 A + 5 B scanned, then the synthesized copy in front
        assert_eq!(subset.scanned().len(), 11);
        assert_eq!(subset.len(), subset.scanned().len() + 1);
        assert_eq!(count(subset.scanned(), A), 5);
        assert_eq!(count(subset.scanned(), B), 5);
        assert!(subset.appended().is_empty());
        assert!(subset.fill().is_complete());
        assert!(subset.ensure_filled().is_ok());
    }

    #[test]
    fn test_scan_stops_on_first_equal_point() {
        let segment = interleaved(3);
        let trimmed = trim_to_max_frames(
            &segment,
            2,
            &[A, B].into_iter().map(MessageKind::from).collect(),
            &IndexSet::new(),
        );
        // cal, A0, B0, A1, B1
        assert_eq!(trimmed.scanned, 5);
        assert_eq!(trimmed.messages.last().unwrap().log_mono_time().as_nanos(), 4);
        assert_eq!(trimmed.counters.get(A), 2);
        assert_eq!(trimmed.counters.get(B), 2);
    }

    #[test]
    fn test_calibration_is_restamped_to_reader_first() {
        let segment = LogSegment::new(vec![
            msg(50, A, 1),
            msg(10, B, 2),
            msg(40, kinds::LIVE_CALIBRATION, 3),
            msg(45, kinds::LIVE_CALIBRATION, 4),
        ]);
        let subset = build_subset(&segment, &SubsetConfig::new(1, [A, B])).unwrap();
        let cal = subset.calibration();

        assert!(cal.is(kinds::LIVE_CALIBRATION));
        // first in reader order, not minimum time
        assert_eq!(cal.log_mono_time(), MonoTime::from_nanos(50));
        assert_eq!(cal.field(&["id"]), Some(&json!(3)));
        // source message untouched
        assert_eq!(
            segment.messages()[2].log_mono_time(),
            MonoTime::from_nanos(40)
        );
    }

    #[test]
    fn test_missing_calibration() {
        let segment = LogSegment::new(vec![msg(1, A, 1), msg(2, B, 2)]);
        let result = build_subset(&segment, &SubsetConfig::new(1, [A, B]));
        assert_eq!(
            result,
            Err(CoreError::MissingRequiredMessage {
                kind: "liveCalibration".to_string()
            })
        );
    }

    #[test]
    fn test_empty_segment() {
        let result = build_subset(&LogSegment::default(), &SubsetConfig::new(1, [A]));
        assert_eq!(result, Err(CoreError::EmptySegment));
    }

    #[test]
    fn test_invalid_config() {
        let segment = interleaved(1);
        assert!(matches!(
            build_subset(&segment, &SubsetConfig::new(0, [A, B])),
            Err(CoreError::InvalidConfig { .. })
        ));
        assert!(matches!(
            build_subset(&segment, &SubsetConfig::new(1, Vec::<&str>::new())),
            Err(CoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_exhausted_segment_is_underfilled_not_error() {
        let segment = interleaved(3);
        let subset = build_subset(&segment, &SubsetConfig::new(5, [A, B])).unwrap();

        assert_eq!(subset.scanned().len(), segment.len());
        assert!(!subset.fill().is_complete());
        assert_eq!(subset.fill().cycles(), 3);
        assert_eq!(
            subset.ensure_filled(),
            Err(CoreError::UnderfilledSubset {
                kind: A.to_string(),
                reached: 3,
                required: 5,
            })
        );
    }

    #[test]
    fn test_overshoot_runs_to_end() {
        let segment = LogSegment::new(vec![
            msg(0, kinds::LIVE_CALIBRATION, 0),
            msg(1, A, 1),
            msg(2, A, 2),
            msg(3, B, 3),
            msg(4, B, 4),
            msg(5, A, 5),
        ]);
        let subset = build_subset(&segment, &SubsetConfig::new(1, [A, B])).unwrap();
        assert_eq!(subset.scanned().len(), 6);
        assert!(!subset.fill().is_complete());
    }

    #[test]
    fn test_passthrough_appended_in_reader_order_with_duplicates() {
        let segment = LogSegment::new(vec![
            msg(0, kinds::LIVE_CALIBRATION, 0),
            msg(9, kinds::ROAD_ENCODE_IDX, 1),
            msg(1, A, 2),
            msg(2, B, 3),
            msg(3, kinds::WIDE_ROAD_ENCODE_IDX, 4),
            msg(4, A, 5),
            msg(5, B, 6),
        ]);
        let subset = build_subset(&segment, &camera_config(1)).unwrap();

        // scan ends at t=2; wideRoadEncodeIdx at t=3 is only in the tail
        assert_eq!(subset.scanned().len(), 3);
        let tail: Vec<u64> = subset
            .appended()
            .iter()
            .map(|m| m.field(&["id"]).unwrap().as_u64().unwrap())
            .collect();
        assert_eq!(tail, vec![1, 4]);

        // a passthrough message that was also scanned appears twice
        let segment = LogSegment::new(vec![
            msg(0, kinds::LIVE_CALIBRATION, 0),
            msg(1, kinds::ROAD_ENCODE_IDX, 1),
            msg(2, A, 2),
            msg(3, B, 3),
        ]);
        let subset = build_subset(&segment, &camera_config(1)).unwrap();
        assert_eq!(count(subset.messages(), kinds::ROAD_ENCODE_IDX), 2);
    }

    #[test]
    fn test_nav_inclusion_caps_per_kind() {
        let mut msgs = interleaved(2).into_messages();
        for i in 0..4 {
            msgs.push(msg(100 + i, kinds::NAV_MODEL, 300 + i));
        }
        msgs.push(msg(50, kinds::NAV_INSTRUCTION, 400));
        let segment = LogSegment::new(msgs);

        let config = SubsetConfig::new(2, [A, B]).with_nav(NavInclusion::new(2));
        let subset = build_subset(&segment, &config).unwrap();
        assert_eq!(count(subset.appended(), kinds::NAV_MODEL), 2);
        assert_eq!(count(subset.appended(), kinds::NAV_INSTRUCTION), 1);
        assert_eq!(subset.appended()[0].field(&["id"]), Some(&json!(300)));

        let without = build_subset(&segment, &SubsetConfig::new(2, [A, B])).unwrap();
        assert!(without.appended().is_empty());
    }

    #[test]
    fn test_input_segment_not_mutated() {
        let segment = LogSegment::new(vec![
            msg(5, B, 1),
            msg(0, kinds::LIVE_CALIBRATION, 0),
            msg(3, A, 2),
        ]);
        let before = segment.clone();
        let _ = build_subset(&segment, &camera_config(1)).unwrap();
        assert_eq!(segment, before);
    }

    #[test]
    fn test_cycle_counters() {
        let mut counters = CycleCounters::new([MessageKind::from(A), MessageKind::from(B)]);
        assert!(counters.all_at(0));
        assert!(counters.record(&MessageKind::from(A)));
        assert!(!counters.record(&MessageKind::from("carState")));
        assert_eq!(counters.get(A), 1);
        assert_eq!(counters.get("carState"), 0);
        assert!(!counters.all_at(1));
        counters.record(&MessageKind::from(B));
        assert!(counters.all_at(1));
    }

    /// Synchronized A/B pairs, one per 100ns slot, plus unrelated traffic,
    /// encoder indices and a calibration message, shuffled.
    fn segment_strategy() -> impl Strategy<Value = (usize, Vec<LogMessage>)> {
        (
            1usize..6,
            0usize..4,
            proptest::collection::vec((0u64..50, 0u64..50), 10),
            proptest::collection::vec(0u64..1000, 0..20),
            proptest::collection::vec(0u64..1000, 0..8),
            0u64..1000,
        )
            .prop_flat_map(|(max_frames, extra, jitters, noise, encode, cal_t)| {
                let mut id = 0u64;
                let mut next = |t: u64, kind: &str| {
                    id += 1;
                    msg(t, kind, id)
                };
                let mut msgs = Vec::new();
                for (i, (ja, jb)) in jitters.iter().take(max_frames + extra).enumerate() {
                    let base = 100 * i as u64;
                    msgs.push(next(base + ja, A));
                    msgs.push(next(base + jb, B));
                }
                for t in noise {
                    msgs.push(next(t, "carState"));
                }
                for t in encode {
                    msgs.push(next(t, kinds::ROAD_ENCODE_IDX));
                }
                msgs.push(next(cal_t, kinds::LIVE_CALIBRATION));
                (Just(max_frames), Just(msgs).prop_shuffle())
            })
    }

    proptest! {
        #[test]
        fn prop_pairing_counts_exact((max_frames, msgs) in segment_strategy()) {
            let segment = LogSegment::new(msgs);
            let subset = build_subset(&segment, &camera_config(max_frames)).unwrap();
            prop_assert_eq!(count(subset.scanned(), A), max_frames);
            prop_assert_eq!(count(subset.scanned(), B), max_frames);
            prop_assert!(subset.fill().is_complete());
        }

        #[test]
        fn prop_scan_is_time_ordered((max_frames, msgs) in segment_strategy()) {
            let segment = LogSegment::new(msgs);
            let subset = build_subset(&segment, &camera_config(max_frames)).unwrap();
            for pair in subset.scanned().windows(2) {
                prop_assert!(pair[0].log_mono_time() <= pair[1].log_mono_time());
            }
        }

        #[test]
        fn prop_calibration_first((max_frames, msgs) in segment_strategy()) {
            let segment = LogSegment::new(msgs);
            let subset = build_subset(&segment, &camera_config(max_frames)).unwrap();
            let first = &subset.messages()[0];
            prop_assert!(first.is(kinds::LIVE_CALIBRATION));
            prop_assert_eq!(first.log_mono_time(), segment.first().unwrap().log_mono_time());
        }

        #[test]
        fn prop_passthrough_complete_in_order((max_frames, msgs) in segment_strategy()) {
            let segment = LogSegment::new(msgs);
            let subset = build_subset(&segment, &camera_config(max_frames)).unwrap();
            let expected: Vec<&LogMessage> =
                segment.iter_of(kinds::ROAD_ENCODE_IDX).collect();
            let appended: Vec<&LogMessage> = subset.appended().iter().collect();
            prop_assert_eq!(appended, expected);
        }
    }
}
