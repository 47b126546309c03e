#![no_main]
use libfuzzer_sys::fuzz_target;
use lockstep_core::MonoTime;
use lockstep_log::{LogMessage, LogSegment, SubsetConfig, build_subset, kinds};

const KINDS: [&str; 5] = [
    kinds::ROAD_CAMERA_STATE,
    kinds::WIDE_ROAD_CAMERA_STATE,
    kinds::ROAD_ENCODE_IDX,
    kinds::LIVE_CALIBRATION,
    "carState",
];

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let max_frames = usize::from(data[0] % 8) + 1;
    let messages: Vec<LogMessage> = data[1..]
        .chunks(2)
        .map(|c| {
            let kind = KINDS[usize::from(c[0]) % KINDS.len()];
            let t = u64::from(*c.get(1).unwrap_or(&0));
            LogMessage::new(MonoTime::from_nanos(t), kind, serde_json::Value::Null)
        })
        .collect();
    let segment = LogSegment::new(messages);

    let config = SubsetConfig::new(
        max_frames,
        [kinds::ROAD_CAMERA_STATE, kinds::WIDE_ROAD_CAMERA_STATE],
    )
    .with_passthrough([kinds::ROAD_ENCODE_IDX]);

    // Must never panic; scan stays sorted and the calibration stays first
    if let Ok(subset) = build_subset(&segment, &config) {
        assert!(subset.messages()[0].is(kinds::LIVE_CALIBRATION));
        for pair in subset.scanned().windows(2) {
            assert!(pair[0].log_mono_time() <= pair[1].log_mono_time());
        }
    }
});
