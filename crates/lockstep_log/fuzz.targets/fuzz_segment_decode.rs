#![no_main]
use libfuzzer_sys::fuzz_target;
use lockstep_log::LogSegment;

fuzz_target!(|data: &[u8]| {
    // Arbitrary text must either parse or fail cleanly
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(segment) = LogSegment::from_json_lines(text) {
            let rendered = segment.to_json_lines().expect("re-encode failed");
            let reparsed = LogSegment::from_json_lines(&rendered).expect("re-parse failed");
            assert_eq!(reparsed.len(), segment.len());
        }
    }
});
