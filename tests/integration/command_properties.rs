// Property-based checks for command construction and stats parsing
//
// These run without ffmpeg: every property is about the argument vector or the
// parsed record, never about an encode.

use ffcut::engine::{
    AccelMode, Capability, CommandBuilder, EngineError, FontColor, OperationRequest, Platform,
    ProgressParser, ProgressRecord, Quality, Timecode, color_to_hex,
};
use proptest::prelude::*;

use crate::common::fake_encoder::{fake_binary, snapshot_with};

fn any_mode() -> impl Strategy<Value = AccelMode> {
    prop_oneof![
        Just(AccelMode::Cpu),
        Just(AccelMode::Cuda),
        Just(AccelMode::Amd)
    ]
}

fn any_quality() -> impl Strategy<Value = Quality> {
    prop_oneof![
        Just(Quality::Low),
        Just(Quality::Medium),
        Just(Quality::High)
    ]
}

fn any_caps() -> impl Strategy<Value = Vec<Capability>> {
    proptest::sample::subsequence(Capability::ALL.to_vec(), 0..=Capability::ALL.len())
}

// ============================================================================
// Range extraction
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any forward range builds, with the seek placed before the input
    #[test]
    fn proptest_forward_range_builds(
        start in 0u64..200_000,
        len in 1u64..20_000,
        mode in any_mode(),
        quality in any_quality(),
        caps in any_caps(),
    ) {
        let start_tc = Timecode::from_seconds(start);
        let end_tc = Timecode::from_seconds(start + len);
        let request = OperationRequest::range_extract("in.mp4", "out.mp4", start_tc, end_tc)
            .with_accel(mode)
            .with_quality(quality);
        let cmd = CommandBuilder::new(Some(fake_binary()))
            .build(&request, &snapshot_with(Platform::Linux, &caps))
            .unwrap();

        let ss = cmd.position("-ss").unwrap();
        let to = cmd.position("-to").unwrap();
        let input = cmd.position("-i").unwrap();
        prop_assert!(ss < to && to < input);
        let start_s = start_tc.to_string();
        let end_s = end_tc.to_string();
        prop_assert_eq!(cmd.value_of("-ss"), Some(start_s.as_str()));
        prop_assert_eq!(cmd.value_of("-to"), Some(end_s.as_str()));
        prop_assert_eq!(cmd.args().last().map(String::as_str), Some("out.mp4"));
        prop_assert_eq!(request.expected_duration_s(), Some(len as f64));
    }

    /// Empty and reversed ranges are rejected before any command exists
    #[test]
    fn proptest_backward_range_rejected(a in 0u64..100_000, back in 0u64..100_000) {
        let end = Timecode::from_seconds(a);
        let start = Timecode::from_seconds(a + back);
        let request = OperationRequest::range_extract("in.mp4", "out.mp4", start, end);
        let result = CommandBuilder::new(Some(fake_binary()))
            .build(&request, &snapshot_with(Platform::Linux, &Capability::ALL));
        prop_assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    }

    /// CUDA without nvenc always degrades to the software encoder
    #[test]
    fn proptest_cuda_needs_nvenc(caps in any_caps(), quality in any_quality()) {
        let caps: Vec<Capability> = caps.into_iter().filter(|c| *c != Capability::Nvenc).collect();
        let request = OperationRequest::range_extract(
            "in.mp4",
            "out.mp4",
            Timecode::from_seconds(1),
            Timecode::from_seconds(2),
        )
        .with_accel(AccelMode::Cuda)
        .with_quality(quality);
        let cmd = CommandBuilder::new(Some(fake_binary()))
            .build(&request, &snapshot_with(Platform::Linux, &caps))
            .unwrap();
        prop_assert_eq!(cmd.value_of("-c:v"), Some("libx264"));
        prop_assert!(cmd.position("-crf").is_some());
    }

    /// Timecodes survive display and parse
    #[test]
    fn proptest_timecode_display_parses(secs in 0u64..1_000_000) {
        let tc = Timecode::from_seconds(secs);
        let parsed: Timecode = tc.to_string().parse().unwrap();
        prop_assert_eq!(parsed, tc);
        prop_assert_eq!(parsed.total_seconds(), secs);
    }
}

// ============================================================================
// Subtitle styling and stats parsing
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Every color name maps to six hex digits; unknown names are white
    #[test]
    fn proptest_color_is_total(name in ".*") {
        let hex = color_to_hex(&name);
        prop_assert_eq!(hex.len(), 6);
        prop_assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        let known = FontColor::ALL.iter().any(|c| c.name().eq_ignore_ascii_case(name.trim()));
        if !known {
            prop_assert_eq!(hex, "FFFFFF");
        }
    }

    /// Arbitrary stderr never panics the parser and never pushes past 100%
    #[test]
    fn proptest_parser_is_total(
        lines in proptest::collection::vec(".{0,120}", 1..20),
        total in proptest::option::of(0.0f64..10_000.0),
    ) {
        let parser = ProgressParser::new();
        let mut record = ProgressRecord::default();
        for line in &lines {
            let _ = parser.parse_line(line, &mut record, total);
            prop_assert!((0.0..=100.0).contains(&record.percentage));
        }
    }

    /// Stats-shaped lines with random values
    #[test]
    fn proptest_stats_lines(
        frame in 0u64..1_000_000,
        secs in 0u32..36_000,
        centis in 0u32..100,
        speed in 0.01f64..50.0,
    ) {
        let line = format!(
            "frame={:>6} fps= 25 q=28.0 size=    1024kB time={:02}:{:02}:{:02}.{:02} bitrate=1000.0kbits/s speed={:.2}x",
            frame,
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60,
            centis,
            speed,
        );
        let parser = ProgressParser::new();
        let mut record = ProgressRecord::default();
        let _ = parser.parse_line(&line, &mut record, Some(36_000.0));
        prop_assert_eq!(record.frames_decoded, frame);
        prop_assert!(record.time_processed.is_some());
        prop_assert!(record.percentage <= 100.0);
    }
}
