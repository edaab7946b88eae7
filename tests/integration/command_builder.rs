// End-to-end command construction from requests and capability snapshots

use ffcut::engine::{
    AccelMode, Capability, CommandBuilder, EngineError, FontColor, OperationRequest, Platform,
    Quality, Timecode,
};

use crate::common::assertions::*;
use crate::common::fake_encoder::{fake_binary, snapshot_with};

fn tc(s: &str) -> Timecode {
    s.parse().expect("valid timecode")
}

fn builder() -> CommandBuilder {
    CommandBuilder::new(Some(fake_binary()))
}

#[test]
fn test_range_extract_reference_layout() {
    let request = OperationRequest::range_extract("a.mp4", "out.mp4", tc("00:00:10"), tc("00:00:20"))
        .with_accel(AccelMode::Cpu)
        .with_quality(Quality::Medium);
    let snapshot = snapshot_with(Platform::Linux, &[]);

    let cmd = builder().build(&request, &snapshot).unwrap();

    assert_eq!(
        cmd.args(),
        &[
            "-ss", "00:00:10", "-to", "00:00:20", "-i", "a.mp4", "-c:v", "libx264", "-preset",
            "medium", "-crf", "23", "-c:a", "copy", "out.mp4",
        ]
    );
}

#[test]
fn test_range_before_input() {
    let request =
        OperationRequest::range_extract("in.mkv", "out.mkv", tc("01:00:00"), tc("01:30:00"));
    let cmd = builder()
        .build(&request, &snapshot_with(Platform::Linux, &[]))
        .unwrap();
    assert_before(&cmd, "-ss", "-i");
    assert_before(&cmd, "-to", "-i");
    assert_before(&cmd, "-i", "-c:v");
    assert_before(&cmd, "-c:a", "out.mkv");
}

#[test]
fn test_time_ordering_violations() {
    let snapshot = snapshot_with(Platform::Linux, &[]);
    for (start, end) in [("00:00:20", "00:00:10"), ("00:05:00", "00:05:00")] {
        let request = OperationRequest::range_extract("a.mp4", "b.mp4", tc(start), tc(end));
        match builder().build(&request, &snapshot) {
            Err(EngineError::InvalidRequest(msg)) => assert!(msg.contains(start)),
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }
}

#[test]
fn test_unverified_binary_rejected() {
    let request = OperationRequest::range_extract("a.mp4", "b.mp4", tc("00:00:01"), tc("00:00:02"));
    let result = CommandBuilder::new(None).build(&request, &snapshot_with(Platform::Linux, &[]));
    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
}

#[test]
fn test_quality_table() {
    let cases: &[(AccelMode, &[Capability], Quality, &[&str])] = &[
        (AccelMode::Cpu, &[], Quality::Low, &["-preset", "fast", "-crf", "28"]),
        (AccelMode::Cpu, &[], Quality::High, &["-preset", "slow", "-crf", "18"]),
        (
            AccelMode::Cuda,
            &[Capability::Cuda, Capability::Nvenc],
            Quality::Low,
            &["-preset", "fast", "-b:v", "3M"],
        ),
        (
            AccelMode::Cuda,
            &[Capability::Cuda, Capability::Nvenc],
            Quality::Medium,
            &["-preset", "medium", "-b:v", "5M"],
        ),
        (AccelMode::Amd, &[Capability::Amf], Quality::Medium, &["-b:v", "5M"]),
        (AccelMode::Amd, &[Capability::Amf], Quality::High, &["-b:v", "8M"]),
    ];

    for (mode, caps, quality, expected) in cases {
        let request =
            OperationRequest::range_extract("a.mp4", "b.mp4", tc("00:00:01"), tc("00:00:02"))
                .with_accel(*mode)
                .with_quality(*quality);
        let cmd = builder()
            .build(&request, &snapshot_with(Platform::Linux, caps))
            .unwrap();
        assert_contains_run(&cmd, expected);
    }
}

#[test]
fn test_amd_quality_has_no_preset() {
    let request = OperationRequest::range_extract("a.mp4", "b.mp4", tc("00:00:01"), tc("00:00:02"))
        .with_accel(AccelMode::Amd)
        .with_quality(Quality::Low);
    let cmd = builder()
        .build(&request, &snapshot_with(Platform::Windows, &[Capability::Amf]))
        .unwrap();
    assert_flag_value(&cmd, "-c:v", "h264_amf");
    assert_no_arg(&cmd, "-preset");
}

#[test]
fn test_hardware_requests_degrade_to_software() {
    let request = OperationRequest::range_extract("a.mp4", "b.mp4", tc("00:00:01"), tc("00:00:02"))
        .with_quality(Quality::High);

    let cuda = request.clone().with_accel(AccelMode::Cuda);
    let cmd = builder()
        .build(&cuda, &snapshot_with(Platform::Linux, &[Capability::Amf]))
        .unwrap();
    assert_flag_value(&cmd, "-c:v", "libx264");
    assert_no_arg(&cmd, "-hwaccel");
    assert_contains_run(&cmd, &["-preset", "slow", "-crf", "18"]);

    let amd = request.with_accel(AccelMode::Amd);
    let cmd = builder()
        .build(&amd, &snapshot_with(Platform::Linux, &[Capability::Nvenc]))
        .unwrap();
    assert_flag_value(&cmd, "-c:v", "libx264");
}

#[test]
fn test_windows_amd_prefers_opencl_then_d3d11va_then_dxva2() {
    let request = OperationRequest::range_extract("a.mp4", "b.mp4", tc("00:00:01"), tc("00:00:02"))
        .with_accel(AccelMode::Amd);

    let all = [Capability::Opencl, Capability::D3d11va, Capability::Dxva2];
    let cmd = builder()
        .build(&request, &snapshot_with(Platform::Windows, &all))
        .unwrap();
    assert_flag_value(&cmd, "-hwaccel", "opencl");

    let cmd = builder()
        .build(
            &request,
            &snapshot_with(Platform::Windows, &[Capability::D3d11va, Capability::Dxva2]),
        )
        .unwrap();
    assert_flag_value(&cmd, "-hwaccel", "d3d11va");

    let cmd = builder()
        .build(&request, &snapshot_with(Platform::Windows, &[Capability::Dxva2]))
        .unwrap();
    assert_flag_value(&cmd, "-hwaccel", "dxva2");
    assert_before(&cmd, "-hwaccel", "-i");
}

#[test]
fn test_subtitle_burn_escapes_and_styles() {
    let request = OperationRequest::subtitle_burn(
        "movie.mp4",
        "D:\\Subs\\Director's Cut.srt",
        "burned.mp4",
        28,
        FontColor::from_name("cyan"),
    )
    .with_accel(AccelMode::Cuda);
    let cmd = builder()
        .build(
            &request,
            &snapshot_with(Platform::Windows, &[Capability::Cuda, Capability::Nvenc]),
        )
        .unwrap();

    assert_flag_value(
        &cmd,
        "-vf",
        "subtitles='D:/Subs/Director\\'s Cut.srt':force_style='FontSize=28,PrimaryColour=&H00FFFF'",
    );
    assert_flag_value(&cmd, "-c:v", "h264_nvenc");
    assert_before(&cmd, "-hwaccel", "-i");
    assert_before(&cmd, "-i", "-vf");
    assert_before(&cmd, "-vf", "-c:v");
    // Burn-in carries no quality group
    assert_no_arg(&cmd, "-b:v");
    assert_no_arg(&cmd, "-preset");
}

#[test]
fn test_overwrite_precedes_hwaccel() {
    let request = OperationRequest::range_extract("a.mp4", "b.mp4", tc("00:00:01"), tc("00:00:02"))
        .with_accel(AccelMode::Cuda)
        .with_overwrite(true);
    let cmd = builder()
        .build(&request, &snapshot_with(Platform::Linux, &[Capability::Cuda]))
        .unwrap();
    assert_eq!(cmd.args()[0], "-y");
    assert_before(&cmd, "-y", "-hwaccel");
}

#[test]
fn test_build_is_deterministic() {
    let request = OperationRequest::range_extract("a.mp4", "b.mp4", tc("00:00:01"), tc("00:00:02"))
        .with_accel(AccelMode::Cuda);
    let snapshot = snapshot_with(Platform::Linux, &[Capability::Cuda, Capability::Nvenc]);
    let first = builder().build(&request, &snapshot).unwrap();
    let second = builder().build(&request, &snapshot).unwrap();
    assert_eq!(first, second);
}
