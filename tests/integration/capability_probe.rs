// Capability negotiation against scripted hardware and encoder binaries

use ffcut::engine::{
    AccelMode, Capability, CapabilityProbe, DeviceQuery, GpuVendor, HardwareDevice, ProbeError,
    recommend,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct FixedDevices {
    names: Vec<&'static str>,
    calls: Arc<AtomicUsize>,
}

impl DeviceQuery for FixedDevices {
    fn devices(&self, _timeout: Duration) -> Result<Vec<HardwareDevice>, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.names.iter().map(|n| HardwareDevice::new(*n)).collect())
    }
}

struct BrokenDevices;

impl DeviceQuery for BrokenDevices {
    fn devices(&self, timeout: Duration) -> Result<Vec<HardwareDevice>, ProbeError> {
        Err(ProbeError::TimedOut {
            program: "lspci".to_string(),
            timeout,
        })
    }
}

fn probe_with(names: Vec<&'static str>) -> CapabilityProbe {
    CapabilityProbe::with_device_query(
        None,
        Box::new(FixedDevices {
            names,
            calls: Arc::new(AtomicUsize::new(0)),
        }),
    )
}

#[test]
fn test_hardware_only_probe_recommends_cpu() {
    // Devices without a binary: flags are all false, so nothing is usable
    let snapshot = probe_with(vec!["NVIDIA GeForce RTX 4070", "AMD Radeon RX 7800 XT"]).probe();
    assert!(snapshot.has_vendor(GpuVendor::Nvidia));
    assert!(snapshot.has_vendor(GpuVendor::Amd));
    assert!(Capability::ALL.iter().all(|c| !snapshot.flag(*c)));
    assert_eq!(recommend(&snapshot), AccelMode::Cpu);
}

#[test]
fn test_device_query_failure_is_empty() {
    let probe = CapabilityProbe::with_device_query(None, Box::new(BrokenDevices))
        .with_timeout(Duration::from_millis(50));
    assert!(probe.probe_hardware().is_empty());
    assert!(probe.probe().hardware_devices.is_empty());
}

#[test]
fn test_unknown_devices_do_not_break_recommendation() {
    let snapshot = probe_with(vec!["Matrox G200eR2", "", "Virtio GPU"]).probe();
    assert!(
        snapshot
            .hardware_devices
            .iter()
            .all(|d| d.vendor == GpuVendor::Unknown)
    );
    assert_eq!(snapshot.recommend(), AccelMode::Cpu);
}

#[test]
fn test_snapshot_is_shared_not_copied() {
    let calls = Arc::new(AtomicUsize::new(0));
    let probe = CapabilityProbe::with_device_query(
        None,
        Box::new(FixedDevices {
            names: vec!["Intel UHD Graphics 770"],
            calls: calls.clone(),
        }),
    );

    let published = probe.probe();
    let a = probe.snapshot();
    let b = probe.snapshot();
    assert!(Arc::ptr_eq(&published, &a));
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(a.hardware_devices[0].vendor, GpuVendor::Intel);
}

#[cfg(unix)]
mod scripted_binary {
    use super::*;
    use ffcut::engine::hardware::probe_encoder_support;
    use ffcut::engine::{FfmpegBinary, probe_duration, probe_media_info};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const FAKE_FFMPEG: &str = r#"#!/bin/sh
case "$1 $2" in
  "-version "*)
    echo "ffmpeg version 7.1-fake Copyright (c) 2000-2024 the FFmpeg developers"
    ;;
  "-hide_banner -hwaccels")
    printf 'Hardware acceleration methods:\ncuda\nvaapi\nopencl\n'
    ;;
  "-hide_banner -encoders")
    printf 'Encoders:\n V....D libx264              libx264 H.264\n V....D h264_nvenc           NVIDIA NVENC H.264 encoder\n'
    ;;
  "-hide_banner -i")
    printf "Input #0, matroska,webm, from '%s':\n  Duration: 00:01:30.50, start: 0.000000, bitrate: 900 kb/s\n" "$3" >&2
    printf '  Stream #0:0: Video: vp9 (Profile 0), yuv420p(tv), 1280x720, SAR 1:1 DAR 16:9, 25 fps, 25 tbr, 1k tbn (default)\n' >&2
    printf '  Stream #0:1: Audio: opus, 48000 Hz, stereo, fltp (default)\n' >&2
    exit 1
    ;;
  *)
    exit 1
    ;;
esac
"#;

    fn install(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_probe_reads_flags_from_binary() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = install(dir.path(), "ffmpeg", FAKE_FFMPEG);

        let flags = probe_encoder_support(&ffmpeg, Duration::from_secs(5));
        assert!(flags.get(Capability::Cuda));
        assert!(flags.get(Capability::Nvenc));
        assert!(flags.get(Capability::Vaapi));
        assert!(flags.get(Capability::Opencl));
        assert!(!flags.get(Capability::Amf));
        assert!(!flags.get(Capability::D3d11va));

        let probe = CapabilityProbe::with_device_query(
            Some(ffmpeg),
            Box::new(FixedDevices {
                names: vec!["NVIDIA GeForce GTX 1660"],
                calls: Arc::new(AtomicUsize::new(0)),
            }),
        );
        let snapshot = probe.probe();
        assert_eq!(snapshot.recommend(), AccelMode::Cuda);
        assert!(snapshot.is_usable(Capability::Nvenc));
    }

    #[test]
    fn test_hanging_binary_degrades_to_all_false() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = install(dir.path(), "ffmpeg", "#!/bin/sh\nexec sleep 10\n");

        let started = std::time::Instant::now();
        let flags = probe_encoder_support(&ffmpeg, Duration::from_millis(200));
        assert!(Capability::ALL.iter().all(|c| !flags.get(*c)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_failing_binary_degrades_to_all_false() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = install(dir.path(), "ffmpeg", "#!/bin/sh\necho cuda\nexit 1\n");
        let flags = probe_encoder_support(&ffmpeg, Duration::from_secs(5));
        assert!(!flags.get(Capability::Cuda));
    }

    #[test]
    fn test_verify_and_duration_fallback() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = install(dir.path(), "ffmpeg", FAKE_FFMPEG);

        let binary = FfmpegBinary::verify(&ffmpeg).unwrap();
        assert_eq!(binary.version(), "7.1-fake");

        // No ffprobe next to it, so the banner is scraped
        let seconds = probe_duration(&binary, Path::new("clip.mkv")).unwrap();
        assert!((seconds - 90.5).abs() < 1e-9);
    }

    #[test]
    fn test_media_info_from_banner() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = install(dir.path(), "ffmpeg", FAKE_FFMPEG);
        let clip = dir.path().join("clip.mkv");
        fs::write(&clip, vec![0u8; 2048]).unwrap();

        let binary = FfmpegBinary::verify(&ffmpeg).unwrap();
        let info = probe_media_info(&binary, &clip).unwrap();
        assert!((info.duration_s.unwrap() - 90.5).abs() < 1e-9);
        assert_eq!(info.resolution().as_deref(), Some("1280x720"));
        assert_eq!(info.video_codec.as_deref(), Some("vp9"));
        assert_eq!(info.audio_codec.as_deref(), Some("opus"));
        assert_eq!(info.bitrate_kbps, Some(900));
        assert_eq!(info.frame_rate, Some(25.0));
        // Size comes from the filesystem
        assert_eq!(info.file_size, Some(2048));
    }

    #[test]
    fn test_media_info_prefers_ffprobe() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = install(dir.path(), "ffmpeg", FAKE_FFMPEG);
        install(
            dir.path(),
            "ffprobe",
            r#"#!/bin/sh
cat <<'JSON'
{
  "streams": [
    { "codec_type": "video", "codec_name": "hevc", "width": 3840, "height": 2160, "r_frame_rate": "60/1" },
    { "codec_type": "audio", "codec_name": "eac3" }
  ],
  "format": { "duration": "12.500000", "size": "4096", "bit_rate": "2621440" }
}
JSON
"#,
        );

        let binary = FfmpegBinary::verify(&ffmpeg).unwrap();
        let info = probe_media_info(&binary, Path::new("clip.mkv")).unwrap();
        assert_eq!(info.duration_s, Some(12.5));
        assert_eq!(info.resolution().as_deref(), Some("3840x2160"));
        assert_eq!(info.video_codec.as_deref(), Some("hevc"));
        assert_eq!(info.audio_codec.as_deref(), Some("eac3"));
        assert_eq!(info.bitrate_kbps, Some(2621));
        assert_eq!(info.frame_rate, Some(60.0));
        assert_eq!(info.file_size, Some(4096));
    }

    #[test]
    fn test_media_info_fails_without_any_source() {
        let dir = TempDir::new().unwrap();
        let ffmpeg = install(
            dir.path(),
            "ffmpeg",
            "#!/bin/sh
[ \"$1\" = -version ] && echo 'ffmpeg version 7.1-fake' && exit 0
echo 'clip.mkv: No such file or directory' >&2
exit 1
",
        );
        let binary = FfmpegBinary::verify(&ffmpeg).unwrap();
        assert!(probe_media_info(&binary, Path::new("clip.mkv")).is_err());
    }

    #[test]
    fn test_verify_rejects_impostor() {
        let dir = TempDir::new().unwrap();
        let impostor = install(dir.path(), "ffmpeg", "#!/bin/sh\necho 'totally a video tool'\n");
        assert!(FfmpegBinary::verify(&impostor).is_err());
    }
}
