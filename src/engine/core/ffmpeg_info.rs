use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::timecode::parse_clock;
use crate::engine::error::ProbeError;

/// Upper bound for `-version` checks
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for media probing
pub const MEDIA_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ffmpeg version (\S+)").expect("valid version regex"));

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+:\d{2}:\d{2}(?:\.\d+)?)").expect("valid duration regex")
});
static BANNER_BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate:\s*(\d+) kb/s").expect("valid bitrate regex"));
static STREAM_CODEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Stream #.*?(Video|Audio): (\w+)").expect("valid stream regex")
});
static RESOLUTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2,5})x(\d{2,5})\b").expect("valid resolution regex"));
static BANNER_FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?) fps").expect("valid fps regex"));

/// Output of a bounded introspection call
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub program: String,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    pub fn require_success(self) -> Result<Self, ProbeError> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(ProbeError::Exit {
                program: self.program,
                status: self.status.to_string(),
            })
        }
    }
}

/// Run a short-lived command, capturing its output, and kill it if it outlives `timeout`.
pub fn run_capture(mut cmd: Command, timeout: Duration) -> Result<CapturedOutput, ProbeError> {
    let program = cmd.get_program().to_string_lossy().to_string();
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| ProbeError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout_thread = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_thread = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::TimedOut { program, timeout });
            }
            Ok(None) => thread::sleep(Duration::from_millis(20)),
            Err(source) => {
                let _ = child.kill();
                return Err(ProbeError::Spawn { program, source });
            }
        }
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle
            .and_then(|h| h.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    };

    Ok(CapturedOutput {
        program,
        status,
        stdout: collect(stdout_thread),
        stderr: collect(stderr_thread),
    })
}

/// An encoder binary that answered `-version` like ffmpeg does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegBinary {
    path: PathBuf,
    version: String,
}

impl FfmpegBinary {
    /// Run `<path> -version` and accept the binary only if it identifies as ffmpeg.
    pub fn verify(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut cmd = Command::new(path);
        cmd.arg("-version");

        let output = run_capture(cmd, VERSION_TIMEOUT)
            .and_then(CapturedOutput::require_success)
            .with_context(|| format!("Failed to execute {}", path.display()))?;

        if !output.stdout.to_lowercase().contains("ffmpeg version") {
            anyhow::bail!("{} does not look like ffmpeg", path.display());
        }

        Ok(Self {
            path: path.to_path_buf(),
            version: parse_version(&output.stdout).unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Accept a binary verified out of band (dry runs, tests).
    pub fn assume(path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: version.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// The `ffprobe` that ships next to this ffmpeg
    pub fn ffprobe_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().replacen("ffmpeg", "ffprobe", 1))
            .unwrap_or_else(|| "ffprobe".to_string());
        self.path.with_file_name(file_name)
    }
}

/// Extract the version token from `ffmpeg -version` output
pub fn parse_version(output: &str) -> Option<String> {
    VERSION_RE
        .captures(output)
        .map(|caps| caps[1].to_string())
}

fn candidate_paths(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    if let Some(path) = configured {
        paths.push(path.to_path_buf());
    }
    paths.push(PathBuf::from("ffmpeg"));

    if cfg!(target_os = "windows") {
        paths.extend(
            [
                "ffmpeg.exe",
                "C:\\ffmpeg\\bin\\ffmpeg.exe",
                "C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe",
                "C:\\Program Files (x86)\\ffmpeg\\bin\\ffmpeg.exe",
            ]
            .map(PathBuf::from),
        );
    } else {
        paths.extend(
            [
                "/usr/bin/ffmpeg",
                "/usr/local/bin/ffmpeg",
                "/opt/homebrew/bin/ffmpeg",
            ]
            .map(PathBuf::from),
        );
    }
    paths
}

/// Find a working ffmpeg: the configured path first, then `PATH` and the usual install dirs.
pub fn locate_ffmpeg(configured: Option<&Path>) -> Option<FfmpegBinary> {
    candidate_paths(configured)
        .into_iter()
        .find_map(|path| match FfmpegBinary::verify(&path) {
            Ok(binary) => Some(binary),
            Err(e) => {
                debug!("ffmpeg candidate {} rejected: {:#}", path.display(), e);
                None
            }
        })
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

/// What `ffcut info` reports about a media file. Every field is optional: ffprobe and
/// ffmpeg's banner both omit things.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub duration_s: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub bitrate_kbps: Option<u64>,
    pub frame_rate: Option<f64>,
    pub file_size: Option<u64>,
}

impl MediaInfo {
    /// `WIDTHxHEIGHT`
    pub fn resolution(&self) -> Option<String> {
        Some(format!("{}x{}", self.width?, self.height?))
    }

    fn is_empty(&self) -> bool {
        self.duration_s.is_none() && self.video_codec.is_none() && self.audio_codec.is_none()
    }
}

/// Seconds as ffprobe prints them; rejects `nan`, `inf` and negatives.
fn parse_seconds(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

/// Parse a fraction string like "30000/1001" to f64
fn parse_fraction(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/')?;
    let numerator: f64 = num.trim().parse().ok()?;
    let denominator: f64 = den.trim().parse().ok()?;

    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator).filter(|fps| fps.is_finite() && *fps > 0.0)
}

/// Parse duration from ffprobe JSON string
pub fn parse_ffprobe_duration(json: &str) -> Result<f64> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON")?;

    let duration_str = probe.format.duration.context("No duration found in JSON")?;

    parse_seconds(&duration_str)
        .with_context(|| format!("Failed to parse duration '{}'", duration_str))
}

/// Parse `ffprobe -show_format -show_streams` JSON. The first video and first audio stream win.
pub fn parse_ffprobe_info(json: &str) -> Result<MediaInfo> {
    let probe: FfprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON")?;

    let mut info = MediaInfo {
        duration_s: probe.format.duration.as_deref().and_then(parse_seconds),
        bitrate_kbps: probe
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.trim().parse::<u64>().ok())
            .map(|bits| bits / 1000),
        file_size: probe
            .format
            .size
            .as_deref()
            .and_then(|s| s.trim().parse::<u64>().ok()),
        ..MediaInfo::default()
    };

    let first_of = |kind: &str| {
        probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(kind))
    };

    if let Some(video) = first_of("video") {
        info.video_codec = video.codec_name.clone();
        info.width = video.width.filter(|w| *w > 0);
        info.height = video.height.filter(|h| *h > 0);
        info.frame_rate = video
            .r_frame_rate
            .as_deref()
            .and_then(parse_fraction)
            .or_else(|| video.avg_frame_rate.as_deref().and_then(parse_fraction));
    }
    if let Some(audio) = first_of("audio") {
        info.audio_codec = audio.codec_name.clone();
    }

    Ok(info)
}

/// Best-effort media info from ffmpeg's `-i` banner
pub fn parse_info_banner(stderr: &str) -> MediaInfo {
    let mut info = MediaInfo {
        duration_s: parse_duration_banner(stderr),
        bitrate_kbps: BANNER_BITRATE_RE
            .captures(stderr)
            .and_then(|caps| caps[1].parse().ok()),
        ..MediaInfo::default()
    };

    for line in stderr.lines() {
        let Some(caps) = STREAM_CODEC_RE.captures(line) else {
            continue;
        };
        match &caps[1] {
            "Video" if info.video_codec.is_none() => {
                info.video_codec = Some(caps[2].to_string());
                if let Some(res) = RESOLUTION_RE.captures(line) {
                    info.width = res[1].parse().ok();
                    info.height = res[2].parse().ok();
                }
                info.frame_rate = BANNER_FPS_RE
                    .captures(line)
                    .and_then(|fps| fps[1].parse().ok());
            }
            "Audio" if info.audio_codec.is_none() => {
                info.audio_codec = Some(caps[2].to_string());
            }
            _ => {}
        }
    }

    info
}

/// Human-readable byte count, base 1024
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Scrape `Duration: HH:MM:SS.ff` from ffmpeg's input banner
pub fn parse_duration_banner(stderr: &str) -> Option<f64> {
    DURATION_RE
        .captures(stderr)
        .and_then(|caps| parse_clock(&caps[1]))
}

/// Probe a media file's duration in seconds: ffprobe first, ffmpeg's banner as a fallback.
pub fn probe_duration(binary: &FfmpegBinary, input: &Path) -> Result<f64> {
    let mut cmd = Command::new(binary.ffprobe_path());
    cmd.args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(input);

    match run_capture(cmd, MEDIA_PROBE_TIMEOUT).and_then(CapturedOutput::require_success) {
        Ok(output) => match parse_ffprobe_duration(&output.stdout) {
            Ok(duration) => return Ok(duration),
            Err(e) => debug!("ffprobe gave no duration for {}: {:#}", input.display(), e),
        },
        Err(e) => debug!("ffprobe unavailable: {}", e),
    }

    // ffmpeg exits non-zero without an output file; the banner is all we need
    let mut cmd = Command::new(binary.path());
    cmd.arg("-hide_banner").arg("-i").arg(input);
    let output = run_capture(cmd, MEDIA_PROBE_TIMEOUT)
        .with_context(|| format!("Failed to probe {}", input.display()))?;

    parse_duration_banner(&output.stderr)
        .with_context(|| format!("No duration found for {}", input.display()))
}

/// Duration, streams, bitrate and size of a media file: ffprobe first, ffmpeg's banner
/// as a fallback. File size comes from the filesystem when ffprobe does not say.
pub fn probe_media_info(binary: &FfmpegBinary, input: &Path) -> Result<MediaInfo> {
    let mut cmd = Command::new(binary.ffprobe_path());
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
    ])
    .arg(input);

    let probed = match run_capture(cmd, MEDIA_PROBE_TIMEOUT).and_then(CapturedOutput::require_success)
    {
        Ok(output) => match parse_ffprobe_info(&output.stdout) {
            Ok(info) if !info.is_empty() => Some(info),
            Ok(_) => None,
            Err(e) => {
                debug!("ffprobe output unusable for {}: {:#}", input.display(), e);
                None
            }
        },
        Err(e) => {
            debug!("ffprobe unavailable: {}", e);
            None
        }
    };

    let mut info = match probed {
        Some(info) => info,
        None => {
            let mut cmd = Command::new(binary.path());
            cmd.arg("-hide_banner").arg("-i").arg(input);
            let output = run_capture(cmd, MEDIA_PROBE_TIMEOUT)
                .with_context(|| format!("Failed to probe {}", input.display()))?;
            let info = parse_info_banner(&output.stderr);
            if info.is_empty() {
                anyhow::bail!("No media information found for {}", input.display());
            }
            info
        }
    };

    if info.file_size.is_none() {
        info.file_size = std::fs::metadata(input).ok().map(|m| m.len());
    }
    Ok(info)
}
