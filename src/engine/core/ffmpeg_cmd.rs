use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::ffmpeg_info::FfmpegBinary;
use super::types::{AccelMode, Operation, OperationRequest, Quality};
use crate::engine::error::EngineError;
use crate::engine::hardware::{Capability, CapabilitySnapshot, Platform};

/// Software fallback for the h264 family
pub const SOFTWARE_ENCODER: &str = "libx264";
pub const NVENC_ENCODER: &str = "h264_nvenc";
pub const AMF_ENCODER: &str = "h264_amf";

/// A fully resolved encoder invocation: program plus ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Index of the first occurrence of `arg`
    pub fn position(&self, arg: &str) -> Option<usize> {
        self.args.iter().position(|a| a == arg)
    }

    /// Value following `flag`, e.g. `value_of("-c:v")`
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.position(flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Drop every occurrence of `arg`
    pub fn without(mut self, arg: &str) -> Self {
        self.args.retain(|a| a != arg);
        self
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(OsStr::new));
        cmd
    }
}

impl fmt::Display for FfmpegCommand {
    /// Shell-safe rendering for display and dry runs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.program.to_string_lossy();
        let words = std::iter::once(program.as_ref()).chain(self.args.iter().map(String::as_str));
        match shlex::try_join(words) {
            Ok(joined) => f.write_str(&joined),
            // Only fails on NUL bytes; show the raw words instead
            Err(_) => write!(f, "{} {}", program, self.args.join(" ")),
        }
    }
}

/// Turns requests into encoder commands. Pure: no I/O, same input, same output.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    binary: Option<FfmpegBinary>,
    default_quality: Quality,
}

impl CommandBuilder {
    pub fn new(binary: Option<FfmpegBinary>) -> Self {
        Self {
            binary,
            default_quality: Quality::default(),
        }
    }

    pub fn with_default_quality(mut self, quality: Quality) -> Self {
        self.default_quality = quality;
        self
    }

    pub fn default_quality(&self) -> Quality {
        self.default_quality
    }

    pub fn build(
        &self,
        request: &OperationRequest,
        snapshot: &CapabilitySnapshot,
    ) -> Result<FfmpegCommand, EngineError> {
        let binary = self
            .binary
            .as_ref()
            .ok_or_else(|| EngineError::invalid("ffmpeg binary is not set or not verified"))?;

        let mut args: Vec<String> = Vec::new();
        if request.overwrite {
            args.push("-y".to_string());
        }

        // Decode hints must precede the input
        args.extend(acceleration_args(request.accel_mode, snapshot));

        let encoder = resolve_encoder(request.accel_mode, snapshot);

        match &request.operation {
            Operation::RangeExtract { start, end } => {
                if start >= end {
                    return Err(EngineError::invalid(format!(
                        "start {} must be before end {}",
                        start, end
                    )));
                }

                // Input-side seeking: range before -i
                args.extend(["-ss".to_string(), start.to_string()]);
                args.extend(["-to".to_string(), end.to_string()]);
                args.extend(["-i".to_string(), request.input_path.clone()]);

                args.extend(["-c:v".to_string(), encoder.to_string()]);
                let quality = request.quality.unwrap_or(self.default_quality);
                args.extend(quality_args(quality, encoder_mode(encoder)));
            }
            Operation::SubtitleBurn {
                subtitle_path,
                font_size,
                font_color,
            } => {
                if *font_size == 0 {
                    return Err(EngineError::invalid("font size must be positive"));
                }

                args.extend(["-i".to_string(), request.input_path.clone()]);
                args.push("-vf".to_string());
                args.push(format!(
                    "subtitles='{}':force_style='FontSize={},PrimaryColour=&H{}'",
                    escape_subtitle_path(subtitle_path),
                    font_size,
                    font_color.hex()
                ));
                args.extend(["-c:v".to_string(), encoder.to_string()]);
            }
        }

        args.extend(["-c:a".to_string(), "copy".to_string()]);
        args.push(request.output_path.clone());

        Ok(FfmpegCommand::new(binary.path(), args))
    }
}

/// Pick the video encoder. Requested hardware is only honoured when ffmpeg has the encoder;
/// otherwise the request silently degrades to software.
pub fn resolve_encoder(mode: AccelMode, snapshot: &CapabilitySnapshot) -> &'static str {
    match mode {
        AccelMode::Cuda if snapshot.flag(Capability::Nvenc) => NVENC_ENCODER,
        AccelMode::Amd if snapshot.flag(Capability::Amf) => AMF_ENCODER,
        _ => SOFTWARE_ENCODER,
    }
}

/// The mode whose quality table applies to a resolved encoder
fn encoder_mode(encoder: &str) -> AccelMode {
    match encoder {
        NVENC_ENCODER => AccelMode::Cuda,
        AMF_ENCODER => AccelMode::Amd,
        _ => AccelMode::Cpu,
    }
}

/// `-hwaccel` hint for the decoder side, if the mode has a usable one.
pub fn acceleration_args(mode: AccelMode, snapshot: &CapabilitySnapshot) -> Vec<String> {
    let hint = match mode {
        AccelMode::Cuda if snapshot.flag(Capability::Cuda) => Some("cuda"),
        AccelMode::Amd => {
            if snapshot.flag(Capability::Opencl) {
                Some("opencl")
            } else {
                platform_video_accel(snapshot)
            }
        }
        _ => None,
    };

    hint.map(|h| vec!["-hwaccel".to_string(), h.to_string()])
        .unwrap_or_default()
}

fn platform_video_accel(snapshot: &CapabilitySnapshot) -> Option<&'static str> {
    match snapshot.platform {
        Platform::Windows if snapshot.flag(Capability::D3d11va) => Some("d3d11va"),
        Platform::Windows if snapshot.flag(Capability::Dxva2) => Some("dxva2"),
        Platform::Linux if snapshot.flag(Capability::Vaapi) => Some("vaapi"),
        _ => None,
    }
}

/// Encoder parameters for a quality tier
///
/// | mode | low | medium | high |
/// |------|-----|--------|------|
/// | cpu  | fast, crf 28 | medium, crf 23 | slow, crf 18 |
/// | cuda | fast, 3M | medium, 5M | slow, 8M |
/// | amd  | 3M | 5M | 8M |
pub fn quality_args(quality: Quality, mode: AccelMode) -> Vec<String> {
    let args: &[&str] = match (mode, quality) {
        (AccelMode::Cpu, Quality::Low) => &["-preset", "fast", "-crf", "28"],
        (AccelMode::Cpu, Quality::Medium) => &["-preset", "medium", "-crf", "23"],
        (AccelMode::Cpu, Quality::High) => &["-preset", "slow", "-crf", "18"],
        (AccelMode::Cuda, Quality::Low) => &["-preset", "fast", "-b:v", "3M"],
        (AccelMode::Cuda, Quality::Medium) => &["-preset", "medium", "-b:v", "5M"],
        (AccelMode::Cuda, Quality::High) => &["-preset", "slow", "-b:v", "8M"],
        (AccelMode::Amd, Quality::Low) => &["-b:v", "3M"],
        (AccelMode::Amd, Quality::Medium) => &["-b:v", "5M"],
        (AccelMode::Amd, Quality::High) => &["-b:v", "8M"],
    };
    args.iter().map(|s| s.to_string()).collect()
}

/// Make a path safe inside a single-quoted filter argument
pub fn escape_subtitle_path(path: &str) -> String {
    path.replace('\\', "/").replace('\'', "\\'")
}
