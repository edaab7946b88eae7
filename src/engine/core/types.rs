use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::timecode::{Timecode, format_clock, format_hms};
use crate::engine::error::EngineError;

/// Which hardware path the command builder targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelMode {
    Cuda,
    Amd,
    Cpu,
}

impl AccelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cuda => "cuda",
            Self::Amd => "amd",
            Self::Cpu => "cpu",
        }
    }
}

impl fmt::Display for AccelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccelMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" | "nvidia" => Ok(Self::Cuda),
            "amd" => Ok(Self::Amd),
            "cpu" => Ok(Self::Cpu),
            other => Err(EngineError::invalid(format!(
                "unknown acceleration mode '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

impl FromStr for Quality {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(EngineError::invalid(format!("unknown quality '{}'", other))),
        }
    }
}

/// Subtitle font palette. Resolution from a name is total: anything unknown is white.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontColor {
    #[default]
    White,
    Black,
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
}

impl FontColor {
    pub const ALL: [FontColor; 8] = [
        Self::White,
        Self::Black,
        Self::Red,
        Self::Green,
        Self::Blue,
        Self::Yellow,
        Self::Cyan,
        Self::Magenta,
    ];

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "black" => Self::Black,
            "red" => Self::Red,
            "green" => Self::Green,
            "blue" => Self::Blue,
            "yellow" => Self::Yellow,
            "cyan" => Self::Cyan,
            "magenta" => Self::Magenta,
            _ => Self::White,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Yellow => "yellow",
            Self::Cyan => "cyan",
            Self::Magenta => "magenta",
        }
    }

    /// Six hex digits, RRGGBB
    pub fn hex(&self) -> &'static str {
        match self {
            Self::White => "FFFFFF",
            Self::Black => "000000",
            Self::Red => "FF0000",
            Self::Green => "00FF00",
            Self::Blue => "0000FF",
            Self::Yellow => "FFFF00",
            Self::Cyan => "00FFFF",
            Self::Magenta => "FF00FF",
        }
    }
}

/// Resolve a free-text color name to its hex value, falling back to white.
pub fn color_to_hex(name: &str) -> &'static str {
    FontColor::from_name(name).hex()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    RangeExtract,
    SubtitleBurn,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RangeExtract => "range extract",
            Self::SubtitleBurn => "subtitle burn",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    RangeExtract {
        start: Timecode,
        end: Timecode,
    },
    SubtitleBurn {
        subtitle_path: String,
        font_size: u32,
        font_color: FontColor,
    },
}

/// One job's worth of intent. Paths are passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub operation: Operation,
    pub input_path: String,
    pub output_path: String,
    pub accel_mode: AccelMode,
    /// `None` uses the builder's configured default. Ignored for subtitle burns.
    pub quality: Option<Quality>,
    pub overwrite: bool,
}

impl OperationRequest {
    pub fn range_extract(
        input_path: impl Into<String>,
        output_path: impl Into<String>,
        start: Timecode,
        end: Timecode,
    ) -> Self {
        Self {
            operation: Operation::RangeExtract { start, end },
            input_path: input_path.into(),
            output_path: output_path.into(),
            accel_mode: AccelMode::Cpu,
            quality: None,
            overwrite: false,
        }
    }

    pub fn subtitle_burn(
        input_path: impl Into<String>,
        subtitle_path: impl Into<String>,
        output_path: impl Into<String>,
        font_size: u32,
        font_color: FontColor,
    ) -> Self {
        Self {
            operation: Operation::SubtitleBurn {
                subtitle_path: subtitle_path.into(),
                font_size,
                font_color,
            },
            input_path: input_path.into(),
            output_path: output_path.into(),
            accel_mode: AccelMode::Cpu,
            quality: None,
            overwrite: false,
        }
    }

    pub fn with_accel(mut self, mode: AccelMode) -> Self {
        self.accel_mode = mode;
        self
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn kind(&self) -> OperationKind {
        match self.operation {
            Operation::RangeExtract { .. } => OperationKind::RangeExtract,
            Operation::SubtitleBurn { .. } => OperationKind::SubtitleBurn,
        }
    }

    /// Expected output length in seconds, when it can be known from the request alone.
    pub fn expected_duration_s(&self) -> Option<f64> {
        match &self.operation {
            Operation::RangeExtract { start, end } => {
                let secs = end.total_seconds().saturating_sub(start.total_seconds());
                (secs > 0).then_some(secs as f64)
            }
            Operation::SubtitleBurn { .. } => None,
        }
    }

    /// Short human-readable job label
    pub fn label(&self) -> String {
        let name = std::path::Path::new(&self.input_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.input_path.clone());
        format!("{} {}", self.kind(), name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Live telemetry for one run. `None` fields are unknown.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgressRecord {
    /// 0..=100
    pub percentage: f64,
    pub time_processed: Option<Duration>,
    pub speed: Option<f64>,
    /// Literal value as printed by ffmpeg, unit included (`1677.7kbits/s`)
    pub bitrate: Option<String>,
    pub fps: Option<f64>,
    pub frames_decoded: u64,
    pub eta: Option<Duration>,
}

impl ProgressRecord {
    pub fn time_processed_display(&self) -> String {
        self.time_processed
            .map(format_clock)
            .unwrap_or_else(|| "00:00:00.00".to_string())
    }

    pub fn eta_display(&self) -> String {
        self.eta
            .map(format_hms)
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn speed_display(&self) -> String {
        self.speed
            .map(|s| format!("{:.2}x", s))
            .unwrap_or_else(|| "N/A".to_string())
    }
}
