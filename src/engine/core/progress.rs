//! Scraper for ffmpeg's stats lines on stderr.
//!
//! ```text
//! frame=  123 fps= 25 q=28.0 size=    1024kB time=00:00:05.00 bitrate=1677.7kbits/s speed=1.23x
//! ```
//!
//! Every rule is a pattern match with a "no match, keep the previous value" fallback.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use super::timecode::parse_clock;
use super::types::ProgressRecord;

const ERROR_KEYWORDS: &[&str] = &["error", "failed", "invalid", "could not"];
const PROGRESS_MARKERS: &[&str] = &["frame=", "time=", "size=", "bitrate="];

static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=\s*(\d{1,2}:\d{2}:\d{2}(?:\.\d{1,2})?)").expect("valid time regex")
});
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"speed=\s*([0-9.]+)x").expect("valid speed regex"));
static BITRATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bitrate=\s*([0-9.]+(?:kbits/s|bits/s))").expect("valid bitrate regex")
});
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fps=\s*([0-9.]+)").expect("valid fps regex"));
static FRAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").expect("valid frame regex"));

/// When a mutated record is worth telling subscribers about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Only lines that carry a time marker or a non-zero frame count
    #[default]
    TimeOrFrame,
    /// Any line that changed a field
    AnyChange,
}

/// What one diagnostic line turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Not a stats line, or nothing extractable
    Ignored,
    /// Matched the error heuristic; the full line is the candidate failure reason
    Error(String),
    /// Fields were extracted; `notify` says whether subscribers should hear about it
    Progress { changed: bool, notify: bool },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressParser {
    policy: NotifyPolicy,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: NotifyPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> NotifyPolicy {
        self.policy
    }

    /// Parse one line into `record`. `total_s` is the expected output length, if known.
    pub fn parse_line(
        &self,
        line: &str,
        record: &mut ProgressRecord,
        total_s: Option<f64>,
    ) -> LineOutcome {
        let line = line.trim();
        if line.is_empty() {
            return LineOutcome::Ignored;
        }

        let lower = line.to_lowercase();
        if ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) {
            return LineOutcome::Error(line.to_string());
        }

        if !PROGRESS_MARKERS.iter().any(|m| line.contains(m)) {
            return LineOutcome::Ignored;
        }

        let before = record.clone();
        let mut saw_time = false;

        if !line.contains("time=N/A") {
            if let Some(secs) = TIME_RE
                .captures(line)
                .and_then(|caps| parse_clock(&caps[1]))
            {
                record.time_processed = Some(Duration::from_secs_f64(secs));
                saw_time = true;
            }
        }

        if line.contains("speed=N/A") {
            record.speed = None;
        } else if let Some(speed) = SPEED_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<f64>().ok())
        {
            record.speed = Some(speed);
        }

        if let Some(caps) = BITRATE_RE.captures(line) {
            record.bitrate = Some(caps[1].to_string());
        }

        if let Some(fps) = FPS_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<f64>().ok())
        {
            record.fps = Some(fps);
        }

        if let Some(frame) = FRAME_RE
            .captures(line)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        {
            record.frames_decoded = frame;
        }

        derive_percentage_and_eta(record, total_s);

        let changed = *record != before;
        let notify = changed
            && match self.policy {
                NotifyPolicy::TimeOrFrame => saw_time || record.frames_decoded > 0,
                NotifyPolicy::AnyChange => true,
            };

        LineOutcome::Progress { changed, notify }
    }
}

/// Recompute `percentage` and `eta`; leaves both untouched when inputs are missing.
pub fn derive_percentage_and_eta(record: &mut ProgressRecord, total_s: Option<f64>) {
    let Some(total) = total_s.filter(|t| *t > 0.0) else {
        return;
    };
    let Some(processed) = record
        .time_processed
        .map(|t| t.as_secs_f64())
        .filter(|p| *p > 0.0)
    else {
        return;
    };

    record.percentage = (processed / total * 100.0).min(100.0);

    if record.percentage > 0.0 {
        if let Some(speed) = record.speed.filter(|s| *s > 0.0) {
            let remaining = ((total - processed) / speed).max(0.0);
            if remaining.is_finite() {
                record.eta = Some(Duration::from_secs(remaining.floor() as u64));
            }
        }
    }
}
