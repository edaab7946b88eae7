use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;

/// A wall-clock position in a media file, `HH:MM:SS`.
///
/// Hours are unbounded; minutes and seconds must be below 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timecode {
    hours: u32,
    minutes: u8,
    seconds: u8,
}

impl Timecode {
    pub fn new(hours: u32, minutes: u8, seconds: u8) -> Result<Self, EngineError> {
        if minutes >= 60 || seconds >= 60 {
            return Err(EngineError::invalid(format!(
                "minutes and seconds must be below 60, got {}:{}:{}",
                hours, minutes, seconds
            )));
        }
        Ok(Self {
            hours,
            minutes,
            seconds,
        })
    }

    pub fn from_seconds(total: u64) -> Self {
        Self {
            hours: (total / 3600) as u32,
            minutes: ((total % 3600) / 60) as u8,
            seconds: (total % 60) as u8,
        }
    }

    pub fn total_seconds(&self) -> u64 {
        self.hours as u64 * 3600 + self.minutes as u64 * 60 + self.seconds as u64
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        )
    }
}

impl FromStr for Timecode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || EngineError::invalid(format!("expected HH:MM:SS, got '{}'", s));

        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(bad());
        }
        if parts
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(bad());
        }

        let hours = parts[0].parse::<u32>().map_err(|_| bad())?;
        let minutes = parts[1].parse::<u8>().map_err(|_| bad())?;
        let seconds = parts[2].parse::<u8>().map_err(|_| bad())?;
        Self::new(hours, minutes, seconds)
    }
}

/// Parse an ffmpeg clock value (`H:MM:SS` or `H:MM:SS.ff`) into seconds.
pub fn parse_clock(s: &str) -> Option<f64> {
    let mut parts = s.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `HH:MM:SS`, whole seconds (floored).
pub fn format_hms(d: Duration) -> String {
    Timecode::from_seconds(d.as_secs()).to_string()
}

/// `HH:MM:SS.ff`, the way ffmpeg prints `time=`.
pub fn format_clock(d: Duration) -> String {
    let centis = d.subsec_millis() / 10;
    format!("{}.{:02}", format_hms(d), centis)
}
