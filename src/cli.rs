use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ffcut")]
#[command(about = "Clip extraction and subtitle burn-in on top of ffmpeg", long_about = None)]
pub struct Cli {
    /// Path to the ffmpeg binary (overrides config and auto-detection)
    #[arg(long, global = true, value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write logs here instead of ffcut.log in the current directory
    #[arg(long, global = true, value_name = "PATH", conflicts_with = "log_stderr")]
    pub log_file: Option<PathBuf>,

    /// Log to stderr instead of a file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that runs the encoder
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Hardware path: auto, cuda, amd or cpu (defaults to config)
    #[arg(long, value_name = "MODE")]
    pub accel: Option<String>,

    /// Overwrite the output file if it exists
    #[arg(long)]
    pub overwrite: bool,

    /// Print the ffmpeg command without running it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Locate and verify the ffmpeg binary
    CheckFfmpeg,

    /// Show detected GPUs, ffmpeg hardware support and the recommended mode
    Probe {
        /// Print the capability snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a media file's duration, streams, bitrate and size
    Info {
        /// Path to the video file
        file: PathBuf,

        /// Print the media info as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract the range [start, end) into a new file
    Cut {
        input: PathBuf,
        output: PathBuf,

        /// Range start, HH:MM:SS
        #[arg(long)]
        start: String,

        /// Range end, HH:MM:SS
        #[arg(long)]
        end: String,

        /// low, medium or high (defaults to config)
        #[arg(long)]
        quality: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Render a subtitle file into the video
    Burn {
        input: PathBuf,
        subtitles: PathBuf,
        output: PathBuf,

        /// Font size in points (defaults to config)
        #[arg(long)]
        font_size: Option<u32>,

        /// white, black, red, green, blue, yellow, cyan or magenta (defaults to config)
        #[arg(long)]
        font_color: Option<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}
