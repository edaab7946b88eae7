use anyhow::{Context, Result, bail};
use ffcut::config::{AccelPreference, Config};
use ffcut::engine::{
    self, AccelMode, CapabilityProbe, CapabilitySnapshot, CommandBuilder, FfmpegBinary, FontColor,
    JobState, LogTarget, OperationRequest, ProcessSupervisor, ProgressRecord, Quality, Timecode,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{info, warn};

use crate::cli::{Cli, Commands, RunArgs};

/// Everything a command needs that comes from flags or config rather than the command itself
struct AppContext {
    config: Config,
    ffmpeg_override: Option<PathBuf>,
}

impl AppContext {
    fn ffmpeg_hint(&self) -> Option<PathBuf> {
        self.ffmpeg_override
            .clone()
            .or_else(|| self.config.encoder.ffmpeg_path())
    }

    fn locate(&self) -> Option<FfmpegBinary> {
        engine::locate_ffmpeg(self.ffmpeg_hint().as_deref())
    }

    fn require_ffmpeg(&self) -> Result<FfmpegBinary> {
        self.locate().context(
            "ffmpeg not found. Install it, put it on PATH, or pass --ffmpeg / set encoder.ffmpeg_path",
        )
    }

    fn probe(&self, binary: Option<&FfmpegBinary>) -> CapabilitySnapshot {
        let probe = CapabilityProbe::new(binary.map(|b| b.path().to_path_buf()))
            .with_timeout(self.config.encoder.probe_timeout());
        probe.probe().as_ref().clone()
    }
}

pub fn run(cli: Cli) {
    let target = match (&cli.log_file, cli.log_stderr) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, true) => LogTarget::Stderr,
        (None, false) => LogTarget::default_file().unwrap_or(LogTarget::Stderr),
    };
    if let Err(e) = engine::init_logging(&target, cli.verbose) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    if let Commands::InitConfig = cli.command {
        handle_init_config(cli.config.as_deref());
        return;
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    };

    let ctx = AppContext {
        config,
        ffmpeg_override: cli.ffmpeg.clone(),
    };

    let result = match cli.command {
        Commands::CheckFfmpeg => handle_check_ffmpeg(&ctx),
        Commands::Probe { json } => handle_probe(&ctx, json),
        Commands::Info { file, json } => handle_info(&ctx, &file, json),
        Commands::Cut {
            input,
            output,
            start,
            end,
            quality,
            run,
        } => handle_cut(&ctx, &input, &output, &start, &end, quality.as_deref(), &run),
        Commands::Burn {
            input,
            subtitles,
            output,
            font_size,
            font_color,
            run,
        } => handle_burn(
            &ctx,
            &input,
            &subtitles,
            &output,
            font_size,
            font_color.as_deref(),
            &run,
        ),
        Commands::InitConfig => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn handle_check_ffmpeg(ctx: &AppContext) -> Result<()> {
    let binary = ctx.require_ffmpeg()?;
    println!("ffmpeg found: {} ({})", binary.version(), binary.path().display());

    let ffprobe = binary.ffprobe_path();
    let mut cmd = std::process::Command::new(&ffprobe);
    cmd.arg("-version");
    match engine::run_capture(cmd, engine::VERSION_TIMEOUT) {
        Ok(out) if out.status.success() => println!("ffprobe found: {}", ffprobe.display()),
        _ => println!(
            "ffprobe not found at {} (durations fall back to ffmpeg)",
            ffprobe.display()
        ),
    }
    Ok(())
}

fn handle_probe(ctx: &AppContext, json: bool) -> Result<()> {
    let binary = ctx.locate();
    if binary.is_none() {
        warn!("ffmpeg not found; encoder flags will all be false");
    }
    let snapshot = ctx.probe(binary.as_ref());
    let recommended = snapshot.recommend();

    if json {
        let value = serde_json::json!({
            "snapshot": snapshot,
            "recommended": recommended.as_str(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialize snapshot")?
        );
        return Ok(());
    }

    println!("Platform: {:?}", snapshot.platform);
    println!("Devices:");
    if snapshot.hardware_devices.is_empty() {
        println!("  (none detected)");
    }
    for device in &snapshot.hardware_devices {
        print!("  {} [{}]", device.name, device.vendor);
        if let Some(bytes) = device.memory_bytes {
            print!(" {} MiB", bytes / (1024 * 1024));
        }
        if let Some(driver) = &device.driver_version {
            print!(" driver {}", driver);
        }
        println!();
    }
    println!("ffmpeg support:");
    for (cap, supported) in snapshot.encoder_flags.iter() {
        println!("  {:<8} {}", cap.as_str(), if supported { "yes" } else { "no" });
    }
    println!("Recommended mode: {}", recommended);
    Ok(())
}

fn handle_info(ctx: &AppContext, file: &Path, json: bool) -> Result<()> {
    let binary = ctx.require_ffmpeg()?;
    let info = engine::probe_media_info(&binary, file)?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialize media info")?
        );
        return Ok(());
    }

    let unknown = || "unknown".to_string();
    println!("{}", file.display());
    println!(
        "  Duration:    {}",
        info.duration_s.map(format_duration).unwrap_or_else(unknown)
    );
    println!("  Resolution:  {}", info.resolution().unwrap_or_else(unknown));
    println!(
        "  Video codec: {}",
        info.video_codec.clone().unwrap_or_else(unknown)
    );
    println!(
        "  Audio codec: {}",
        info.audio_codec.clone().unwrap_or_else(unknown)
    );
    println!(
        "  Bitrate:     {}",
        info.bitrate_kbps
            .map(|kbps| format!("{} kb/s", kbps))
            .unwrap_or_else(unknown)
    );
    println!(
        "  Frame rate:  {}",
        info.frame_rate
            .map(|fps| format!("{:.2} fps", fps))
            .unwrap_or_else(unknown)
    );
    println!(
        "  File size:   {}",
        info.file_size
            .map(engine::format_file_size)
            .unwrap_or_else(unknown)
    );
    Ok(())
}

/// `HH:MM:SS (N.NNs)`, or just the seconds when they do not fit a `Duration`
fn format_duration(seconds: f64) -> String {
    match std::time::Duration::try_from_secs_f64(seconds) {
        Ok(d) => format!("{} ({:.2}s)", engine::format_clock(d), seconds),
        Err(_) => format!("{}s", seconds),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn resolve_accel(
    ctx: &AppContext,
    requested: Option<&str>,
    binary: Option<&FfmpegBinary>,
) -> Result<(AccelMode, CapabilitySnapshot)> {
    let preference = match requested {
        Some(text) => text.parse::<AccelPreference>()?,
        None => ctx.config.defaults.accel_mode,
    };

    // Plain CPU runs need no hardware introspection
    if preference == AccelPreference::Cpu {
        return Ok((AccelMode::Cpu, CapabilitySnapshot::empty()));
    }

    let snapshot = ctx.probe(binary);
    let mode = preference.resolve(&snapshot);
    info!("acceleration: requested {:?}, using {}", preference, mode);
    Ok((mode, snapshot))
}

fn handle_cut(
    ctx: &AppContext,
    input: &Path,
    output: &Path,
    start: &str,
    end: &str,
    quality: Option<&str>,
    run: &RunArgs,
) -> Result<()> {
    let start: Timecode = start.parse().context("Invalid --start")?;
    let end: Timecode = end.parse().context("Invalid --end")?;
    warn_if_not_video(input);

    let binary = ctx.locate();
    let (mode, snapshot) = resolve_accel(ctx, run.accel.as_deref(), binary.as_ref())?;

    let mut request = OperationRequest::range_extract(path_arg(input), path_arg(output), start, end)
        .with_accel(mode)
        .with_overwrite(run.overwrite || ctx.config.defaults.overwrite);
    if let Some(quality) = quality {
        request = request.with_quality(quality.parse::<Quality>()?);
    }

    execute(ctx, binary, &request, &snapshot, request.expected_duration_s(), run)
}

fn handle_burn(
    ctx: &AppContext,
    input: &Path,
    subtitles: &Path,
    output: &Path,
    font_size: Option<u32>,
    font_color: Option<&str>,
    run: &RunArgs,
) -> Result<()> {
    warn_if_not_video(input);
    if !engine::is_subtitle_file(subtitles) {
        warn!("{} does not look like a subtitle file", subtitles.display());
        eprintln!(
            "Warning: {} does not have a known subtitle extension",
            subtitles.display()
        );
    }

    let defaults = &ctx.config.defaults;
    let color = font_color
        .map(FontColor::from_name)
        .unwrap_or_else(|| defaults.font_color());

    let binary = ctx.locate();
    let (mode, snapshot) = resolve_accel(ctx, run.accel.as_deref(), binary.as_ref())?;

    let request = OperationRequest::subtitle_burn(
        path_arg(input),
        path_arg(subtitles),
        path_arg(output),
        font_size.unwrap_or(defaults.subtitle_font_size),
        color,
    )
    .with_accel(mode)
    .with_overwrite(run.overwrite || defaults.overwrite);

    // Output runs as long as the input; ask ffprobe unless this is a dry run
    let total = match (&binary, run.dry_run) {
        (Some(binary), false) => match engine::probe_duration(binary, input) {
            Ok(seconds) => Some(seconds),
            Err(e) => {
                warn!("could not determine duration, progress will be time-only: {:#}", e);
                None
            }
        },
        _ => None,
    };

    execute(ctx, binary, &request, &snapshot, total, run)
}

fn warn_if_not_video(input: &Path) {
    if !engine::is_video_file(input) {
        warn!("{} does not look like a video file", input.display());
        eprintln!(
            "Warning: {} does not have a known video extension",
            input.display()
        );
    }
}

fn execute(
    ctx: &AppContext,
    binary: Option<FfmpegBinary>,
    request: &OperationRequest,
    snapshot: &CapabilitySnapshot,
    total_duration_s: Option<f64>,
    run: &RunArgs,
) -> Result<()> {
    let builder = CommandBuilder::new(binary).with_default_quality(ctx.config.defaults.quality);
    let cmd = builder.build(request, snapshot)?;

    if run.dry_run {
        println!("{}", cmd);
        return Ok(());
    }

    let supervisor = ProcessSupervisor::with_options(ctx.config.supervisor.options());
    if let Some(total) = total_duration_s {
        supervisor.set_total_duration(total);
    }
    supervisor.on_progress(print_progress);

    let label = request.label();
    supervisor.start(&cmd, &label)?;

    let state = supervisor
        .wait_for_completion(None)
        .unwrap_or(JobState::Failed);
    println!();

    let status = supervisor.current_state();
    match state {
        JobState::Completed => {
            println!("Done: {}", request.output_path);
            Ok(())
        }
        JobState::Cancelled => bail!("{} was cancelled", label),
        _ => bail!(
            "{} failed: {}",
            label,
            status.reason.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

fn print_progress(record: &ProgressRecord) {
    let mut out = std::io::stdout().lock();
    let _ = write!(
        out,
        "\r{:>5.1}%  time {}  speed {}  eta {}    ",
        record.percentage,
        record.time_processed_display(),
        record.speed_display(),
        record.eta_display()
    );
    let _ = out.flush();
}

fn handle_init_config(path: Option<&Path>) {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match Config::config_path() {
            Ok(path) => path,
            Err(e) => {
                eprintln!("Config path unknown: {:#}", e);
                process::exit(1);
            }
        },
    };

    if !path.exists() {
        println!("No config at {}, creating default config...", path.display());
        if let Err(err) = Config::default().save_to(&path) {
            eprintln!("Failed to save default config: {:#}", err);
            process::exit(1);
        }
        println!("Default config saved to {}", path.display());
        return;
    }

    match Config::load_from(&path) {
        Ok(cfg) => {
            println!("Config loaded successfully from {}", path.display());
            println!("{:#?}", cfg);
        }
        Err(e) => {
            eprintln!("Config invalid: {:#}", e);
            process::exit(1);
        }
    }
}
