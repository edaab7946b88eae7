mod ffmpeg_cmd;
mod ffmpeg_info;
mod formats;
mod log;
mod progress;
mod timecode;
mod types;

pub use ffmpeg_cmd::{
    AMF_ENCODER, CommandBuilder, FfmpegCommand, NVENC_ENCODER, SOFTWARE_ENCODER,
    acceleration_args, escape_subtitle_path, quality_args, resolve_encoder,
};
pub use ffmpeg_info::{
    CapturedOutput, FfmpegBinary, MEDIA_PROBE_TIMEOUT, MediaInfo, VERSION_TIMEOUT,
    format_file_size, locate_ffmpeg, parse_duration_banner, parse_ffprobe_duration,
    parse_ffprobe_info, parse_info_banner, parse_version, probe_duration, probe_media_info,
    run_capture,
};
pub use formats::{SUBTITLE_EXTENSIONS, VIDEO_EXTENSIONS, is_subtitle_file, is_video_file};
pub use log::{LOG_FILE_NAME, LogTarget, init_logging};
pub use progress::{LineOutcome, NotifyPolicy, ProgressParser, derive_percentage_and_eta};
pub use timecode::{Timecode, format_clock, format_hms, parse_clock};
pub use types::{
    AccelMode, FontColor, JobState, Operation, OperationKind, OperationRequest, ProgressRecord,
    Quality, color_to_hex,
};
