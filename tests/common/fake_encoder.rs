//! Stand-ins for ffmpeg: `sh -c` scripts that talk on stderr like the real thing.

use ffcut::engine::{
    Capability, CapabilitySnapshot, EncoderFlags, FfmpegBinary, FfmpegCommand, JobState,
    Platform, ProcessSupervisor, ProgressRecord, SupervisorOptions,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const STATS_20: &str = "frame=   50 fps= 25 q=28.0 size=     256kB time=00:00:02.00 bitrate=1048.6kbits/s speed=2.00x";
pub const STATS_50: &str = "frame=  125 fps= 25 q=28.0 size=     640kB time=00:00:05.00 bitrate=1048.6kbits/s speed=2.00x";

/// Run `script` with `sh -c`; `args` show up as `$@`
pub fn script_command(script: &str, args: &[&str]) -> FfmpegCommand {
    let mut all = vec!["-c".to_string(), script.to_string(), "fake-ffmpeg".to_string()];
    all.extend(args.iter().map(|a| a.to_string()));
    FfmpegCommand::new("sh", all)
}

/// Prints two stats lines the way ffmpeg redraws them, then succeeds
pub fn progress_then_exit(code: i32) -> FfmpegCommand {
    let script = format!(
        "printf 'Input #0, mov,mp4,m4a,3gp,3g2,mj2, from fake.mp4:\\n' >&2; \
         printf '%s\\r' '{STATS_20}' >&2; sleep 0.1; \
         printf '%s\\r' '{STATS_50}' >&2; sleep 0.1; exit {code}"
    );
    script_command(&script, &[])
}

/// Runs until killed; exits on SIGTERM
pub fn long_running() -> FfmpegCommand {
    script_command(
        "trap 'exit 255' TERM; printf '%s\\r' 'frame=1 time=00:00:00.04' >&2; \
         while :; do sleep 0.05; done",
        &[],
    )
}

/// Runs until SIGKILL
pub fn ignores_sigterm() -> FfmpegCommand {
    script_command("trap '' TERM; while :; do sleep 0.05; done", &[])
}

pub fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        grace_period: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        ..SupervisorOptions::default()
    }
}

pub fn fake_binary() -> FfmpegBinary {
    FfmpegBinary::assume("ffmpeg", "test")
}

pub fn snapshot_with(platform: Platform, caps: &[Capability]) -> CapabilitySnapshot {
    let mut flags = EncoderFlags::all_false();
    for cap in caps {
        flags.set(*cap, true);
    }
    CapabilitySnapshot::new(platform, Vec::new(), flags)
}

/// Everything a supervisor told its subscribers, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress(ProgressRecord),
    Status(JobState, String),
}

pub fn record_events(supervisor: &ProcessSupervisor) -> Arc<Mutex<Vec<Event>>> {
    let events = Arc::new(Mutex::new(Vec::new()));

    let sink = events.clone();
    supervisor.on_progress(move |record| {
        sink.lock().unwrap().push(Event::Progress(record.clone()));
    });

    let sink = events.clone();
    supervisor.on_status(move |state, message| {
        sink.lock().unwrap().push(Event::Status(state, message.to_string()));
    });

    events
}

pub fn statuses(events: &[Event]) -> Vec<JobState> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Status(state, _) => Some(*state),
            Event::Progress(_) => None,
        })
        .collect()
}
