// Lifecycle owner for one external encoder process

use chrono::{DateTime, Local};
use std::any::Any;
use std::io::{BufReader, ErrorKind, Read};
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::core::{
    FfmpegCommand, JobState, LineOutcome, NotifyPolicy, ProgressParser, ProgressRecord,
    parse_clock,
};
use super::error::EngineError;

/// Progress subscriber
pub type ProgressCallback = Arc<dyn Fn(&ProgressRecord) + Send + Sync>;

/// State-transition subscriber, with a human-readable message
pub type StatusCallback = Arc<dyn Fn(JobState, &str) + Send + Sync>;

/// ffmpeg flag that suppresses the stats lines we parse
const NOSTATS_FLAG: &str = "-nostats";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorOptions {
    /// Time between SIGTERM and SIGKILL on cancel
    pub grace_period: Duration,
    /// Upper bound on how long the monitor blocks on a read before checking for cancel
    pub poll_interval: Duration,
    pub notify_policy: NotifyPolicy,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            notify_policy: NotifyPolicy::default(),
        }
    }
}

/// Point-in-time copy of a supervisor's state
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorStatus {
    pub state: JobState,
    pub progress: ProgressRecord,
    /// Set only for `Failed`
    pub reason: Option<String>,
    pub label: Option<String>,
    pub run_id: Option<Uuid>,
    pub total_duration_s: Option<f64>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

#[derive(Debug, Default)]
struct Shared {
    state: JobState,
    progress: ProgressRecord,
    reason: Option<String>,
    label: Option<String>,
    total_duration_s: Option<f64>,
    run_id: Option<Uuid>,
    started_at: Option<DateTime<Local>>,
    finished_at: Option<DateTime<Local>>,
}

struct Inner {
    shared: Mutex<Shared>,
    settled: Condvar,
    progress_subs: Mutex<Vec<ProgressCallback>>,
    status_subs: Mutex<Vec<StatusCallback>>,
    options: SupervisorOptions,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    // Subscribers are cloned out so no lock is held while they run. A panicking
    // subscriber does not stop the others; its message is returned.
    fn notify_progress(&self, record: &ProgressRecord) -> Result<(), String> {
        let subs: Vec<ProgressCallback> = lock(&self.progress_subs).clone();
        let mut fault = None;
        for sub in subs {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| sub(record))) {
                let message = format!("progress subscriber panicked: {}", panic_message(&*payload));
                warn!("{}", message);
                fault.get_or_insert(message);
            }
        }
        fault.map_or(Ok(()), Err)
    }

    fn notify_status(&self, state: JobState, message: &str) {
        let subs: Vec<StatusCallback> = lock(&self.status_subs).clone();
        for sub in subs {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| sub(state, message))) {
                warn!(
                    "status subscriber panicked on {}: {}",
                    state,
                    panic_message(&*payload)
                );
            }
        }
    }

    /// Settle a run whose monitor unwound. No-op if the run already reached a terminal state.
    fn settle_after_crash(&self, reason: String) {
        {
            let mut shared = self.shared();
            if shared.state != JobState::Running {
                return;
            }
            shared.state = JobState::Failed;
            shared.reason = Some(reason.clone());
            shared.finished_at = Some(Local::now());
        }
        self.settled.notify_all();
        warn!("{}", reason);
        self.notify_status(JobState::Failed, &reason);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs at most one encoder process at a time and turns its stderr into progress.
///
/// `Idle -> Running -> {Completed, Failed, Cancelled}`; terminal states stay put until
/// `reset` or the next `start`.
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
    cancel: Mutex<Arc<AtomicBool>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::with_options(SupervisorOptions::default())
    }

    pub fn with_options(options: SupervisorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared::default()),
                settled: Condvar::new(),
                progress_subs: Mutex::new(Vec::new()),
                status_subs: Mutex::new(Vec::new()),
                options,
            }),
            cancel: Mutex::new(Arc::new(AtomicBool::new(false))),
            monitor: Mutex::new(None),
        }
    }

    pub fn options(&self) -> SupervisorOptions {
        self.inner.options
    }

    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(&ProgressRecord) + Send + Sync + 'static,
    {
        lock(&self.inner.progress_subs).push(Arc::new(callback));
    }

    pub fn on_status<F>(&self, callback: F)
    where
        F: Fn(JobState, &str) + Send + Sync + 'static,
    {
        lock(&self.inner.status_subs).push(Arc::new(callback));
    }

    /// Expected output length in seconds; enables percentage and ETA.
    /// Survives `start`, cleared by `reset`.
    pub fn set_total_duration(&self, seconds: f64) {
        let mut shared = self.inner.shared();
        shared.total_duration_s = (seconds.is_finite() && seconds > 0.0).then_some(seconds);
    }

    /// Same as `set_total_duration`, from an `HH:MM:SS(.ff)` string. Unparseable input
    /// clears the hint.
    pub fn set_total_duration_str(&self, duration: &str) -> bool {
        match parse_clock(duration) {
            Some(secs) if secs > 0.0 => {
                self.set_total_duration(secs);
                true
            }
            _ => {
                debug!("unparseable duration '{}', total unknown", duration);
                self.inner.shared().total_duration_s = None;
                false
            }
        }
    }

    pub fn state(&self) -> JobState {
        self.inner.shared().state
    }

    pub fn current_state(&self) -> SupervisorStatus {
        let shared = self.inner.shared();
        SupervisorStatus {
            state: shared.state,
            progress: shared.progress.clone(),
            reason: shared.reason.clone(),
            label: shared.label.clone(),
            run_id: shared.run_id,
            total_duration_s: shared.total_duration_s,
            started_at: shared.started_at,
            finished_at: shared.finished_at,
        }
    }

    /// Launch the encoder and return as soon as it is spawned.
    pub fn start(&self, cmd: &FfmpegCommand, label: &str) -> Result<(), EngineError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let run_id = Uuid::new_v4();

        // Claim the Running slot before spawning so concurrent starts are rejected
        {
            let mut shared = self.inner.shared();
            if shared.state == JobState::Running {
                return Err(EngineError::AlreadyRunning {
                    label: shared.label.clone().unwrap_or_default(),
                });
            }
            shared.state = JobState::Running;
            shared.progress = ProgressRecord::default();
            shared.reason = None;
            shared.label = Some(label.to_string());
            shared.run_id = Some(run_id);
            shared.started_at = Some(Local::now());
            shared.finished_at = None;
            *lock(&self.cancel) = cancel.clone();
        }

        // Previous monitor has already settled; reap it unless we are running inside it
        if let Some(handle) = lock(&self.monitor).take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        let cmd = cmd.clone().without(NOSTATS_FLAG);
        let mut command = cmd.to_command();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                let program = cmd.program().display().to_string();
                let reason = format!("failed to start {}: {}", program, source);
                warn!("{}", reason);
                {
                    let mut shared = self.inner.shared();
                    shared.state = JobState::Failed;
                    shared.reason = Some(reason.clone());
                    shared.finished_at = Some(Local::now());
                }
                self.inner.settled.notify_all();
                self.inner.notify_status(JobState::Failed, &reason);
                return Err(EngineError::Spawn { program, source });
            }
        };

        info!("started '{}' (pid {}, run {}): {}", label, child.id(), run_id, cmd);

        let child = ChildGuard(child);
        let inner = self.inner.clone();
        let label = label.to_string();
        let handle = thread::Builder::new()
            .name(format!("ffcut-monitor-{}", run_id))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    monitor(&inner, child, cancel, &label)
                }));
                if let Err(payload) = outcome {
                    inner.settle_after_crash(format!(
                        "monitor for '{}' failed: {}",
                        label,
                        panic_message(&*payload)
                    ));
                }
            });

        match handle {
            Ok(handle) => {
                *lock(&self.monitor) = Some(handle);
                Ok(())
            }
            Err(source) => {
                // The closure was dropped with the failed spawn; its guard killed the child
                let reason = format!("failed to start monitor thread: {}", source);
                warn!("{}", reason);
                {
                    let mut shared = self.inner.shared();
                    shared.state = JobState::Failed;
                    shared.reason = Some(reason.clone());
                    shared.finished_at = Some(Local::now());
                }
                self.inner.settled.notify_all();
                self.inner.notify_status(JobState::Failed, &reason);
                Err(EngineError::Spawn {
                    program: "monitor thread".to_string(),
                    source,
                })
            }
        }
    }

    /// Ask the running process to stop. No-op unless `Running`; safe to call repeatedly.
    pub fn cancel(&self) {
        if self.state() != JobState::Running {
            return;
        }
        let flag = lock(&self.cancel).clone();
        if !flag.swap(true, Ordering::SeqCst) {
            info!("cancel requested");
        }
    }

    /// Block until the current run leaves `Running`. Returns `None` on timeout.
    pub fn wait_for_completion(&self, timeout: Option<Duration>) -> Option<JobState> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut shared = self.inner.shared();
        while shared.state == JobState::Running {
            match deadline {
                None => {
                    shared = self
                        .inner
                        .settled
                        .wait(shared)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    shared = self
                        .inner
                        .settled
                        .wait_timeout(shared, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        Some(shared.state)
    }

    /// Return to `Idle`, cancelling first if a job is running. Clears progress and the
    /// duration hint.
    pub fn reset(&self) {
        if self.state() == JobState::Running {
            self.cancel();
            self.wait_for_completion(None);
        }

        if let Some(handle) = lock(&self.monitor).take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        *self.inner.shared() = Shared::default();
        self.inner.notify_status(JobState::Idle, "reset");
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // Don't leave an orphaned encoder behind
        if self.state() == JobState::Running {
            self.cancel();
            self.wait_for_completion(Some(self.inner.options.grace_period * 2));
        }
    }
}

/// How the monitoring loop ended
enum Exit {
    Status(ExitStatus),
    Cancelled,
    Lost(String),
}

/// Split stderr on `\r` as well as `\n`: ffmpeg redraws its stats line in place.
fn spawn_line_reader<R: Read + Send + 'static>(source: R, tx: Sender<String>) {
    let spawned = thread::Builder::new()
        .name("ffcut-stderr".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(source);
            let mut buf = [0u8; 4096];
            let mut pending: Vec<u8> = Vec::new();
            loop {
                let n = match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                };
                for &byte in &buf[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        if !pending.is_empty() {
                            let line = String::from_utf8_lossy(&pending).to_string();
                            pending.clear();
                            if tx.send(line).is_err() {
                                return;
                            }
                        }
                    } else {
                        pending.push(byte);
                    }
                }
            }
            if !pending.is_empty() {
                let _ = tx.send(String::from_utf8_lossy(&pending).to_string());
            }
        });
    if let Err(e) = spawned {
        warn!("could not start stderr reader: {}", e);
    }
}

/// Kills and reaps the encoder if it is still running when dropped, so an unwinding
/// monitor never leaves it orphaned.
struct ChildGuard(Child);

impl Deref for ChildGuard {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.0
    }
}

impl DerefMut for ChildGuard {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.0
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            warn!("killing orphaned encoder (pid {})", self.0.id());
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }
}

/// Per-run monitor state, owned by the monitor thread
struct RunMonitor {
    inner: Arc<Inner>,
    parser: ProgressParser,
    record: ProgressRecord,
    reason: Option<String>,
    /// Set when a progress subscriber panicked; the run is aborted
    fault: Option<String>,
}

impl RunMonitor {
    fn handle_line(&mut self, line: &str) {
        let total = self.inner.shared().total_duration_s;
        match self.parser.parse_line(line, &mut self.record, total) {
            LineOutcome::Error(text) => {
                debug!("encoder: {}", text);
                // First error wins
                if self.reason.is_none() {
                    self.reason = Some(text);
                }
            }
            LineOutcome::Progress { changed, notify } => {
                if changed {
                    self.inner.shared().progress = self.record.clone();
                }
                if notify {
                    if let Err(fault) = self.inner.notify_progress(&self.record) {
                        self.fault.get_or_insert(fault);
                    }
                }
            }
            LineOutcome::Ignored => {}
        }
    }

    /// Drain whatever the reader still has after the process is gone
    fn drain(&mut self, rx: &Receiver<String>, poll: Duration) {
        while self.fault.is_none() {
            match rx.recv_timeout(poll) {
                Ok(line) => self.handle_line(&line),
                Err(_) => break,
            }
        }
    }
}

fn monitor(inner: &Arc<Inner>, mut child: ChildGuard, cancel: Arc<AtomicBool>, label: &str) {
    inner.notify_status(JobState::Running, &format!("started {}", label));

    let options = inner.options;
    let (tx, rx) = mpsc::channel();
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader(stderr, tx);
    } else {
        drop(tx);
    }

    let mut run = RunMonitor {
        inner: inner.clone(),
        parser: ProgressParser::with_policy(options.notify_policy),
        record: ProgressRecord::default(),
        reason: None,
        fault: None,
    };

    let exit = loop {
        if let Some(fault) = run.fault.clone() {
            let _ = child.kill();
            let _ = child.wait();
            break Exit::Lost(fault);
        }

        if cancel.load(Ordering::SeqCst) {
            terminate(&mut child, options.grace_period, options.poll_interval);
            run.drain(&rx, Duration::ZERO);
            break Exit::Cancelled;
        }

        match rx.recv_timeout(options.poll_interval) {
            Ok(line) => run.handle_line(&line),
            Err(RecvTimeoutError::Timeout) => match child.try_wait() {
                Ok(Some(status)) => {
                    run.drain(&rx, options.poll_interval);
                    break Exit::Status(status);
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break Exit::Lost(format!("lost track of encoder process: {}", e));
                }
            },
            // stderr closed; the process is exiting or already gone
            Err(RecvTimeoutError::Disconnected) => {
                break wait_for_exit(&mut child, &cancel, options);
            }
        }
    };

    // A subscriber fault fails the run even if the encoder got to exit on its own
    let exit = match (run.fault.take(), exit) {
        (_, Exit::Cancelled) => Exit::Cancelled,
        (Some(fault), _) => Exit::Lost(fault),
        (None, exit) => exit,
    };

    let (state, message) = match exit {
        Exit::Cancelled => (JobState::Cancelled, "cancelled".to_string()),
        Exit::Status(status) if status.success() => {
            run.record.percentage = 100.0;
            (JobState::Completed, "completed".to_string())
        }
        Exit::Status(status) => {
            let reason = run.reason.take().unwrap_or_else(|| describe_exit(&status));
            (JobState::Failed, reason)
        }
        Exit::Lost(reason) => (JobState::Failed, run.reason.take().unwrap_or(reason)),
    };

    // Final progress goes out before anyone can observe the terminal state
    inner.shared().progress = run.record.clone();
    let _ = inner.notify_progress(&run.record);

    {
        let mut shared = inner.shared();
        shared.state = state;
        shared.reason = (state == JobState::Failed).then(|| message.clone());
        shared.finished_at = Some(Local::now());
    }
    inner.settled.notify_all();

    match state {
        JobState::Failed => warn!("'{}' failed: {}", label, message),
        _ => info!("'{}' {}", label, message),
    }
    inner.notify_status(state, &message);
}

fn wait_for_exit(child: &mut Child, cancel: &AtomicBool, options: SupervisorOptions) -> Exit {
    loop {
        if cancel.load(Ordering::SeqCst) {
            terminate(child, options.grace_period, options.poll_interval);
            return Exit::Cancelled;
        }
        match child.try_wait() {
            Ok(Some(status)) => return Exit::Status(status),
            Ok(None) => thread::sleep(options.poll_interval),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Exit::Lost(format!("lost track of encoder process: {}", e));
            }
        }
    }
}

/// Graceful stop, escalating to a kill once `grace` has passed.
fn terminate(child: &mut Child, grace: Duration, poll: Duration) {
    request_stop(child);

    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("encoder stopped: {}", status);
                return;
            }
            Ok(None) if Instant::now() >= deadline => break,
            Ok(None) => thread::sleep(poll.min(Duration::from_millis(50))),
            Err(_) => break,
        }
    }

    warn!(
        "encoder (pid {}) ignored stop request for {:?}, killing",
        child.id(),
        grace
    );
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
fn request_stop(child: &mut Child) {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        let _ = child.kill();
        return;
    };
    // SAFETY: plain signal delivery to a child we own and have not reaped yet
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!("SIGTERM to pid {} failed", pid);
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn describe_exit(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => format!("process exited with code {}", code),
        (None, Some(signal)) => format!("process terminated by signal {}", signal),
        (None, None) => format!("process exited: {}", status),
    }
}

#[cfg(not(unix))]
fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("process exited with code {}", code),
        None => format!("process exited: {}", status),
    }
}
