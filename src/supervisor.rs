//! Supervision of the single server process.
//!
//! The supervisor owns the child, its stdin, and the [`LineStreamer`] that
//! drains its merged output. Everything that waits on the server is expressed
//! through [`ProcessSupervisor::wait_for_line`], a poll loop over log lines that
//! gives up on timeout or when the process dies.

use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::streamer::{LineStreamer, LogLine};
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

/// Startup timeout before scaling.
pub const BASE_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);
/// Graceful shutdown timeout before scaling.
pub const BASE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound on a single queue poll inside `wait_for_line`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Substring of the line the server prints once it accepts commands.
pub const READY_MARKER: &str = "Done";
/// Command asking the server to save and exit.
pub const STOP_COMMAND: &str = "stop";
/// How long output may keep draining after the process is seen to exit.
pub const EXIT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Program and arguments used to launch the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Lifecycle of the supervisor. A failed start falls back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Verdict of a line predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMatch {
    /// Keep waiting.
    Continue,
    /// Stop waiting; the awaited condition holds.
    Accept,
    /// Stop waiting; the line proves the condition will never hold.
    Reject,
}

/// How a `wait_for_line` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Matched,
    Rejected,
    TimedOut,
    ProcessExited,
}

impl WaitOutcome {
    pub fn is_matched(self) -> bool {
        self == WaitOutcome::Matched
    }
}

/// Timeouts and protocol strings for a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub poll_interval: Duration,
    pub ready_marker: String,
    pub stop_command: String,
    /// Mirror server output to the log.
    pub mirror_output: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            startup_timeout: BASE_STARTUP_TIMEOUT,
            shutdown_timeout: BASE_SHUTDOWN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            ready_marker: READY_MARKER.to_string(),
            stop_command: STOP_COMMAND.to_string(),
            mirror_output: false,
        }
    }
}

impl SupervisorOptions {
    /// Scaled timeouts and mirroring taken from the benchmark config.
    pub fn from_config(config: &BenchConfig) -> Self {
        Self {
            startup_timeout: config.scaled(BASE_STARTUP_TIMEOUT),
            shutdown_timeout: config.scaled(BASE_SHUTDOWN_TIMEOUT),
            mirror_output: config.debug_mode,
            ..Self::default()
        }
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Shared record of the live child's pid, for the termination handler.
#[derive(Debug, Clone, Default)]
pub struct ActiveChild(Arc<Mutex<Option<u32>>>);

impl ActiveChild {
    pub fn pid(&self) -> Option<u32> {
        *self.slot()
    }

    fn slot(&self) -> MutexGuard<'_, Option<u32>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, pid: u32) {
        *self.slot() = Some(pid);
    }

    fn clear(&self) {
        *self.slot() = None;
    }

    /// Force-kill the registered child, if any. Returns whether a kill was sent.
    ///
    /// The slot stays locked while the signal is sent, so the pid cannot be
    /// reaped and recycled in between.
    pub fn kill(&self) -> bool {
        let mut slot = self.slot();
        let Some(pid) = slot.take() else {
            return false;
        };
        kill_pid(pid)
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed to kill server");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_pid(pid: u32) -> bool {
    tracing::warn!(pid, "cannot kill server by pid on this platform");
    false
}

/// Everything tied to one live child. Dropping it releases all of it.
///
/// Every reap goes through this handle and unregisters the pid from
/// `active` first, so the termination hook never signals a recycled pid.
struct ProcessHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    streamer: LineStreamer,
    active: ActiveChild,
}

impl ProcessHandle {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    /// `try_wait` with the pid slot held, cleared if the child was reaped.
    fn try_exit(&mut self) -> std::io::Result<Option<ExitStatus>> {
        let mut slot = self.active.slot();
        let status = self.child.try_wait()?;
        if status.is_some() {
            *slot = None;
        }
        Ok(status)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.try_exit(), Ok(None))
    }

    fn force_kill(&mut self) {
        if self.is_alive() {
            if let Err(e) = self.child.kill() {
                tracing::warn!(pid = self.pid(), error = %e, "failed to kill server");
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // Closing stdin first lets a well-behaved server see EOF.
        drop(self.stdin.take());
        self.force_kill();
        self.active.clear();
        if let Err(e) = self.child.wait() {
            tracing::warn!(error = %e, "failed to reap server process");
        }
        self.streamer.close();
    }
}

/// Owns the lifecycle of exactly one server process at a time.
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    state: SupervisorState,
    handle: Option<ProcessHandle>,
    active: ActiveChild,
    last_exit: Option<ExitStatus>,
}

impl ProcessSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        Self {
            options,
            state: SupervisorState::Idle,
            handle: None,
            active: ActiveChild::default(),
            last_exit: None,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Handle to pass to the termination hook.
    pub fn active_child(&self) -> ActiveChild {
        self.active.clone()
    }

    /// Pid of the supervised process, if one is attached.
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(ProcessHandle::pid)
    }

    /// Exit status observed for the most recent process, if it has exited.
    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    /// Launch the server in `dir` and block until it prints the ready marker.
    ///
    /// On any failure the process is killed, everything is released, and the
    /// supervisor is back in `Idle`.
    pub fn start(&mut self, command: &LaunchCommand, dir: &Path) -> Result<()> {
        if self.handle.is_some() {
            tracing::warn!("start requested while a server is attached; killing it first");
            self.stop(true);
        }

        self.state = SupervisorState::Starting;
        self.last_exit = None;
        tracing::info!(command = %command, dir = %dir.display(), "starting server");

        let (mut child, output) = match spawn_merged(command, dir) {
            Ok(spawned) => spawned,
            Err(source) => {
                self.state = SupervisorState::Idle;
                return Err(BenchError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
        };

        let streamer = match LineStreamer::spawn(output, self.options.mirror_output) {
            Ok(s) => s,
            Err(source) => {
                let _ = child.kill();
                let _ = child.wait();
                self.state = SupervisorState::Idle;
                return Err(BenchError::Spawn {
                    program: command.program.clone(),
                    source,
                });
            }
        };

        let stdin = child.stdin.take();
        self.active.set(child.id());
        self.handle = Some(ProcessHandle {
            child,
            stdin,
            streamer,
            active: self.active.clone(),
        });

        let marker = self.options.ready_marker.clone();
        let timeout = self.options.startup_timeout;
        let outcome = self.wait_for_line(Some(timeout), |line| {
            if line.contains(marker.as_str()) {
                LineMatch::Accept
            } else {
                LineMatch::Continue
            }
        });

        match outcome {
            WaitOutcome::Matched => {
                self.state = SupervisorState::Running;
                tracing::info!(pid = ?self.pid(), "server is ready");
                Ok(())
            }
            WaitOutcome::TimedOut => {
                self.stop(true);
                Err(BenchError::StartupTimeout(timeout))
            }
            WaitOutcome::ProcessExited | WaitOutcome::Rejected => {
                self.stop(true);
                Err(BenchError::ExitedDuringStartup)
            }
        }
    }

    /// Write one command line to the server's stdin.
    pub fn send_command(&mut self, command: &str) -> Result<()> {
        let running = self.state == SupervisorState::Running && self.is_running();
        let stdin = match self.handle.as_mut().and_then(|h| h.stdin.as_mut()) {
            Some(stdin) if running => stdin,
            _ => {
                tracing::error!(command, "cannot send command: server is not running");
                return Err(BenchError::NotRunning);
            }
        };

        tracing::debug!(command, "sending command");
        write_line(stdin, command).map_err(|e| {
            tracing::error!(command, error = %e, "failed to write command");
            BenchError::io("<server stdin>", e)
        })
    }

    /// Whether a server is attached and has not exited.
    pub fn is_running(&mut self) -> bool {
        let Some(handle) = self.handle.as_mut() else {
            return false;
        };
        match handle.try_exit() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.last_exit = Some(status);
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to query server status");
                false
            }
        }
    }

    /// Feed log lines to `predicate` until it accepts or rejects one, the
    /// process dies, or `timeout` elapses.
    ///
    /// `None` or a zero timeout waits for as long as the process lives. Lines
    /// already queued are evaluated before liveness is considered, so nothing
    /// printed before an exit is missed.
    pub fn wait_for_line<F>(&mut self, timeout: Option<Duration>, mut predicate: F) -> WaitOutcome
    where
        F: FnMut(&LogLine) -> LineMatch,
    {
        // A timeout too large to represent as an instant is no deadline at all.
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .and_then(|t| Instant::now().checked_add(t));
        let poll_interval = self.options.poll_interval;
        let mut exited_at: Option<Instant> = None;

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return WaitOutcome::TimedOut;
                    }
                    remaining.min(poll_interval)
                }
                None => poll_interval,
            };

            let line = match self.handle.as_ref() {
                Some(handle) => handle.streamer.poll(wait),
                None => return WaitOutcome::ProcessExited,
            };

            match line {
                Some(line) => match predicate(&line) {
                    LineMatch::Continue => {}
                    LineMatch::Accept => return WaitOutcome::Matched,
                    LineMatch::Reject => return WaitOutcome::Rejected,
                },
                None => {
                    if exited_at.is_none() && !self.is_running() {
                        exited_at = Some(Instant::now());
                    }
                    // The reader may still hold lines written just before the exit.
                    if let Some(at) = exited_at {
                        let drained = self
                            .handle
                            .as_ref()
                            .map_or(true, |h| h.streamer.is_exhausted());
                        if drained || at.elapsed() >= EXIT_DRAIN_GRACE {
                            tracing::debug!(status = ?self.last_exit, "server exited while waiting");
                            return WaitOutcome::ProcessExited;
                        }
                    }
                }
            }
        }
    }

    /// Stop the server and release every resource tied to it.
    ///
    /// With `forcible` unset, the stop command is sent and the process gets the
    /// shutdown timeout to exit on its own before it is killed. Calling this with
    /// nothing attached is a no-op.
    pub fn stop(&mut self, forcible: bool) {
        let Some(mut handle) = self.handle.take() else {
            self.state = SupervisorState::Idle;
            return;
        };
        self.state = SupervisorState::Stopping;
        let pid = handle.pid();

        if handle.is_alive() {
            if forcible {
                tracing::info!(pid, "killing server");
                handle.force_kill();
            } else {
                self.stop_gracefully(&mut handle);
            }
        }

        if let Ok(Some(status)) = handle.try_exit() {
            self.last_exit = Some(status);
        }
        drop(handle);
        self.state = SupervisorState::Idle;
        tracing::debug!(pid, "server released");
    }

    fn stop_gracefully(&mut self, handle: &mut ProcessHandle) {
        let pid = handle.pid();
        let sent = match handle.stdin.as_mut() {
            Some(stdin) => match write_line(stdin, &self.options.stop_command) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(pid, error = %e, "failed to send stop command");
                    false
                }
            },
            None => false,
        };
        if !sent {
            handle.force_kill();
            return;
        }

        tracing::info!(pid, timeout = ?self.options.shutdown_timeout, "waiting for server to stop");
        match handle.child.wait_timeout(self.options.shutdown_timeout) {
            Ok(Some(status)) => {
                handle.active.clear();
                tracing::info!(pid, %status, "server stopped");
                self.last_exit = Some(status);
            }
            Ok(None) => {
                tracing::warn!(pid, "server did not stop gracefully, forcing termination");
                handle.force_kill();
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "failed waiting for server, forcing termination");
                handle.force_kill();
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop(true);
    }
}

fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()
}

/// Spawn with stdout and stderr sharing one pipe so lines keep their order.
#[cfg(unix)]
fn spawn_merged(
    command: &LaunchCommand,
    dir: &Path,
) -> std::io::Result<(Child, Box<dyn Read + Send>)> {
    let (read_end, write_end) = cloexec_pipe()?;
    let stderr_end = write_end.try_clone()?;

    let child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(write_end))
        .stderr(Stdio::from(stderr_end))
        .spawn()?;

    Ok((child, Box::new(std::fs::File::from(read_end))))
}

/// A pipe whose ends are close-on-exec from the moment they exist, so a
/// concurrent spawn on another thread cannot inherit the write end.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn cloexec_pipe() -> std::io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use nix::fcntl::OFlag;
    Ok(nix::unistd::pipe2(OFlag::O_CLOEXEC)?)
}

/// Targets without `pipe2` set the flag right after creation.
#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))
))]
fn cloexec_pipe() -> std::io::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let (read_end, write_end) = nix::unistd::pipe()?;
    for fd in [&read_end, &write_end] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read_end, write_end))
}

/// Without a shared pipe only stdout is captured; stderr goes to our stderr.
#[cfg(not(unix))]
fn spawn_merged(
    command: &LaunchCommand,
    dir: &Path,
) -> std::io::Result<(Child, Box<dyn Read + Send>)> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not captured"))?;
    Ok((child, Box::new(stdout)))
}
