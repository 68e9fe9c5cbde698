//! Termination safety net.
//!
//! A [`Session`] ties the process's termination signals to the supervised
//! server: when SIGINT, SIGTERM, or SIGHUP arrives, the server registered in the
//! [`ActiveChild`] handle is killed before this process exits. The signal
//! handler itself only records the signal number; the kill happens on a
//! watcher thread, where locking and logging are allowed.

use crate::error::{BenchError, Result};
use crate::supervisor::ActiveChild;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// How often the watcher looks for a recorded signal.
pub const WATCH_INTERVAL: Duration = Duration::from_millis(100);

static INSTALLED: AtomicBool = AtomicBool::new(false);
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Process-wide termination hook for one benchmark session.
///
/// Only one session may be installed per process.
pub struct Session {
    active: ActiveChild,
    _watcher: Option<JoinHandle<()>>,
}

impl Session {
    /// Register termination handlers that kill the child tracked by `active`.
    pub fn install(active: ActiveChild) -> Result<Self> {
        if INSTALLED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BenchError::SessionInstalled);
        }

        if let Err(e) = register_handlers() {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let watcher = spawn_watcher(active.clone()).map_err(|e| {
            INSTALLED.store(false, Ordering::SeqCst);
            BenchError::io("<session watcher>", e)
        })?;

        tracing::debug!("termination handlers installed");
        Ok(Self {
            active,
            _watcher: watcher,
        })
    }

    /// The child handle this session protects.
    pub fn active_child(&self) -> &ActiveChild {
        &self.active
    }
}

/// Exit code used after terminating on `signo`.
pub fn exit_code(signo: i32) -> i32 {
    128 + signo
}

#[cfg(unix)]
extern "C" fn record_signal(signo: std::os::raw::c_int) {
    PENDING_SIGNAL.store(signo, Ordering::SeqCst);
}

#[cfg(unix)]
fn register_handlers() -> Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(record_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
        // SAFETY: the handler only performs an atomic store.
        unsafe { sigaction(signal, &action) }.map_err(|e| {
            BenchError::io(format!("<{signal:?} handler>"), std::io::Error::from(e))
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn register_handlers() -> Result<()> {
    tracing::warn!("termination handlers are not supported on this platform");
    Ok(())
}

#[cfg(unix)]
fn spawn_watcher(active: ActiveChild) -> std::io::Result<Option<JoinHandle<()>>> {
    std::thread::Builder::new()
        .name("pregen-bench-session".to_string())
        .spawn(move || loop {
            std::thread::sleep(WATCH_INTERVAL);
            let signo = PENDING_SIGNAL.swap(0, Ordering::SeqCst);
            if signo == 0 {
                continue;
            }
            tracing::warn!(signal = signo, pid = ?active.pid(), "termination requested");
            if active.kill() {
                tracing::info!("killed server before exiting");
            }
            std::process::exit(exit_code(signo));
        })
        .map(Some)
}

#[cfg(not(unix))]
fn spawn_watcher(_active: ActiveChild) -> std::io::Result<Option<JoinHandle<()>>> {
    Ok(None)
}
