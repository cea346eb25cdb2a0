use std::io;
use std::panic::{self, AssertUnwindSafe};

use crate::backend::{KillFlag, WorkerBackend, WorkerEntry, WorkerExit, WorkerHandle, WorkerLabel};
use crate::error::EXIT_CODE_PANIC;
use crate::{ExecutionMode, SignalDeliveryError, SpawnError};

/// Runs every worker in a forked child process.
///
/// The child runs the worker entry and then terminates with `_exit()`, never returning into the
/// control flow of the controller. A successful worker exits with code 0, a failed one with the
/// code of its [`WorkerError`][crate::WorkerError].
///
/// Killing a worker sends it `SIGTERM`, which terminates it wherever it is blocked.
///
/// A child inherits a copy of every descriptor the controller has open at the time of the fork,
/// including channel ends meant for other workers. Such copies keep a channel open after its
/// rightful owners are gone: a reader only sees end-of-file once every copy of the write end is
/// closed, in every process. Worker entries that rely on end-of-file or broken-pipe errors must
/// close the copies they do not own before doing anything else.
#[derive(Debug, Default)]
pub struct ProcessBackend {
    _private: (),
}

impl ProcessBackend {
    /// Creates the backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkerBackend for ProcessBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Process
    }

    fn spawn(&self, label: WorkerLabel, entry: WorkerEntry) -> Result<WorkerHandle, SpawnError> {
        // Created before forking so the child does not need to allocate before running the entry.
        // Nobody ever sets it: processes are killed with a signal that terminates them outright.
        let kill = KillFlag::default();

        // SAFETY: The child only runs the worker entry, which performs raw I/O on descriptors it
        // owns, and then calls _exit(). It never touches locks that other threads of the parent
        // may have held at the time of the fork.
        let pid = unsafe { libc::fork() };

        match pid {
            -1 => Err(SpawnError::new(
                ExecutionMode::Process,
                label,
                io::Error::last_os_error(),
            )),
            0 => run_child(entry, &kill),
            pid => Ok(WorkerHandle::process(label, pid)),
        }
    }
}

#[cfg_attr(test, mutants::skip)] // Runs in the child, outside the reach of the test harness.
fn run_child(entry: WorkerEntry, kill: &KillFlag) -> ! {
    let code = match panic::catch_unwind(AssertUnwindSafe(|| entry(kill))) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => e.exit_code(),
        Err(_) => EXIT_CODE_PANIC,
    };

    // SAFETY: No safety requirements. Skipping atexit handlers and destructors is intended:
    // they belong to the parent.
    unsafe { libc::_exit(code) }
}

pub(super) fn join(pid: libc::pid_t) -> WorkerExit {
    let mut status: libc::c_int = 0;

    loop {
        // SAFETY: `status` is a valid location for waitpid() to store the status in.
        let result = unsafe { libc::waitpid(pid, &raw mut status, 0) };

        if result == pid {
            return decode_status(status);
        }

        let e = io::Error::last_os_error();

        if e.kind() != io::ErrorKind::Interrupted {
            return WorkerExit::Unknown(e.to_string());
        }
    }
}

/// Reaps the child if it has already stopped, without blocking.
pub(super) fn try_join(pid: libc::pid_t) -> Option<WorkerExit> {
    let mut status: libc::c_int = 0;

    // SAFETY: `status` is a valid location for waitpid() to store the status in.
    let result = unsafe { libc::waitpid(pid, &raw mut status, libc::WNOHANG) };

    if result == pid {
        return Some(decode_status(status));
    }

    if result == 0 {
        return None;
    }

    let e = io::Error::last_os_error();

    // Interrupted before learning anything; the next check will tell.
    (e.kind() != io::ErrorKind::Interrupted).then(|| WorkerExit::Unknown(e.to_string()))
}

fn decode_status(status: libc::c_int) -> WorkerExit {
    if libc::WIFEXITED(status) {
        match libc::WEXITSTATUS(status) {
            0 => WorkerExit::Normal,
            code => WorkerExit::ExitCode(code),
        }
    } else if libc::WIFSIGNALED(status) {
        WorkerExit::Signal(libc::WTERMSIG(status))
    } else {
        WorkerExit::Unknown(format!("unexpected wait status {status:#x}"))
    }
}

pub(super) fn signal_kill(pid: libc::pid_t) -> Result<(), SignalDeliveryError> {
    // An exited but not yet reaped child is a zombie; signaling it has no effect.
    // SAFETY: No safety requirements. The pid refers to our own unreaped child.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };

    if result == 0 {
        Ok(())
    } else {
        Err(SignalDeliveryError::new(io::Error::last_os_error()))
    }
}
