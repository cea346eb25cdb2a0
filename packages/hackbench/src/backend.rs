//! Creating, killing and joining workers, either as forked processes or as threads.
//!
//! The [`WorkerBackend`] trait is the seam between the topology logic and the operating system.
//! One backend is chosen per run and every worker of the run is created through it, so the two
//! kinds of workers are never mixed.

mod process;
mod thread;

use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use process::ProcessBackend;
pub use thread::ThreadBackend;
use thread::ThreadWorker;

use crate::{ExecutionMode, SignalDeliveryError, SpawnError, WorkerError};

/// The code a worker runs. It receives the kill flag of its own worker.
pub type WorkerEntry = Box<dyn FnOnce(&KillFlag) -> Result<(), WorkerError> + Send + 'static>;

/// Creates workers of one execution mode.
///
/// Joining and killing are driven through the [`WorkerHandle`] returned by
/// [`spawn()`][Self::spawn], which remembers what kind of worker it refers to.
pub trait WorkerBackend: Debug + Send + Sync {
    /// The execution mode of every worker this backend creates.
    fn mode(&self) -> ExecutionMode;

    /// Starts a worker running `entry`.
    ///
    /// The returned handle can be joined immediately. A failure to create the worker is
    /// reported as an error and never affects workers that were already started.
    ///
    /// # Errors
    ///
    /// Returns an error if the operating system refuses to create another process or thread.
    fn spawn(&self, label: WorkerLabel, entry: WorkerEntry) -> Result<WorkerHandle, SpawnError>;

    /// Waits for the worker to stop and reports how it ended.
    ///
    /// Joining an already joined handle returns the same status again without blocking.
    fn join(&self, handle: &mut WorkerHandle) -> WorkerExit {
        handle.join()
    }

    /// Reports how the worker ended if it has already stopped, without blocking.
    ///
    /// A worker found stopped is reaped by this call, exactly as if it had been joined.
    fn try_join(&self, handle: &mut WorkerHandle) -> Option<WorkerExit> {
        handle.try_join()
    }

    /// Asks the worker to terminate, interrupting any blocking call it is in.
    ///
    /// Best-effort and idempotent: a worker that already stopped is not affected.
    ///
    /// # Errors
    ///
    /// Returns an error if the termination signal could not be delivered. The caller is
    /// expected to log this and continue with the join, which observes the actual outcome.
    fn signal_kill(&self, handle: &WorkerHandle) -> Result<(), SignalDeliveryError> {
        handle.signal_kill()
    }
}

/// Set by the controller when it wants a worker to stop. Workers check it whenever a blocking
/// call is interrupted by a signal.
#[derive(Clone, Debug, Default)]
pub struct KillFlag {
    requested: Arc<AtomicBool>,
}

impl KillFlag {
    /// Whether the controller has asked the worker to stop.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Attributes an I/O failure of the worker: an interruption after a kill request means the
    /// worker was killed, anything else is wrapped as the given kind of failure.
    pub(crate) fn failure(&self, e: io::Error, wrap: fn(io::Error) -> WorkerError) -> WorkerError {
        if e.kind() == io::ErrorKind::Interrupted && self.is_set() {
            WorkerError::Killed
        } else {
            wrap(e)
        }
    }
}

/// Which half of a sender/receiver pair a worker is.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum WorkerRole {
    /// Drains messages from one channel.
    #[display("receiver")]
    Receiver,

    /// Writes messages to every receiver of its group.
    #[display("sender")]
    Sender,
}

/// Identifies a worker within the topology, e.g. `g2-sender7` for the eighth sender of the third
/// group. Also used as the thread name in thread mode.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, PartialEq)]
#[display("g{group}-{role}{index}")]
#[non_exhaustive]
pub struct WorkerLabel {
    /// Index of the group the worker belongs to.
    pub group: usize,

    /// Whether the worker sends or receives.
    pub role: WorkerRole,

    /// Index of the worker among the workers of the same role in its group.
    pub index: usize,
}

impl WorkerLabel {
    /// Creates the label of the `index`-th worker with `role` in group `group`.
    #[must_use]
    pub fn new(group: usize, role: WorkerRole, index: usize) -> Self {
        Self { group, role, index }
    }
}

/// How a worker ended.
#[derive(Clone, Debug, derive_more::Display, Eq, PartialEq)]
#[non_exhaustive]
pub enum WorkerExit {
    /// The worker completed its part of the run.
    #[display("completed")]
    Normal,

    /// A worker process exited with a nonzero exit code.
    #[display("exited with code {_0} ({})", crate::error::describe_exit_code(*_0))]
    ExitCode(i32),

    /// A worker process was terminated by a signal.
    #[display("terminated by signal {_0}")]
    Signal(i32),

    /// A worker thread stopped because the controller killed it.
    #[display("killed")]
    Killed,

    /// A worker thread stopped because of an error.
    #[display("failed: {_0}")]
    Failed(String),

    /// A worker thread panicked.
    #[display("panicked")]
    Panicked,

    /// The status of the worker could not be collected.
    #[display("status unavailable: {_0}")]
    Unknown(String),
}

impl WorkerExit {
    /// Whether the worker completed its part of the run.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Normal)
    }
}

/// A started worker.
///
/// Once joined, the handle only remembers the exit status; the process or thread it referred to
/// is gone and is never signaled again.
#[derive(Debug)]
pub struct WorkerHandle {
    label: WorkerLabel,
    state: HandleState,
}

#[derive(Debug)]
enum HandleState {
    Process(libc::pid_t),
    Thread(ThreadWorker),
    Reaped(WorkerExit),
}

impl WorkerHandle {
    fn process(label: WorkerLabel, pid: libc::pid_t) -> Self {
        Self {
            label,
            state: HandleState::Process(pid),
        }
    }

    fn thread(label: WorkerLabel, worker: ThreadWorker) -> Self {
        Self {
            label,
            state: HandleState::Thread(worker),
        }
    }

    /// Which worker of the topology this is.
    #[must_use]
    pub fn label(&self) -> WorkerLabel {
        self.label
    }

    /// Whether the worker has been joined.
    #[must_use]
    pub fn is_reaped(&self) -> bool {
        matches!(self.state, HandleState::Reaped(_))
    }

    fn join(&mut self) -> WorkerExit {
        let exit = match &mut self.state {
            HandleState::Reaped(exit) => return exit.clone(),
            HandleState::Process(pid) => process::join(*pid),
            HandleState::Thread(worker) => worker.join(),
        };

        self.state = HandleState::Reaped(exit.clone());
        exit
    }

    fn try_join(&mut self) -> Option<WorkerExit> {
        let exit = match &mut self.state {
            HandleState::Reaped(exit) => return Some(exit.clone()),
            HandleState::Process(pid) => process::try_join(*pid)?,
            HandleState::Thread(worker) if worker.is_finished() => worker.join(),
            HandleState::Thread(_) => return None,
        };

        self.state = HandleState::Reaped(exit.clone());
        Some(exit)
    }

    fn signal_kill(&self) -> Result<(), SignalDeliveryError> {
        match &self.state {
            HandleState::Reaped(_) => Ok(()),
            HandleState::Process(pid) => process::signal_kill(*pid),
            HandleState::Thread(worker) => worker.signal_kill(),
        }
    }
}
