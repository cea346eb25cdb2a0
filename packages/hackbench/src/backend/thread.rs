use std::os::unix::thread::JoinHandleExt;
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{io, mem, ptr};

use crate::backend::{KillFlag, WorkerBackend, WorkerEntry, WorkerExit, WorkerHandle, WorkerLabel};
use crate::{ExecutionMode, SignalDeliveryError, SpawnError, WorkerError};

/// Signal used to knock a worker thread out of a blocking system call.
const INTERRUPT_SIGNAL: libc::c_int = libc::SIGUSR1;

/// How long a forced join waits before interrupting the worker again. The first interruption
/// can land just before the worker enters a blocking call, so a single signal is not enough.
const INTERRUPT_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Runs every worker in a thread of the controller process, sharing its address space.
///
/// Killing a worker sets its [`KillFlag`] and sends the thread `SIGUSR1`. The signal handler
/// does nothing but is installed without `SA_RESTART`, so the blocking call the worker is in
/// fails with `EINTR` and the worker stops as killed.
#[derive(Debug)]
pub struct ThreadBackend {
    stack_size: usize,
}

impl ThreadBackend {
    /// Creates the backend. Worker threads get a stack of `stack_size` bytes.
    #[must_use]
    pub fn new(stack_size: usize) -> Self {
        Self { stack_size }
    }
}

impl WorkerBackend for ThreadBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Thread
    }

    fn spawn(&self, label: WorkerLabel, entry: WorkerEntry) -> Result<WorkerHandle, SpawnError> {
        let spawn_error = |source| SpawnError::new(ExecutionMode::Thread, label, source);

        install_interrupt_handler().map_err(spawn_error)?;

        let kill = KillFlag::default();

        let join_handle = thread::Builder::new()
            .name(label.to_string())
            .stack_size(self.stack_size)
            .spawn({
                let kill = kill.clone();
                move || entry(&kill)
            })
            .map_err(spawn_error)?;

        Ok(WorkerHandle::thread(
            label,
            ThreadWorker {
                join_handle: Some(join_handle),
                kill,
            },
        ))
    }
}

#[derive(Debug)]
pub(super) struct ThreadWorker {
    // Only `None` while being joined; a joined worker is replaced by its exit status.
    join_handle: Option<JoinHandle<Result<(), WorkerError>>>,
    kill: KillFlag,
}

impl ThreadWorker {
    pub(super) fn signal_kill(&self) -> Result<(), SignalDeliveryError> {
        self.kill.set();
        self.interrupt()
    }

    fn interrupt(&self) -> Result<(), SignalDeliveryError> {
        let Some(join_handle) = &self.join_handle else {
            return Ok(());
        };

        // The thread has not been joined yet, so its pthread_t is still valid even if the
        // thread itself has already finished.
        // SAFETY: No safety requirements beyond passing a valid pthread_t.
        let result = unsafe { libc::pthread_kill(join_handle.as_pthread_t(), INTERRUPT_SIGNAL) };

        if result == 0 {
            Ok(())
        } else {
            Err(SignalDeliveryError::new(io::Error::from_raw_os_error(
                result,
            )))
        }
    }

    pub(super) fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }

    pub(super) fn join(&mut self) -> WorkerExit {
        if self.kill.is_set() {
            while self
                .join_handle
                .as_ref()
                .is_some_and(|join_handle| !join_handle.is_finished())
            {
                // Delivery can only fail if the thread is already gone, which ends the loop.
                drop(self.interrupt());
                thread::sleep(INTERRUPT_RETRY_INTERVAL);
            }
        }

        let Some(join_handle) = self.join_handle.take() else {
            return WorkerExit::Unknown("worker thread was already joined".to_string());
        };

        match join_handle.join() {
            Ok(Ok(())) => WorkerExit::Normal,
            Ok(Err(WorkerError::Killed)) => WorkerExit::Killed,
            Ok(Err(e)) => WorkerExit::Failed(e.to_string()),
            Err(_) => WorkerExit::Panicked,
        }
    }
}

extern "C" fn on_interrupt(_signal: libc::c_int) {}

fn install_interrupt_handler() -> io::Result<()> {
    static INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();

    let installed = INSTALLED.get_or_init(|| {
        // SAFETY: All-zero is a valid sigaction: empty mask, no flags.
        let mut action: libc::sigaction = unsafe { mem::zeroed() };
        action.sa_sigaction = on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;

        // No SA_RESTART: interrupted system calls must fail with EINTR.
        action.sa_flags = 0;

        // SAFETY: The handler is async-signal-safe (it does nothing) and `action` is valid.
        let result =
            unsafe { libc::sigaction(INTERRUPT_SIGNAL, &raw const action, ptr::null_mut()) };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL))
        }
    });

    (*installed).map_err(io::Error::from_raw_os_error)
}
