use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

use crate::{ExecutionMode, Transport, WorkerExit, WorkerLabel};

/// A worker could not be created, typically because a process or thread limit was reached.
#[derive(Debug, Error)]
#[error("failed to spawn {mode} worker {worker}: {source}")]
#[non_exhaustive]
pub struct SpawnError {
    /// The execution mode the worker was to be created in.
    pub mode: ExecutionMode,

    /// Which worker failed, e.g. `g0-receiver3`.
    pub worker: String,

    /// The operating system error.
    #[source]
    pub source: io::Error,
}

impl SpawnError {
    /// Creates the error for a worker the operating system refused to create.
    #[must_use]
    pub fn new(mode: ExecutionMode, worker: WorkerLabel, source: io::Error) -> Self {
        Self {
            mode,
            worker: worker.to_string(),
            source,
        }
    }
}

/// A byte channel between two endpoints could not be created.
#[derive(Debug, Error)]
#[error("failed to create {transport} channel: {source}")]
#[non_exhaustive]
pub struct ChannelSetupError {
    /// The kind of channel that was requested.
    pub transport: Transport,

    /// The operating system error.
    #[source]
    pub source: io::Error,
}

impl ChannelSetupError {
    /// Creates the error for a channel the operating system refused to create.
    #[must_use]
    pub fn new(transport: Transport, source: io::Error) -> Self {
        Self { transport, source }
    }
}

/// The start barrier could not complete its readiness count or release.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BarrierError {
    /// Reading a readiness announcement failed.
    #[error("failed to read readiness announcement {received} of {expected}: {source}")]
    ReadinessRead {
        /// Announcements successfully read before the failure.
        received: usize,

        /// Announcements the controller was waiting for.
        expected: usize,

        /// The operating system error.
        #[source]
        source: io::Error,
    },

    /// A worker stopped before every worker had announced readiness, so the count can never
    /// complete.
    #[error(
        "worker {worker} {exit} after {received} of {expected} readiness announcements were read"
    )]
    WorkerStopped {
        /// Which worker stopped, e.g. `g0-sender3`.
        worker: String,

        /// How the worker ended.
        exit: WorkerExit,

        /// Announcements successfully read before the stop was noticed.
        received: usize,

        /// Announcements the controller was waiting for.
        expected: usize,
    },

    /// Writing the release unit to the wake channel failed.
    #[error("failed to release workers: {source}")]
    Release {
        /// The operating system error.
        #[source]
        source: io::Error,
    },
}

/// A termination signal could not be delivered to a worker.
///
/// This is never fatal: the subsequent join still observes how the worker ended.
#[derive(Debug, Error)]
#[error("failed to signal worker: {source}")]
#[non_exhaustive]
pub struct SignalDeliveryError {
    /// The operating system error.
    #[source]
    pub source: io::Error,
}

impl SignalDeliveryError {
    /// Creates the error for a signal the operating system refused to deliver.
    #[must_use]
    pub fn new(source: io::Error) -> Self {
        Self { source }
    }
}

/// Why a worker stopped before completing its part of the run. Confined to the worker that
/// experienced it, never propagated to peers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// Reading or writing a message failed.
    #[error("message transfer failed: {0}")]
    Transfer(#[source] io::Error),

    /// Announcing readiness or waiting for the release failed.
    #[error("start barrier failed: {0}")]
    Barrier(#[source] io::Error),

    /// The controller asked the worker to stop.
    #[error("worker was killed")]
    Killed,
}

impl WorkerError {
    /// The exit code a worker process uses to report this error to the controller.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Transfer(_) => EXIT_CODE_TRANSFER,
            Self::Barrier(_) => EXIT_CODE_BARRIER,
            Self::Killed => EXIT_CODE_KILLED,
        }
    }
}

pub(crate) const EXIT_CODE_TRANSFER: i32 = 2;
pub(crate) const EXIT_CODE_BARRIER: i32 = 3;
pub(crate) const EXIT_CODE_KILLED: i32 = 4;
pub(crate) const EXIT_CODE_PANIC: i32 = 101;

/// Describes a nonzero worker process exit code in human terms.
pub(crate) fn describe_exit_code(code: i32) -> &'static str {
    match code {
        EXIT_CODE_TRANSFER => "message transfer failed",
        EXIT_CODE_BARRIER => "start barrier failed",
        EXIT_CODE_KILLED => "worker was killed",
        EXIT_CODE_PANIC => "worker panicked",
        _ => "unknown failure",
    }
}

/// A fatal failure that prevented the benchmark from running.
///
/// Whenever this is returned, every worker that had already been started was forcibly
/// terminated and reaped before returning.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BenchmarkError {
    /// Creating a worker failed while building the topology.
    #[error("creating workers: {source} ({reaped} started workers were terminated)")]
    Spawn {
        /// The underlying failure.
        #[source]
        source: SpawnError,

        /// How many already-started workers were emergency-reaped.
        reaped: usize,
    },

    /// Creating a channel failed while building the topology.
    #[error("creating channels: {source} ({reaped} started workers were terminated)")]
    ChannelSetup {
        /// The underlying failure.
        #[source]
        source: ChannelSetupError,

        /// How many already-started workers were emergency-reaped.
        reaped: usize,
    },

    /// The worker or message counts of the configuration do not fit in `usize`.
    #[error(
        "{groups} groups with fan-out {fan_out} and {loops} loops exceed the countable range"
    )]
    TooManyWorkers {
        /// Configured number of groups.
        groups: usize,

        /// Configured fan-out width.
        fan_out: usize,

        /// Configured number of loops.
        loops: usize,
    },

    /// Memory for tracking every worker of the run could not be allocated.
    #[error("allocating the table of {workers} workers: {source}")]
    ChildTable {
        /// Number of workers the run would have.
        workers: usize,

        /// The allocation failure.
        #[source]
        source: TryReserveError,
    },

    /// The shared memory holding the transfer counters could not be mapped.
    #[error("mapping transfer counters: {source}")]
    SharedMemory {
        /// The operating system error.
        #[source]
        source: io::Error,
    },

    /// The start barrier failed.
    #[error("synchronizing start: {source} ({reaped} started workers were terminated)")]
    Barrier {
        /// The underlying failure.
        #[source]
        source: BarrierError,

        /// How many already-started workers were emergency-reaped.
        reaped: usize,
    },
}

impl BenchmarkError {
    /// How many already-started workers were terminated and reaped when setup was abandoned.
    #[must_use]
    pub fn reaped(&self) -> usize {
        match self {
            Self::Spawn { reaped, .. }
            | Self::ChannelSetup { reaped, .. }
            | Self::Barrier { reaped, .. } => *reaped,
            Self::TooManyWorkers { .. }
            | Self::ChildTable { .. }
            | Self::SharedMemory { .. } => 0,
        }
    }
}

/// Setup failure before it has been paired with the emergency reap that follows it.
#[derive(Debug)]
pub(crate) enum SetupError {
    Spawn(SpawnError),
    ChannelSetup(ChannelSetupError),
}

impl SetupError {
    pub(crate) fn into_benchmark_error(self, reaped: usize) -> BenchmarkError {
        match self {
            Self::Spawn(source) => BenchmarkError::Spawn { source, reaped },
            Self::ChannelSetup(source) => BenchmarkError::ChannelSetup { source, reaped },
        }
    }
}

impl From<SpawnError> for SetupError {
    fn from(value: SpawnError) -> Self {
        Self::Spawn(value)
    }
}

impl From<ChannelSetupError> for SetupError {
    fn from(value: ChannelSetupError) -> Self {
        Self::ChannelSetup(value)
    }
}
