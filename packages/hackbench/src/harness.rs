use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::barrier::StartBarrier;
use crate::channel::ChannelFactory;
use crate::group::{ChildTable, GroupPlan, spawn_group};
use crate::reaper::{find_stopped, reap};
use crate::tally::TransferTally;
use crate::{
    BenchmarkConfig, BenchmarkError, BenchmarkReport, ExecutionMode, ProcessBackend,
    ThreadBackend, WorkerBackend,
};

/// Runs one benchmark from start to finish with the configured execution mode.
///
/// # Errors
///
/// Returns an error if the topology could not be built or the workers could not be
/// synchronized. All workers started up to that point have been terminated and reaped by the time
/// the error is returned.
///
/// # Examples
///
/// ```
/// use hackbench::{BenchmarkConfig, ExecutionMode, run_benchmark};
/// use new_zealand::nz;
///
/// let config = BenchmarkConfig::builder()
///     .groups(nz!(1))
///     .fan_out(nz!(2))
///     .mode(ExecutionMode::Thread)
///     .loops(nz!(3))
///     .build();
///
/// let report = run_benchmark(&config).unwrap();
///
/// assert_eq!(report.failed_workers(), 0);
/// println!("{report}");
/// ```
pub fn run_benchmark(config: &BenchmarkConfig) -> Result<BenchmarkReport, BenchmarkError> {
    let backend: Box<dyn WorkerBackend> = match config.mode() {
        ExecutionMode::Process => Box::new(ProcessBackend::new()),
        ExecutionMode::Thread => Box::new(ThreadBackend::new(config.thread_stack_size())),
    };

    run_benchmark_with(config, backend)
}

/// Runs one benchmark from start to finish, creating workers through the given backend instead
/// of the one matching [`BenchmarkConfig::mode()`].
///
/// # Errors
///
/// See [`run_benchmark()`].
pub fn run_benchmark_with(
    config: &BenchmarkConfig,
    backend: Box<dyn WorkerBackend>,
) -> Result<BenchmarkReport, BenchmarkError> {
    let mut harness = Harness::build(config, backend)?;
    harness.await_ready()?;
    harness.release()?;
    Ok(harness.finish())
}

/// Where a [`Harness`] is in its lifecycle.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum HarnessState {
    /// Groups are being spawned.
    #[display("building topology")]
    BuildingTopology,

    /// Every worker is started, not every worker has announced readiness yet.
    #[display("awaiting ready")]
    AwaitingReady,

    /// Every worker is blocked on the start barrier.
    #[display("ready")]
    Ready,

    /// Workers have been let go and the clock is running.
    #[display("released")]
    Released,

    /// Workers are being reaped after a normal run.
    #[display("awaiting completion")]
    AwaitingCompletion,

    /// Every worker has been reaped after a normal run.
    #[display("reaped")]
    Reaped,

    /// Every worker has been forcibly terminated and reaped.
    #[display("aborted")]
    Aborted,
}

/// Drives one benchmark run phase by phase.
///
/// [`run_benchmark()`] is the convenient way to go through all phases. The harness exists for
/// callers that want to act between phases, e.g. to terminate workers before they finish.
///
/// Dropping a harness that has neither finished nor been aborted terminates and reaps every
/// worker it started.
#[derive(Debug)]
pub struct Harness {
    config: BenchmarkConfig,
    backend: Box<dyn WorkerBackend>,
    table: ChildTable,
    barrier: Arc<StartBarrier>,
    tally: Arc<TransferTally>,
    state: HarnessState,
    started_at: Option<Instant>,
}

impl Harness {
    /// Creates every channel and starts every worker of the run.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel or worker cannot be created. Workers already started are
    /// terminated and reaped before returning.
    pub fn build(
        config: &BenchmarkConfig,
        backend: Box<dyn WorkerBackend>,
    ) -> Result<Self, BenchmarkError> {
        let topology = config
            .topology()
            .ok_or_else(|| BenchmarkError::TooManyWorkers {
                groups: config.groups().get(),
                fan_out: config.fan_out().get(),
                loops: config.loops().get(),
            })?;

        let factory = ChannelFactory::new(config.transport());

        info!(
            groups = config.groups().get(),
            fan_out = config.fan_out().get(),
            mode = %backend.mode(),
            transport = %factory.transport(),
            "Running with {}*{} (== {}) tasks",
            config.groups(),
            topology.workers_per_group,
            topology.total_workers
        );

        let table = ChildTable::new(&topology).map_err(|source| BenchmarkError::ChildTable {
            workers: topology.total_workers.get(),
            source,
        })?;

        let barrier = StartBarrier::new(factory)
            .map_err(|source| BenchmarkError::ChannelSetup { source, reaped: 0 })?;
        let tally =
            TransferTally::new().map_err(|source| BenchmarkError::SharedMemory { source })?;

        let mut harness = Self {
            config: *config,
            backend,
            table,
            barrier: Arc::new(barrier),
            tally: Arc::new(tally),
            state: HarnessState::BuildingTopology,
            started_at: None,
        };

        for group in 0..config.groups().get() {
            let plan = GroupPlan {
                config: &harness.config,
                topology,
                factory,
                barrier: &harness.barrier,
                tally: &harness.tally,
            };

            if let Err(e) = spawn_group(&*harness.backend, &mut harness.table, group, &plan) {
                let reaped = harness.emergency_reap();
                return Err(e.into_benchmark_error(reaped));
            }

            debug!(
                group,
                workers = ?harness.table.group_range(group),
                "group started"
            );
        }

        harness.state = HarnessState::AwaitingReady;
        Ok(harness)
    }

    /// Blocks until every worker has announced readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if reading readiness announcements fails or if a worker stops before
    /// announcing. Every worker is terminated and reaped before returning.
    ///
    /// # Panics
    ///
    /// Panics if the harness is not in the [`HarnessState::AwaitingReady`] state.
    pub fn await_ready(&mut self) -> Result<(), BenchmarkError> {
        self.expect_state(HarnessState::AwaitingReady);

        let backend = &*self.backend;
        let table = &mut self.table;
        let expected = table.len();

        let result = self
            .barrier
            .await_ready(expected, || find_stopped(backend, table.handles_mut()));

        if let Err(source) = result {
            let reaped = self.emergency_reap();
            return Err(BenchmarkError::Barrier { source, reaped });
        }

        debug!(workers = self.table.len(), "all workers ready");
        self.state = HarnessState::Ready;
        Ok(())
    }

    /// Starts the clock and lets every worker go.
    ///
    /// # Errors
    ///
    /// Returns an error if the release cannot be signaled. Every worker is terminated and reaped
    /// before returning.
    ///
    /// # Panics
    ///
    /// Panics if the harness is not in the [`HarnessState::Ready`] state.
    pub fn release(&mut self) -> Result<(), BenchmarkError> {
        self.expect_state(HarnessState::Ready);

        self.started_at = Some(Instant::now());

        if let Err(source) = self.barrier.release() {
            let reaped = self.emergency_reap();
            return Err(BenchmarkError::Barrier { source, reaped });
        }

        self.state = HarnessState::Released;
        Ok(())
    }

    /// Waits for every worker to complete and reports the outcome.
    ///
    /// # Panics
    ///
    /// Panics if the harness is not in the [`HarnessState::Released`] state.
    pub fn finish(mut self) -> BenchmarkReport {
        self.expect_state(HarnessState::Released);
        self.state = HarnessState::AwaitingCompletion;

        let failed = reap(&*self.backend, self.table.handles_mut(), false);
        let stopped_at = Instant::now();

        self.state = HarnessState::Reaped;

        let elapsed = self
            .started_at
            .map(|started_at| stopped_at.saturating_duration_since(started_at))
            .unwrap_or_default();

        let report = BenchmarkReport::new(
            elapsed,
            failed,
            self.table.len(),
            self.tally.messages_received(),
            self.tally.bytes_sent(),
        );

        if failed > 0 {
            warn!(failed, total = self.table.len(), "some workers failed");
        }

        info!(elapsed_micros = report.elapsed_micros(), failed, "{report}");

        report
    }

    /// Terminates and reaps every worker, whatever phase the run is in, returning how many
    /// workers did not complete normally.
    ///
    /// Workers that were already reaped after a failed phase keep their recorded status.
    pub fn abort(mut self) -> usize {
        self.terminate_all()
    }

    /// The current phase.
    #[must_use]
    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// The configuration of the run.
    #[must_use]
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// How many workers have been started.
    #[must_use]
    pub fn started_workers(&self) -> usize {
        self.table.len()
    }

    /// Messages drained so far. Receivers publish their counts when they stop.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.tally.messages_received()
    }

    /// Bytes written so far. Senders publish their counts when they stop.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.tally.bytes_sent()
    }

    fn expect_state(&self, expected: HarnessState) {
        assert!(
            self.state == expected,
            "harness is {} but must be {expected} for this operation",
            self.state
        );
    }

    /// Terminates and reaps every started worker after a setup failure, returning how many
    /// workers were reaped.
    fn emergency_reap(&mut self) -> usize {
        let started = self.table.len();

        warn!(
            started,
            state = %self.state,
            "setup failed, terminating started workers"
        );

        self.terminate_all();
        started
    }

    fn terminate_all(&mut self) -> usize {
        let failed = reap(&*self.backend, self.table.handles_mut(), true);
        self.state = HarnessState::Aborted;

        debug!(
            failed,
            total = self.table.len(),
            "all workers terminated and reaped"
        );

        failed
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if matches!(self.state, HarnessState::Reaped | HarnessState::Aborted) {
            return;
        }

        warn!(state = %self.state, "harness dropped mid-run, terminating workers");
        self.terminate_all();
    }
}
