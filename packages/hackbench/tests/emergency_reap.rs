//! Setup failures partway through building the topology or waiting for readiness.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::{fmt, io};

use hackbench::{
    BarrierError, BenchmarkConfig, BenchmarkError, ExecutionMode, ProcessBackend, SpawnError,
    ThreadBackend, Transport, WorkerBackend, WorkerEntry, WorkerError, WorkerExit, WorkerHandle,
    WorkerLabel, WorkerRole, run_benchmark_with,
};
use new_zealand::nz;

const MODES: [ExecutionMode; 2] = [ExecutionMode::Thread, ExecutionMode::Process];

/// What goes wrong during setup.
#[derive(Clone, Copy, Debug)]
enum Fault {
    /// The spawn attempt with this 1-based number fails as if a process or thread limit was hit.
    SpawnFailsAt(usize),

    /// This worker fails to announce readiness and stops.
    NeverReady(WorkerLabel),
}

/// Creates workers through the real backend of a mode, injecting one fault.
struct FaultyBackend {
    inner: Box<dyn WorkerBackend>,
    fault: Fault,
    attempts: AtomicUsize,

    /// Workers successfully started, counted in the controller.
    started: Arc<AtomicUsize>,

    /// Worker threads whose entry has not returned yet. Only tracked in thread mode, a forked
    /// worker decrements its own copy.
    running: Arc<AtomicUsize>,
}

impl FaultyBackend {
    fn new(mode: ExecutionMode, fault: Fault) -> Self {
        let inner: Box<dyn WorkerBackend> = if mode == ExecutionMode::Process {
            Box::new(ProcessBackend::new())
        } else {
            Box::new(ThreadBackend::new(hackbench::DEFAULT_THREAD_STACK_SIZE))
        };

        Self {
            inner,
            fault,
            attempts: AtomicUsize::new(0),
            started: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl fmt::Debug for FaultyBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultyBackend")
            .field("inner", &self.inner)
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

impl WorkerBackend for FaultyBackend {
    fn mode(&self) -> ExecutionMode {
        self.inner.mode()
    }

    fn spawn(&self, label: WorkerLabel, entry: WorkerEntry) -> Result<WorkerHandle, SpawnError> {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;

        let entry: WorkerEntry = match self.fault {
            Fault::SpawnFailsAt(failing) if failing == attempt => {
                return Err(SpawnError::new(
                    self.mode(),
                    label,
                    io::Error::from_raw_os_error(libc::EAGAIN),
                ));
            }
            Fault::NeverReady(broken) if broken == label => Box::new(|_| {
                Err(WorkerError::Barrier(io::Error::from(
                    io::ErrorKind::BrokenPipe,
                )))
            }),
            _ => entry,
        };

        let running = Arc::clone(&self.running);
        running.fetch_add(1, Ordering::SeqCst);

        let handle = self.inner.spawn(
            label,
            Box::new(move |kill| {
                let result = entry(kill);
                running.fetch_sub(1, Ordering::SeqCst);
                result
            }),
        )?;

        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }
}

fn config(mode: ExecutionMode) -> BenchmarkConfig {
    BenchmarkConfig::builder()
        .groups(nz!(3))
        .fan_out(nz!(3))
        .mode(mode)
        .transport(Transport::SocketPair)
        .loops(nz!(5))
        .build()
}

struct Outcome {
    error: BenchmarkError,
    started: usize,
    running: usize,
}

fn run_with_fault(mode: ExecutionMode, fault: Fault) -> Outcome {
    let backend = FaultyBackend::new(mode, fault);
    let started = Arc::clone(&backend.started);
    let running = Arc::clone(&backend.running);

    let error = run_benchmark_with(&config(mode), Box::new(backend)).unwrap_err();

    let outcome = Outcome {
        error,
        started: started.load(Ordering::SeqCst),
        running: running.load(Ordering::SeqCst),
    };

    assert_eq!(outcome.error.reaped(), outcome.started, "{mode}");

    if mode == ExecutionMode::Thread {
        assert_eq!(outcome.running, 0);
    }

    outcome
}

#[test]
fn failure_on_first_spawn_reaps_nothing() {
    testing::with_watchdog(|| {
        for mode in MODES {
            let outcome = run_with_fault(mode, Fault::SpawnFailsAt(1));

            assert!(
                matches!(outcome.error, BenchmarkError::Spawn { .. }),
                "{}",
                outcome.error
            );
            assert_eq!(outcome.started, 0);
        }
    });
}

#[test]
fn failure_among_senders_reaps_every_started_worker() {
    testing::with_watchdog(|| {
        for mode in MODES {
            // Group 0 is complete (6 workers), group 1 has its 3 receivers and 1 sender.
            let outcome = run_with_fault(mode, Fault::SpawnFailsAt(11));

            assert_eq!(outcome.started, 10);

            let BenchmarkError::Spawn { source, .. } = outcome.error else {
                panic!("expected a spawn error, got {}", outcome.error);
            };
            assert_eq!(source.mode, mode);
            assert_eq!(source.worker, "g1-sender1");
            assert_eq!(source.source.raw_os_error(), Some(libc::EAGAIN));
        }
    });
}

#[test]
fn failure_among_receivers_reaps_every_started_worker() {
    testing::with_watchdog(|| {
        for mode in MODES {
            let outcome = run_with_fault(mode, Fault::SpawnFailsAt(8));

            assert_eq!(outcome.started, 7);
            assert!(
                outcome.error.to_string().contains("g1-receiver1"),
                "{}",
                outcome.error
            );
        }
    });
}

#[test]
fn failure_on_last_spawn_reaps_all_but_one() {
    testing::with_watchdog(|| {
        let total = config(ExecutionMode::Thread)
            .total_workers()
            .unwrap()
            .get();

        for mode in MODES {
            let outcome = run_with_fault(mode, Fault::SpawnFailsAt(total));

            assert_eq!(outcome.started, total - 1);
        }
    });
}

#[test]
fn worker_stopping_before_readiness_ends_the_wait() {
    testing::with_watchdog(|| {
        let total = config(ExecutionMode::Thread)
            .total_workers()
            .unwrap()
            .get();

        for mode in MODES {
            let broken = WorkerLabel::new(0, WorkerRole::Sender, 0);
            let outcome = run_with_fault(mode, Fault::NeverReady(broken));

            // Every worker was started, then every one of them was reaped.
            assert_eq!(outcome.started, total);

            let BenchmarkError::Barrier {
                source:
                    BarrierError::WorkerStopped {
                        worker,
                        exit,
                        expected,
                        ..
                    },
                ..
            } = outcome.error
            else {
                panic!("expected a stopped worker, got {}", outcome.error);
            };

            assert_eq!(worker, "g0-sender0");
            assert_eq!(expected, total);

            if mode == ExecutionMode::Process {
                assert_eq!(exit, WorkerExit::ExitCode(3));
            } else {
                assert!(matches!(exit, WorkerExit::Failed(_)), "{exit}");
            }
        }
    });
}
