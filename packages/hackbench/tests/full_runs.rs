//! Complete benchmark runs through the public API.

use std::num::NonZero;
use std::thread;
use std::time::Duration;

use hackbench::{
    BenchmarkConfig, BenchmarkError, ExecutionMode, Harness, HarnessState, ProcessBackend,
    ThreadBackend, Transport, run_benchmark,
};
use new_zealand::nz;

const MODES: [ExecutionMode; 2] = [ExecutionMode::Process, ExecutionMode::Thread];
const TRANSPORTS: [Transport; 2] = [Transport::Pipe, Transport::SocketPair];

fn config(
    mode: ExecutionMode,
    transport: Transport,
    groups: NonZero<usize>,
    fan_out: NonZero<usize>,
    loops: NonZero<usize>,
) -> BenchmarkConfig {
    BenchmarkConfig::builder()
        .mode(mode)
        .transport(transport)
        .groups(groups)
        .fan_out(fan_out)
        .loops(loops)
        .build()
}

#[test]
fn single_group_run_transfers_every_message() {
    testing::with_watchdog(|| {
        for mode in MODES {
            for transport in TRANSPORTS {
                let config = config(mode, transport, nz!(1), nz!(2), nz!(3));
                let report = run_benchmark(&config).unwrap();

                assert_eq!(report.total_workers(), 4, "{mode} {transport}");
                assert_eq!(report.failed_workers(), 0, "{mode} {transport}");
                // 2 receivers, each draining 3 messages from each of 2 senders.
                assert_eq!(report.messages_received(), 12, "{mode} {transport}");
                assert_eq!(report.bytes_sent(), 1200, "{mode} {transport}");
                assert!(report.elapsed() > Duration::ZERO, "{mode} {transport}");
            }
        }
    });
}

#[test]
fn transports_move_identical_volumes() {
    testing::with_watchdog(|| {
        for mode in MODES {
            let [pipe, socket] = TRANSPORTS
                .map(|transport| run_benchmark(&config(mode, transport, nz!(3), nz!(4), nz!(7))))
                .map(Result::unwrap);

            assert_eq!(pipe.messages_received(), socket.messages_received());
            assert_eq!(pipe.bytes_sent(), socket.bytes_sent());
            assert_eq!(pipe.messages_received(), 3 * 4 * 4 * 7);
            assert!(pipe.is_success() && socket.is_success());
        }
    });
}

#[test]
fn minimal_topology_completes() {
    testing::with_watchdog(|| {
        for mode in MODES {
            let report = run_benchmark(&config(mode, Transport::Pipe, nz!(1), nz!(1), nz!(1))).unwrap();

            assert_eq!(report.total_workers(), 2);
            assert_eq!(report.messages_received(), 1);
            assert!(report.is_success());
        }
    });
}

#[test]
fn messages_larger_than_kernel_buffers_arrive_whole() {
    testing::with_watchdog(|| {
        for mode in MODES {
            let config = BenchmarkConfig::builder()
                .mode(mode)
                .transport(Transport::Pipe)
                .groups(nz!(1))
                .fan_out(nz!(2))
                .loops(nz!(4))
                .message_size(nz!(200_000))
                .build();

            let report = run_benchmark(&config).unwrap();

            assert!(report.is_success());
            assert_eq!(report.messages_received(), 2 * 2 * 4);
            assert_eq!(report.bytes_sent(), 2 * 2 * 4 * 200_000);
        }
    });
}

#[test]
fn default_configuration_runs() {
    testing::with_watchdog(|| {
        // 10 groups of 20 + 20 workers; threads keep this fast enough for a test.
        let config = BenchmarkConfig::builder()
            .mode(ExecutionMode::Thread)
            .build();

        let report = run_benchmark(&config).unwrap();

        assert_eq!(report.total_workers(), 400);
        assert_eq!(report.messages_received(), 10 * 20 * 20 * 100);
        assert!(report.is_success());
        assert!(report.to_string().starts_with("Time: "));
    });
}

#[test]
fn nothing_moves_until_release() {
    testing::with_watchdog(|| {
        for mode in MODES {
            let config = config(mode, Transport::SocketPair, nz!(2), nz!(3), nz!(2));
            let backend: Box<dyn hackbench::WorkerBackend> = match mode {
                ExecutionMode::Process => Box::new(ProcessBackend::new()),
                _ => Box::new(ThreadBackend::new(config.thread_stack_size())),
            };

            let mut harness = Harness::build(&config, backend).unwrap();
            harness.await_ready().unwrap();

            thread::sleep(Duration::from_millis(100));

            assert_eq!(harness.state(), HarnessState::Ready);
            assert_eq!(harness.messages_received(), 0);
            assert_eq!(harness.bytes_sent(), 0);

            harness.release().unwrap();
            let report = harness.finish();

            assert!(report.is_success());
            assert_eq!(report.messages_received(), 2 * 3 * 3 * 2);
        }
    });
}

#[test]
fn abort_before_release_counts_every_worker_as_failed() {
    testing::with_watchdog(|| {
        for mode in MODES {
            let config = config(mode, Transport::Pipe, nz!(2), nz!(5), nz!(10));
            let backend: Box<dyn hackbench::WorkerBackend> = match mode {
                ExecutionMode::Process => Box::new(ProcessBackend::new()),
                _ => Box::new(ThreadBackend::new(config.thread_stack_size())),
            };

            let mut harness = Harness::build(&config, backend).unwrap();
            harness.await_ready().unwrap();

            assert_eq!(harness.abort(), 20, "{mode}");
        }
    });
}

#[test]
fn topology_too_large_to_count_is_an_error() {
    let huge = NonZero::new(usize::MAX / 2).unwrap();

    for mode in MODES {
        let config = BenchmarkConfig::builder().mode(mode).groups(huge).build();

        assert_eq!(config.total_workers(), None);

        let error = run_benchmark(&config).unwrap_err();

        assert!(
            matches!(error, BenchmarkError::TooManyWorkers { .. }),
            "{mode}: {error}"
        );
        assert_eq!(error.reaped(), 0);
    }
}
