//! Runs a small benchmark in both execution modes and prints the results.
//!
//! Raise the max level below to `TRACE` to see every spawned worker.

use hackbench::{BenchmarkConfig, ExecutionMode, Transport, run_benchmark};
use new_zealand::nz;
use tracing::Level;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .init();

    for mode in [ExecutionMode::Process, ExecutionMode::Thread] {
        let config = BenchmarkConfig::builder()
            .transport(Transport::SocketPair)
            .groups(nz!(4))
            .fan_out(nz!(10))
            .mode(mode)
            .loops(nz!(50))
            .build();

        match run_benchmark(&config) {
            Ok(report) => {
                println!("{mode}: {report}");
                println!(
                    "  {} messages, {} bytes, {} of {} workers failed",
                    report.messages_received(),
                    report.bytes_sent(),
                    report.failed_workers(),
                    report.total_workers()
                );
            }
            Err(e) => println!("{mode}: benchmark failed: {e}"),
        }
    }
}
