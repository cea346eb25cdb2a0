#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Scheduler and inter-process communication stress benchmark.
//!
//! The benchmark builds groups of communicating workers, either forked processes or threads.
//! Every group has F receivers and F senders. Each sender writes a fixed number of fixed-size
//! messages to every receiver of its group, over pipes or Unix domain socket pairs. The wall
//! clock time from releasing the workers to reaping the last of them is the result.
//!
//! The interesting part is not the byte transfer itself but the pressure it puts on the operating
//! system scheduler: with the default 10 groups of 20 + 20 workers there are 400 runnable tasks
//! ping-ponging through kernel buffers, constantly waking each other up.
//!
//! # Operating principles
//!
//! ## Start barrier
//!
//! Workers are created one by one, which takes a long time compared to the work they do. To keep
//! creation out of the measurement, every worker announces readiness and then blocks until the
//! controller releases all of them at once. The clock starts at the release.
//!
//! ## Reaping
//!
//! After release, the controller waits for every worker to stop and counts the ones that did not
//! complete normally. If setup fails partway, every worker started up to that point is
//! terminated and reaped before the error is returned, so no worker outlives a failed run.
//!
//! # Example
//!
//! ```
//! use hackbench::{BenchmarkConfig, ExecutionMode, Transport, run_benchmark};
//! use new_zealand::nz;
//!
//! let config = BenchmarkConfig::builder()
//!     .transport(Transport::Pipe)
//!     .groups(nz!(2))
//!     .fan_out(nz!(4))
//!     .mode(ExecutionMode::Thread)
//!     .loops(nz!(10))
//!     .build();
//!
//! let report = run_benchmark(&config).unwrap();
//!
//! // Each of the 8 receivers drains 10 messages from each of the 4 senders of its group.
//! assert_eq!(report.messages_received(), 8 * 4 * 10);
//! assert!(report.is_success());
//!
//! println!("{report}");
//! ```
//!
//! Use [`Harness`] instead of [`run_benchmark()`] to act between the phases of a run.
//!
//! # Platform support
//!
//! Linux and other Unix-like operating systems. Process mode relies on `fork()`.

mod backend;
mod barrier;
mod channel;
mod config;
mod error;
mod group;
mod harness;
mod reaper;
mod report;
mod tally;
#[cfg(test)]
mod test_util;
mod transfer;

pub use backend::*;
pub use config::*;
pub use error::{
    BarrierError, BenchmarkError, ChannelSetupError, SignalDeliveryError, SpawnError, WorkerError,
};
pub use harness::*;
pub use report::*;
