#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests, benches and examples of the hackbench workspace.

use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long a test wrapped in [`with_watchdog()`] may run before it is considered hung.
///
/// Generous because process-mode runs fork dozens of workers, which can be slow on loaded
/// build machines.
pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a test with a timeout to prevent infinite hangs.
///
/// A benchmark worker that misses its release or never gets killed blocks forever. Instead of
/// hanging the whole test run, the wrapped test fails after [`WATCHDOG_TIMEOUT`].
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled and
/// the test function is executed directly. This allows mutation testing to detect hanging
/// mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode) or if the test
/// itself panics.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    match rx.recv_timeout(WATCHDOG_TIMEOUT) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!(
                "Test exceeded {}-second timeout",
                WATCHDOG_TIMEOUT.as_secs()
            );
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            // The test thread panicked. Resume the panic so its message is reported.
            match test_handle.join() {
                Ok(()) => unreachable!("test thread exited without sending a result"),
                Err(payload) => std::panic::resume_unwind(payload),
            }
        }
    }
}

/// Counts the file descriptors currently open in this process.
///
/// Useful for detecting descriptor leaks: take a count before an operation and compare after.
/// Only meaningful when nothing else in the process is opening or closing descriptors at the same
/// time, so leak tests should run one at a time.
///
/// # Panics
///
/// Panics if `/proc/self/fd` cannot be listed.
#[must_use]
pub fn open_fd_count() -> usize {
    fs::read_dir("/proc/self/fd")
        .expect("/proc/self/fd must be readable on Linux")
        // The directory handle used for listing is itself one of the entries. It is present in
        // every count, so comparisons are unaffected.
        .count()
}
