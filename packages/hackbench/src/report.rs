use std::fmt;
use std::time::Duration;

/// The outcome of a benchmark run that got past setup.
///
/// The elapsed time runs from the moment every worker announced readiness to the moment the last
/// worker was reaped, so it excludes spawning and barrier waits.
///
/// The [`Display`][fmt::Display] form is the traditional one-line result, e.g. `Time: 0.153`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use = "the report is the whole point of running the benchmark"]
pub struct BenchmarkReport {
    elapsed: Duration,
    failed_workers: usize,
    total_workers: usize,
    messages_received: u64,
    bytes_sent: u64,
}

impl BenchmarkReport {
    pub(crate) fn new(
        elapsed: Duration,
        failed_workers: usize,
        total_workers: usize,
        messages_received: u64,
        bytes_sent: u64,
    ) -> Self {
        Self {
            elapsed,
            failed_workers,
            total_workers,
            messages_received,
            bytes_sent,
        }
    }

    /// Time from release to the last worker being reaped.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// [`elapsed()`][Self::elapsed] in whole microseconds.
    #[must_use]
    pub fn elapsed_micros(&self) -> u128 {
        self.elapsed.as_micros()
    }

    /// How many workers did not complete normally.
    #[must_use]
    pub fn failed_workers(&self) -> usize {
        self.failed_workers
    }

    /// How many workers took part in the run.
    #[must_use]
    pub fn total_workers(&self) -> usize {
        self.total_workers
    }

    /// Messages drained by all receivers together.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Bytes written by all senders together.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Whether every worker completed normally. A caller turning the report into a process exit
    /// code should fail when this is `false`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed_workers == 0
    }
}

impl fmt::Display for BenchmarkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time: {}.{:03}",
            self.elapsed.as_secs(),
            self.elapsed.subsec_millis()
        )
    }
}
