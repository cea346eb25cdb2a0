use std::num::NonZero;

use new_zealand::nz;

/// Size in bytes of every message a sender writes, unless overridden.
pub const DEFAULT_MESSAGE_SIZE: NonZero<usize> = nz!(100);

/// Stack size of a worker thread in [`ExecutionMode::Thread`], unless overridden.
///
/// Workers only shuffle bytes between a heap buffer and a file descriptor, so they need very
/// little stack. The value is raised to the platform minimum if it is smaller.
pub const DEFAULT_THREAD_STACK_SIZE: usize = 128 * 1024;

const DEFAULT_GROUPS: NonZero<usize> = nz!(10);
const DEFAULT_FAN_OUT: NonZero<usize> = nz!(20);
const DEFAULT_LOOPS: NonZero<usize> = nz!(100);

/// The kind of byte channel connecting each sender/receiver pair. The same kind is used for
/// the whole run, including the shared readiness and wake channels.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Transport {
    /// Anonymous unidirectional pipes.
    #[display("pipe")]
    Pipe,

    /// Connected pairs of Unix domain stream sockets.
    #[display("socketpair")]
    SocketPair,
}

/// How workers are created. Exactly one mode is used for the whole run.
#[derive(Clone, Copy, Debug, derive_more::Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ExecutionMode {
    /// Every worker is a forked child process.
    #[display("process")]
    Process,

    /// Every worker is a thread sharing the address space of the controller.
    #[display("thread")]
    Thread,
}

/// Fully resolved parameters of one benchmark run.
///
/// Use [`BenchmarkConfig::builder()`] to create one. Every parameter has a default matching the
/// traditional benchmark invocation: 10 groups of 20 senders and 20 receivers each, talking over
/// socket pairs in process mode, 100 loops of 100-byte messages.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use hackbench::{BenchmarkConfig, ExecutionMode, Transport};
/// use new_zealand::nz;
///
/// let config = BenchmarkConfig::builder()
///     .transport(Transport::Pipe)
///     .groups(nz!(2))
///     .fan_out(nz!(4))
///     .mode(ExecutionMode::Thread)
///     .loops(nz!(10))
///     .build();
///
/// assert_eq!(config.total_workers().map(NonZero::get), Some(16));
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BenchmarkConfig {
    transport: Transport,
    groups: NonZero<usize>,
    fan_out: NonZero<usize>,
    mode: ExecutionMode,
    loops: NonZero<usize>,
    message_size: NonZero<usize>,
    thread_stack_size: usize,
}

impl BenchmarkConfig {
    /// Starts configuring a run, with every parameter at its default.
    pub fn builder() -> BenchmarkConfigBuilder {
        BenchmarkConfigBuilder::new()
    }

    /// The channel kind used for every channel of the run.
    #[must_use]
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Number of sender/receiver groups.
    #[must_use]
    pub fn groups(&self) -> NonZero<usize> {
        self.groups
    }

    /// Number of sender/receiver pairs per group.
    #[must_use]
    pub fn fan_out(&self) -> NonZero<usize> {
        self.fan_out
    }

    /// Whether workers are processes or threads.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// How many times each sender writes one message to every receiver of its group.
    #[must_use]
    pub fn loops(&self) -> NonZero<usize> {
        self.loops
    }

    /// Size of every message in bytes.
    #[must_use]
    pub fn message_size(&self) -> NonZero<usize> {
        self.message_size
    }

    /// Stack size of worker threads, only used in [`ExecutionMode::Thread`].
    #[must_use]
    pub fn thread_stack_size(&self) -> usize {
        self.thread_stack_size
    }

    /// Number of workers in one group: one sender and one receiver per fan-out slot.
    ///
    /// `None` if the count does not fit in `usize`.
    #[must_use]
    pub fn workers_per_group(&self) -> Option<NonZero<usize>> {
        self.fan_out.checked_mul(nz!(2))
    }

    /// Number of workers in the whole run.
    ///
    /// `None` if the count does not fit in `usize`.
    #[must_use]
    pub fn total_workers(&self) -> Option<NonZero<usize>> {
        self.workers_per_group()?.checked_mul(self.groups)
    }

    /// Number of messages every receiver must drain before it is done.
    ///
    /// `None` if the count does not fit in `usize`.
    #[must_use]
    pub fn messages_per_receiver(&self) -> Option<NonZero<usize>> {
        self.fan_out.checked_mul(self.loops)
    }

    /// All derived counts of the run, or `None` if any of them does not fit in `usize`.
    pub(crate) fn topology(&self) -> Option<Topology> {
        Some(Topology {
            workers_per_group: self.workers_per_group()?,
            total_workers: self.total_workers()?,
            messages_per_receiver: self.messages_per_receiver()?,
        })
    }
}

/// Counts derived from a [`BenchmarkConfig`], checked once before anything is created.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Topology {
    pub(crate) workers_per_group: NonZero<usize>,
    pub(crate) total_workers: NonZero<usize>,
    pub(crate) messages_per_receiver: NonZero<usize>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builds a [`BenchmarkConfig`].
#[derive(Clone, Copy, Debug)]
#[must_use]
pub struct BenchmarkConfigBuilder {
    config: BenchmarkConfig,
}

impl BenchmarkConfigBuilder {
    fn new() -> Self {
        Self {
            config: BenchmarkConfig {
                transport: Transport::SocketPair,
                groups: DEFAULT_GROUPS,
                fan_out: DEFAULT_FAN_OUT,
                mode: ExecutionMode::Process,
                loops: DEFAULT_LOOPS,
                message_size: DEFAULT_MESSAGE_SIZE,
                thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            },
        }
    }

    /// Sets the channel kind.
    pub fn transport(mut self, transport: Transport) -> Self {
        self.config.transport = transport;
        self
    }

    /// Sets the number of groups.
    pub fn groups(mut self, groups: NonZero<usize>) -> Self {
        self.config.groups = groups;
        self
    }

    /// Sets the number of sender/receiver pairs per group.
    pub fn fan_out(mut self, fan_out: NonZero<usize>) -> Self {
        self.config.fan_out = fan_out;
        self
    }

    /// Sets whether workers are processes or threads.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Sets how many rounds of messages every sender writes.
    pub fn loops(mut self, loops: NonZero<usize>) -> Self {
        self.config.loops = loops;
        self
    }

    /// Sets the size of every message in bytes.
    pub fn message_size(mut self, message_size: NonZero<usize>) -> Self {
        self.config.message_size = message_size;
        self
    }

    /// Sets the stack size of worker threads. Values below the platform minimum are raised to it.
    pub fn thread_stack_size(mut self, bytes: usize) -> Self {
        self.config.thread_stack_size = bytes;
        self
    }

    /// Finalizes the configuration.
    #[must_use]
    pub fn build(self) -> BenchmarkConfig {
        let mut config = self.config;
        config.thread_stack_size = config.thread_stack_size.max(libc::PTHREAD_STACK_MIN);
        config
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_traditional_invocation() {
        let config = BenchmarkConfig::default();

        assert_eq!(config.transport(), Transport::SocketPair);
        assert_eq!(config.mode(), ExecutionMode::Process);
        assert_eq!(config.groups().get(), 10);
        assert_eq!(config.fan_out().get(), 20);
        assert_eq!(config.loops().get(), 100);
        assert_eq!(config.message_size(), DEFAULT_MESSAGE_SIZE);

        // 10 groups of 40 tasks.
        assert_eq!(config.total_workers().map(NonZero::get), Some(400));
    }

    #[test]
    fn derived_counts() {
        let config = BenchmarkConfig::builder()
            .groups(nz!(3))
            .fan_out(nz!(2))
            .loops(nz!(7))
            .build();

        assert_eq!(
            config.topology(),
            Some(Topology {
                workers_per_group: nz!(4),
                total_workers: nz!(12),
                messages_per_receiver: nz!(14),
            })
        );
    }

    #[test]
    fn overflowing_counts_are_none() {
        let too_many_groups = BenchmarkConfig::builder()
            .groups(NonZero::new(usize::MAX / 2).unwrap())
            .fan_out(nz!(2))
            .build();

        assert_eq!(too_many_groups.workers_per_group(), Some(nz!(4)));
        assert_eq!(too_many_groups.total_workers(), None);
        assert_eq!(too_many_groups.topology(), None);

        let too_wide = BenchmarkConfig::builder()
            .groups(nz!(1))
            .fan_out(NonZero::new(usize::MAX).unwrap())
            .build();

        assert_eq!(too_wide.workers_per_group(), None);
        assert_eq!(too_wide.total_workers(), None);

        let too_many_loops = BenchmarkConfig::builder()
            .fan_out(nz!(20))
            .loops(NonZero::new(usize::MAX / 4).unwrap())
            .build();

        assert!(too_many_loops.total_workers().is_some());
        assert_eq!(too_many_loops.messages_per_receiver(), None);
        assert_eq!(too_many_loops.topology(), None);
    }

    #[test]
    fn tiny_stack_size_raised_to_platform_minimum() {
        let config = BenchmarkConfig::builder().thread_stack_size(1).build();

        assert_eq!(config.thread_stack_size(), libc::PTHREAD_STACK_MIN);
    }

    #[test]
    fn transport_and_mode_display() {
        assert_eq!(Transport::Pipe.to_string(), "pipe");
        assert_eq!(Transport::SocketPair.to_string(), "socketpair");
        assert_eq!(ExecutionMode::Process.to_string(), "process");
        assert_eq!(ExecutionMode::Thread.to_string(), "thread");
    }
}
