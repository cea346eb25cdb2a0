use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Counters {
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Run-wide transfer counters that every worker can add to, whether it is a thread of the
/// controller or a forked child.
///
/// The counters live in an anonymous shared memory mapping, which forked children inherit as
/// shared rather than copy-on-write memory. Workers keep local counts while transferring and
/// publish them once when they stop.
#[derive(Debug)]
pub(crate) struct TransferTally {
    counters: NonNull<Counters>,
}

// SAFETY: The mapping is only accessed through atomics and lives until the tally is dropped.
unsafe impl Send for TransferTally {}
// SAFETY: See above.
unsafe impl Sync for TransferTally {}

impl TransferTally {
    pub(crate) fn new() -> io::Result<Self> {
        // SAFETY: Anonymous mapping with no address hint, nothing to uphold.
        let address = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size_of::<Counters>(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if address == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let counters = NonNull::new(address.cast::<Counters>())
            .ok_or_else(|| io::Error::other("mmap() returned a null mapping"))?;

        // SAFETY: The mapping is page-aligned, large enough and exclusively ours.
        unsafe {
            counters.write(Counters::default());
        }

        Ok(Self { counters })
    }

    fn counters(&self) -> &Counters {
        // SAFETY: Initialized in new() and unmapped only when `self` is dropped.
        unsafe { self.counters.as_ref() }
    }

    pub(crate) fn add_messages_received(&self, count: u64) {
        self.counters()
            .messages_received
            .fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_sent(&self, count: u64) {
        self.counters().bytes_sent.fetch_add(count, Ordering::Relaxed);
    }

    /// Only meaningful once every worker has been reaped; joining orders the workers' updates
    /// before this read.
    pub(crate) fn messages_received(&self) -> u64 {
        self.counters().messages_received.load(Ordering::Relaxed)
    }

    /// See [`messages_received()`][Self::messages_received].
    pub(crate) fn bytes_sent(&self) -> u64 {
        self.counters().bytes_sent.load(Ordering::Relaxed)
    }
}

impl Drop for TransferTally {
    #[cfg_attr(test, mutants::skip)] // Impractical to observe an unmapping.
    fn drop(&mut self) {
        // SAFETY: We mapped exactly this range in new() and nothing references it anymore.
        // Forked children have their own view of the mapping, unaffected by this.
        unsafe {
            libc::munmap(self.counters.as_ptr().cast(), size_of::<Counters>());
        }
    }
}
