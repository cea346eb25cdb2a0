//! Byte channels between workers and the blocking I/O performed on them.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::{ChannelSetupError, KillFlag, Transport};

/// Creates the byte channels of a run. The transport is fixed when the factory is created, so
/// every channel of a run is of the same kind.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ChannelFactory {
    transport: Transport,
}

impl ChannelFactory {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub(crate) fn transport(self) -> Transport {
        self.transport
    }

    /// Creates a channel whose write end delivers bytes to its read end.
    ///
    /// For socket pairs both ends are bidirectional but we only ever use them one way.
    pub(crate) fn create(self) -> Result<Channel, ChannelSetupError> {
        let (read, write) = match self.transport {
            Transport::Pipe => pipe(),
            Transport::SocketPair => {
                UnixStream::pair().map(|(a, b)| (OwnedFd::from(a), OwnedFd::from(b)))
            }
        }
        .map_err(|source| ChannelSetupError::new(self.transport, source))?;

        Ok(Channel {
            read: Endpoint::new(read),
            write: Endpoint::new(write),
        })
    }
}

fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [RawFd; 2] = [-1; 2];

    // SAFETY: `fds` is a valid buffer for the two descriptors pipe2() writes on success.
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    let [read, write] = fds;

    // SAFETY: pipe2() succeeded, so both descriptors are open and owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) })
}

/// The two ends of one channel.
#[derive(Debug)]
pub(crate) struct Channel {
    pub(crate) read: Endpoint,
    pub(crate) write: Endpoint,
}

/// One end of a channel. Dropping it closes the descriptor.
///
/// All I/O is blocking, without timeouts. Every operation retries after a signal interrupts it,
/// unless the kill flag of the calling worker is set, in which case the interruption is
/// returned as an [`io::ErrorKind::Interrupted`] error.
#[derive(Debug)]
pub(crate) struct Endpoint {
    file: File,
}

impl Endpoint {
    fn new(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
        }
    }

    /// Writes the whole buffer, continuing after partial writes.
    pub(crate) fn write_full(&self, buf: &[u8], kill: &KillFlag) -> io::Result<()> {
        let mut done = 0;

        while let Some(remaining) = buf.get(done..).filter(|rest| !rest.is_empty()) {
            match (&self.file).write(remaining) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(written) => done = done.saturating_add(written),
                Err(e) if retry_after(&e, kill) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Fills the whole buffer, continuing after partial reads.
    pub(crate) fn read_full(&self, buf: &mut [u8], kill: &KillFlag) -> io::Result<()> {
        let mut done = 0;

        while let Some(remaining) = buf.get_mut(done..).filter(|rest| !rest.is_empty()) {
            match (&self.file).read(remaining) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(read) => done = done.saturating_add(read),
                Err(e) if retry_after(&e, kill) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Blocks until the endpoint has data to read (or the peer hung up), without consuming it.
    pub(crate) fn wait_readable(&self, kill: &KillFlag) -> io::Result<()> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: We pass exactly one valid pollfd that lives for the duration of the call.
            let result = unsafe { libc::poll(&raw mut pollfd, 1, -1) };

            if result > 0 {
                return Ok(());
            }

            if result < 0 {
                let e = io::Error::last_os_error();

                if !retry_after(&e, kill) {
                    return Err(e);
                }
            }
        }
    }

    /// Waits up to `timeout` for the endpoint to have data to read (or the peer to hang up),
    /// without consuming it. Returns whether it became readable. An interrupted wait counts as a
    /// timeout.
    pub(crate) fn poll_readable(&self, timeout: Duration) -> io::Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

        // SAFETY: We pass exactly one valid pollfd that lives for the duration of the call.
        let result = unsafe { libc::poll(&raw mut pollfd, 1, timeout_ms) };

        if result >= 0 {
            return Ok(result > 0);
        }

        let e = io::Error::last_os_error();

        if e.kind() == io::ErrorKind::Interrupted {
            Ok(false)
        } else {
            Err(e)
        }
    }

    pub(crate) fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

fn retry_after(e: &io::Error, kill: &KillFlag) -> bool {
    e.kind() == io::ErrorKind::Interrupted && !kill.is_set()
}
