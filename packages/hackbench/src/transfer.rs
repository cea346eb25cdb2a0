//! The measured work: senders spraying fixed-size messages at every receiver of their group and
//! receivers draining them.

use std::os::fd::RawFd;
use std::sync::Arc;

use crate::barrier::StartBarrier;
use crate::channel::Endpoint;
use crate::tally::TransferTally;
use crate::{KillFlag, WorkerError};

/// Byte every message is filled with.
const MESSAGE_FILL: u8 = b'-';

/// Everything a sender needs. One instance is shared by all senders of a group and is never
/// modified after construction.
#[derive(Debug)]
pub(crate) struct SenderContext {
    outputs: Vec<Endpoint>,
    loops: usize,
    message: Box<[u8]>,
    barrier: Arc<StartBarrier>,
    tally: Arc<TransferTally>,
}

impl SenderContext {
    /// `outputs` are the write ends of the channels of every receiver in the group.
    pub(crate) fn new(
        outputs: Vec<Endpoint>,
        loops: usize,
        message_size: usize,
        barrier: Arc<StartBarrier>,
        tally: Arc<TransferTally>,
    ) -> Self {
        Self {
            outputs,
            loops,
            message: vec![MESSAGE_FILL; message_size].into_boxed_slice(),
            barrier,
            tally,
        }
    }

    pub(crate) fn fan_out(&self) -> usize {
        self.outputs.len()
    }

    /// Waits for the start signal, then writes `loops` rounds of one message to every receiver.
    pub(crate) fn run(&self, kill: &KillFlag) -> Result<(), WorkerError> {
        self.barrier.announce_and_wait(kill)?;

        let mut bytes_sent: u64 = 0;
        let result = self.pump(kill, &mut bytes_sent);
        self.tally.add_bytes_sent(bytes_sent);

        result
    }

    fn pump(&self, kill: &KillFlag, bytes_sent: &mut u64) -> Result<(), WorkerError> {
        let message_len = self.message.len() as u64;

        for _ in 0..self.loops {
            for output in &self.outputs {
                output
                    .write_full(&self.message, kill)
                    .map_err(|e| kill.failure(e, WorkerError::Transfer))?;

                *bytes_sent = bytes_sent.saturating_add(message_len);
            }
        }

        Ok(())
    }
}

/// Everything a receiver needs. Owned by exactly one receiver.
#[derive(Debug)]
pub(crate) struct ReceiverContext {
    input: Endpoint,
    expected_messages: usize,
    buffer: Box<[u8]>,
    barrier: Arc<StartBarrier>,
    tally: Arc<TransferTally>,

    /// Write ends that a forked receiver inherited from the controller and must close, or it
    /// would keep its own channel open and never see end-of-file when the senders go away.
    inherited_write_ends: Vec<RawFd>,
}

impl ReceiverContext {
    pub(crate) fn new(
        input: Endpoint,
        expected_messages: usize,
        message_size: usize,
        barrier: Arc<StartBarrier>,
        tally: Arc<TransferTally>,
    ) -> Self {
        Self {
            input,
            expected_messages,
            // Allocated up front, so a forked receiver does not allocate at all.
            buffer: vec![0; message_size].into_boxed_slice(),
            barrier,
            tally,
            inherited_write_ends: Vec::new(),
        }
    }

    /// Marks descriptors as copies that only exist in this receiver because it is a forked
    /// process. They are closed when the receiver starts running.
    ///
    /// Never use this for a receiver thread: the descriptors belong to the whole process there.
    pub(crate) fn close_on_start(&mut self, write_ends: impl IntoIterator<Item = RawFd>) {
        self.inherited_write_ends.extend(write_ends);
    }

    /// Waits for the start signal, then reads exactly `expected_messages` whole messages.
    pub(crate) fn run(mut self, kill: &KillFlag) -> Result<(), WorkerError> {
        for fd in self.inherited_write_ends.drain(..) {
            // SAFETY: The descriptor is this forked process's private copy of a write end owned
            // by the controller. No `Endpoint` in this process closes it again because a forked
            // worker exits without running destructors.
            unsafe {
                libc::close(fd);
            }
        }

        self.barrier.announce_and_wait(kill)?;

        let mut received: u64 = 0;
        let result = self.drain(kill, &mut received);
        self.tally.add_messages_received(received);

        result
    }

    fn drain(&mut self, kill: &KillFlag, received: &mut u64) -> Result<(), WorkerError> {
        for _ in 0..self.expected_messages {
            self.input
                .read_full(&mut self.buffer, kill)
                .map_err(|e| kill.failure(e, WorkerError::Transfer))?;

            *received = received.saturating_add(1);
        }

        Ok(())
    }
}
