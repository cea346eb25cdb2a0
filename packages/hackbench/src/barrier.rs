//! Start rendezvous between the controller and every worker of a run.
//!
//! Each worker writes one byte to the shared readiness channel and then waits for the shared
//! wake channel to become readable. The controller reads one readiness byte per worker and then
//! writes a single byte to the wake channel.
//!
//! Waiting workers only poll the wake channel for readability and never read from it, so the one
//! release byte stays in the channel and every waiter observes it, however many there are and in
//! whatever order they wake up. No waiter can consume the release intended for another.

use std::time::Duration;

use crate::channel::{Channel, ChannelFactory};
use crate::{BarrierError, ChannelSetupError, KillFlag, WorkerError, WorkerExit, WorkerLabel};

const READY_UNIT: u8 = b'*';
const RELEASE_UNIT: u8 = b'!';

/// How long the controller waits for the next readiness announcement before checking whether
/// a worker has stopped.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub(crate) struct StartBarrier {
    ready: Channel,
    wake: Channel,
}

impl StartBarrier {
    pub(crate) fn new(factory: ChannelFactory) -> Result<Self, ChannelSetupError> {
        Ok(Self {
            ready: factory.create()?,
            wake: factory.create()?,
        })
    }

    /// Worker side: announces readiness and blocks until the controller releases everyone.
    pub(crate) fn announce_and_wait(&self, kill: &KillFlag) -> Result<(), WorkerError> {
        self.ready
            .write
            .write_full(&[READY_UNIT], kill)
            .map_err(|e| kill.failure(e, WorkerError::Barrier))?;

        self.wake
            .read
            .wait_readable(kill)
            .map_err(|e| kill.failure(e, WorkerError::Barrier))
    }

    /// Controller side: blocks until `expected` workers have announced readiness.
    ///
    /// Whenever no announcement arrives for [`LIVENESS_CHECK_INTERVAL`], `stopped_worker` is
    /// asked whether any worker has already stopped. A stopped worker can never announce, so
    /// that ends the wait with [`BarrierError::WorkerStopped`].
    pub(crate) fn await_ready(
        &self,
        expected: usize,
        mut stopped_worker: impl FnMut() -> Option<(WorkerLabel, WorkerExit)>,
    ) -> Result<(), BarrierError> {
        // The controller is never killed.
        let kill = KillFlag::default();
        let mut unit = [0_u8; 1];
        let mut received: usize = 0;

        while received < expected {
            let readable = self
                .ready
                .read
                .poll_readable(LIVENESS_CHECK_INTERVAL)
                .map_err(|source| BarrierError::ReadinessRead {
                    received,
                    expected,
                    source,
                })?;

            if readable {
                self.ready
                    .read
                    .read_full(&mut unit, &kill)
                    .map_err(|source| BarrierError::ReadinessRead {
                        received,
                        expected,
                        source,
                    })?;

                received = received.saturating_add(1);
            } else if let Some((worker, exit)) = stopped_worker() {
                return Err(BarrierError::WorkerStopped {
                    worker: worker.to_string(),
                    exit,
                    received,
                    expected,
                });
            }
        }

        Ok(())
    }

    /// Controller side: lets every waiting worker proceed.
    pub(crate) fn release(&self) -> Result<(), BarrierError> {
        self.wake
            .write
            .write_full(&[RELEASE_UNIT], &KillFlag::default())
            .map_err(|source| BarrierError::Release { source })
    }
}
