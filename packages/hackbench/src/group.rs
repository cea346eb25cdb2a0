//! Building the topology: groups of receivers and the senders spraying at them.

use std::collections::TryReserveError;
use std::ops::Range;
use std::sync::Arc;

use tracing::trace;

use crate::barrier::StartBarrier;
use crate::channel::{ChannelFactory, Endpoint};
use crate::config::Topology;
use crate::error::SetupError;
use crate::tally::TransferTally;
use crate::transfer::{ReceiverContext, SenderContext};
use crate::{
    BenchmarkConfig, ExecutionMode, WorkerBackend, WorkerHandle, WorkerLabel, WorkerRole,
};

/// Every started worker of a run, in spawn order.
///
/// Sized up front for the whole run. Group `g` occupies the contiguous index range
/// `g * 2F .. (g + 1) * 2F`: first its F receivers, then its F senders.
#[derive(Debug)]
pub(crate) struct ChildTable {
    handles: Vec<WorkerHandle>,
    workers_per_group: usize,
}

impl ChildTable {
    pub(crate) fn new(topology: &Topology) -> Result<Self, TryReserveError> {
        let mut handles = Vec::new();
        handles.try_reserve_exact(topology.total_workers.get())?;

        Ok(Self {
            handles,
            workers_per_group: topology.workers_per_group.get(),
        })
    }

    /// How many workers have been started so far.
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn push(&mut self, handle: WorkerHandle) {
        debug_assert!(
            self.handles.len() < self.handles.capacity(),
            "child table was sized for the whole run"
        );

        self.handles.push(handle);
    }

    /// Index range of the given group's workers.
    pub(crate) fn group_range(&self, group: usize) -> Range<usize> {
        let start = group.saturating_mul(self.workers_per_group);
        start..start.saturating_add(self.workers_per_group)
    }

    #[cfg(test)]
    pub(crate) fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    pub(crate) fn handles_mut(&mut self) -> &mut [WorkerHandle] {
        &mut self.handles
    }
}

/// Shared ingredients of every group of a run.
#[derive(Debug)]
pub(crate) struct GroupPlan<'a> {
    pub(crate) config: &'a BenchmarkConfig,
    pub(crate) topology: Topology,
    pub(crate) factory: ChannelFactory,
    pub(crate) barrier: &'a Arc<StartBarrier>,
    pub(crate) tally: &'a Arc<TransferTally>,
}

/// Starts the F receivers and then the F senders of one group, appending their handles to
/// `table`.
///
/// On failure, the handles of every worker started before the failure, this group's included,
/// are in `table` and nothing else is: `table.len()` is exactly the number of workers to reap.
pub(crate) fn spawn_group(
    backend: &dyn WorkerBackend,
    table: &mut ChildTable,
    group: usize,
    plan: &GroupPlan<'_>,
) -> Result<(), SetupError> {
    let config = plan.config;
    let fan_out = config.fan_out().get();
    let mut outputs = Vec::with_capacity(fan_out);

    for index in 0..fan_out {
        let channel = plan.factory.create()?;

        let mut receiver = ReceiverContext::new(
            channel.read,
            plan.topology.messages_per_receiver.get(),
            config.message_size().get(),
            Arc::clone(plan.barrier),
            Arc::clone(plan.tally),
        );

        // A forked receiver inherits the write end of its own channel and of the channels of
        // the receivers before it. Those copies would hide the end-of-file that tells it the
        // senders are gone.
        if backend.mode() == ExecutionMode::Process {
            receiver.close_on_start(
                outputs
                    .iter()
                    .chain([&channel.write])
                    .map(Endpoint::as_raw_fd),
            );
        }

        let label = WorkerLabel::new(group, WorkerRole::Receiver, index);

        // In process mode, dropping the entry after the fork closes our copy of the read end.
        let handle = backend.spawn(label, Box::new(move |kill| receiver.run(kill)))?;
        trace!(worker = %label, "spawned");

        table.push(handle);
        outputs.push(channel.write);
    }

    // Every receiver of the group is running, now the senders can be given all the write ends.
    let sender = Arc::new(SenderContext::new(
        outputs,
        config.loops().get(),
        config.message_size().get(),
        Arc::clone(plan.barrier),
        Arc::clone(plan.tally),
    ));

    debug_assert_eq!(sender.fan_out(), fan_out);

    for index in 0..fan_out {
        let label = WorkerLabel::new(group, WorkerRole::Sender, index);

        let handle = backend.spawn(
            label,
            Box::new({
                let sender = Arc::clone(&sender);
                move |kill| sender.run(kill)
            }),
        )?;
        trace!(worker = %label, "spawned");

        table.push(handle);
    }

    // In process mode this was the last reference in the controller, closing our copies of the
    // write ends. In thread mode the sender threads keep the context alive.
    drop(sender);

    Ok(())
}
