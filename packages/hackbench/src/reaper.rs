use tracing::{debug, warn};

use crate::{WorkerBackend, WorkerExit, WorkerHandle, WorkerLabel};

/// Joins every worker in `handles`, in order, and returns how many of them did not complete
/// normally.
///
/// With `force_kill`, every worker is first asked to terminate. This is the emergency path used
/// when setup fails partway; it guarantees that no worker outlives the call. Handles that were
/// already reaped keep their recorded status and are neither signaled nor waited for again, so
/// reaping the same handles twice yields the same count.
pub(crate) fn reap(
    backend: &dyn WorkerBackend,
    handles: &mut [WorkerHandle],
    force_kill: bool,
) -> usize {
    if force_kill {
        for handle in handles.iter() {
            if let Err(e) = backend.signal_kill(handle) {
                debug!(worker = %handle.label(), error = %e, "termination signal not delivered");
            }
        }
    }

    let mut failed: usize = 0;

    for handle in handles.iter_mut() {
        let already_reaped = handle.is_reaped();
        let exit = backend.join(handle);

        if !exit.is_normal() {
            failed = failed.saturating_add(1);

            if !force_kill && !already_reaped {
                warn!(worker = %handle.label(), %exit, "worker did not complete normally");
            }
        }
    }

    failed
}

/// Finds a worker that has already stopped, reaping it, without blocking on any of them.
pub(crate) fn find_stopped(
    backend: &dyn WorkerBackend,
    handles: &mut [WorkerHandle],
) -> Option<(WorkerLabel, WorkerExit)> {
    handles
        .iter_mut()
        .find_map(|handle| Some((handle.label(), backend.try_join(handle)?)))
}
