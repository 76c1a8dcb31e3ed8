use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

use dmapipe_transport::TransferTag;

use crate::stats::MuxStats;

/// Deferred work items, processed strictly in order by the worker.
#[derive(Debug)]
pub(crate) enum Task {
    /// An inbound transfer completed; parse and dispatch the posted buffer.
    RxComplete,
    /// The outbound transfer tagged `tag` completed.
    TxComplete(TransferTag),
    /// Invoke the next write-done callback from the pool.
    WriteDone,
    /// Retire one consumed TX descriptor slot.
    RetireTx,
    /// Stop the worker.
    Shutdown,
}

/// Producer half of the deferred-work queue.
///
/// `push` never blocks and is safe to call from the transport's
/// completion context; overflow drops the task and counts it.
#[derive(Clone)]
pub(crate) struct TaskSender {
    tx: SyncSender<Task>,
    stats: Arc<MuxStats>,
}

impl TaskSender {
    pub fn push(&self, task: Task) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                self.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                tracing::error!(?task, "deferred-work queue full, dropping task");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("deferred-work queue closed");
            }
        }
    }

    /// Blocking push, for shutdown from caller context only.
    pub fn push_blocking(&self, task: Task) {
        let _ = self.tx.send(task);
    }
}

pub(crate) fn channel(depth: usize, stats: Arc<MuxStats>) -> (TaskSender, Receiver<Task>) {
    let (tx, rx) = mpsc::sync_channel(depth);
    (TaskSender { tx, stats }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_counted_not_blocking() {
        let stats = Arc::new(MuxStats::default());
        let (sender, _receiver) = channel(1, Arc::clone(&stats));

        sender.push(Task::RxComplete);
        sender.push(Task::RxComplete);
        sender.push(Task::RetireTx);

        assert_eq!(stats.snapshot().queue_overflows, 2);
    }

    #[test]
    fn tasks_drain_in_fifo_order() {
        let stats = Arc::new(MuxStats::default());
        let (sender, receiver) = channel(8, stats);

        sender.push(Task::RxComplete);
        sender.push(Task::TxComplete(3));
        sender.push(Task::WriteDone);
        sender.push(Task::RetireTx);

        assert!(matches!(receiver.recv().unwrap(), Task::RxComplete));
        assert!(matches!(receiver.recv().unwrap(), Task::TxComplete(3)));
        assert!(matches!(receiver.recv().unwrap(), Task::WriteDone));
        assert!(matches!(receiver.recv().unwrap(), Task::RetireTx));
    }

    #[test]
    fn push_after_receiver_drop_is_silent() {
        let stats = Arc::new(MuxStats::default());
        let (sender, receiver) = channel(1, Arc::clone(&stats));
        drop(receiver);

        sender.push(Task::Shutdown);
        assert_eq!(stats.snapshot().queue_overflows, 0);
    }
}
