use tokio::sync::watch;

use crate::types::Temperature;

#[derive(Debug, Clone, PartialEq)]
pub struct RoomWrite {
    pub room_id: u64,
    pub heating_enabled: bool,
    pub target_temperature: Temperature,
}

/// Result of one flush, broadcast to everyone whose entry rode in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Applied,
    Dropped(String),
}

pub(crate) type OutcomeRx = watch::Receiver<Option<WriteOutcome>>;

/// Single-slot batch of unconfirmed writes, one entry per room id.
///
/// The completion signal belongs to the batch, not to the task that sends it,
/// so cancelling a task never strands the callers waiting on its entries.
pub(crate) struct PendingBatch {
    writes: Vec<RoomWrite>,
    done: watch::Sender<Option<WriteOutcome>>,
}

impl PendingBatch {
    pub fn new() -> Self {
        let (done, _) = watch::channel(None);
        Self {
            writes: Vec::new(),
            done,
        }
    }

    /// Last writer wins per room; other rooms keep their entries.
    pub fn merge(&mut self, write: RoomWrite) -> OutcomeRx {
        self.writes.retain(|w| w.room_id != write.room_id);
        self.writes.push(write);
        self.done.subscribe()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Detach the current batch for sending and leave a fresh one behind.
    pub fn take(&mut self) -> FlushBatch {
        let taken = std::mem::replace(self, PendingBatch::new());
        FlushBatch {
            writes: taken.writes,
            done: taken.done,
        }
    }
}

/// A batch that left the pending slot and is owned by the flushing task.
pub(crate) struct FlushBatch {
    pub writes: Vec<RoomWrite>,
    done: watch::Sender<Option<WriteOutcome>>,
}

impl FlushBatch {
    pub fn finish(self, outcome: WriteOutcome) {
        self.done.send_replace(Some(outcome));
    }
}

/// Wait for the batch carrying our entry to settle.
/// `None` if the batch was dropped without ever reporting.
pub(crate) async fn wait_for_outcome(mut rx: OutcomeRx) -> Option<WriteOutcome> {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(room_id: u64, c: f64) -> RoomWrite {
        RoomWrite {
            room_id,
            heating_enabled: true,
            target_temperature: Temperature::from_celsius(c),
        }
    }

    #[test]
    fn same_room_last_writer_wins() {
        let mut batch = PendingBatch::new();
        batch.merge(write(1, 22.0));
        batch.merge(write(1, 23.0));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.writes[0].target_temperature.celsius(), 23.0);
    }

    #[test]
    fn distinct_rooms_accumulate() {
        let mut batch = PendingBatch::new();
        batch.merge(write(1, 22.0));
        batch.merge(write(2, 18.0));
        batch.merge(write(1, 21.0));
        let ids: Vec<u64> = batch.writes.iter().map(|w| w.room_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn take_leaves_empty_batch() {
        let mut batch = PendingBatch::new();
        batch.merge(write(1, 22.0));
        let flush = batch.take();
        assert_eq!(flush.writes.len(), 1);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn all_waiters_see_the_same_outcome() {
        let mut batch = PendingBatch::new();
        let a = batch.merge(write(1, 22.0));
        let b = batch.merge(write(2, 19.0));
        let flush = batch.take();

        let waiters = tokio::spawn(async move {
            let (a, b) = tokio::join!(wait_for_outcome(a), wait_for_outcome(b));
            (a, b)
        });
        flush.finish(WriteOutcome::Applied);

        let (a, b) = waiters.await.unwrap();
        assert_eq!(a, Some(WriteOutcome::Applied));
        assert_eq!(b, Some(WriteOutcome::Applied));
    }

    #[tokio::test]
    async fn waiter_on_next_batch_is_not_released_by_previous_flush() {
        let mut batch = PendingBatch::new();
        let _first = batch.merge(write(1, 22.0));
        let flush = batch.take();
        let second = batch.merge(write(1, 24.0));

        flush.finish(WriteOutcome::Applied);
        assert!(second.borrow().is_none());
    }

    #[tokio::test]
    async fn dropped_batch_releases_waiters() {
        let mut batch = PendingBatch::new();
        let rx = batch.merge(write(1, 22.0));
        drop(batch.take());
        assert_eq!(wait_for_outcome(rx).await, None);
    }
}
