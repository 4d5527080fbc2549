// ============================================================
// Bounded Queues
// ============================================================
// A blocking producer/consumer buffer with a fixed capacity.
//
//   Fifo           — items leave in arrival order
//   RandomShuffle  — a random item leaves, but only while more than
//                    `min_after_dequeue` items remain buffered, so
//                    the output is well mixed
//
// Closing a queue wakes every waiter: producers fail immediately,
// consumers drain what is left and then fail.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::error::DataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Fifo,
    RandomShuffle { min_after_dequeue: usize },
}

struct State<T> {
    items:  VecDeque<T>,
    closed: bool,
    rng:    StdRng,
}

pub struct BoundedQueue<T> {
    state:     Mutex<State<T>>,
    not_empty: Condvar,
    not_full:  Condvar,
    capacity:  usize,
    kind:      QueueKind,
}

impl<T> BoundedQueue<T> {
    pub fn fifo(capacity: usize) -> Self {
        Self::new(capacity, QueueKind::Fifo, None)
    }

    pub fn random_shuffle(capacity: usize, min_after_dequeue: usize, seed: Option<u64>) -> Self {
        Self::new(capacity, QueueKind::RandomShuffle { min_after_dequeue }, seed)
    }

    /// A shuffle queue always has room for one item above its
    /// reserve, otherwise nothing could ever leave.
    pub fn new(capacity: usize, kind: QueueKind, seed: Option<u64>) -> Self {
        let capacity = match kind {
            QueueKind::Fifo => capacity.max(1),
            QueueKind::RandomShuffle { min_after_dequeue } => capacity.max(min_after_dequeue + 1),
        };
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            state: Mutex::new(State { items: VecDeque::with_capacity(capacity), closed: false, rng }),
            not_empty: Condvar::new(),
            not_full:  Condvar::new(),
            capacity,
            kind,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until there is room, then push. Fails once closed.
    pub fn enqueue(&self, item: T) -> Result<(), DataError> {
        let mut state = self.lock();
        while !state.closed && state.items.len() >= self.capacity {
            state = self.not_full.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(DataError::QueueClosed);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item may leave, then pop it. Fails once closed
    /// and drained.
    pub fn dequeue(&self) -> Result<T, DataError> {
        let mut state = self.lock();
        loop {
            if state.items.len() > self.reserve() || (state.closed && !state.items.is_empty()) {
                break;
            }
            if state.closed {
                return Err(DataError::QueueClosed);
            }
            state = self.not_empty.wait(state).unwrap_or_else(PoisonError::into_inner);
        }

        let item = match self.kind {
            QueueKind::Fifo => state.items.pop_front(),
            QueueKind::RandomShuffle { .. } => {
                let len = state.items.len();
                let index = state.rng.gen_range(0..len);
                state.items.swap_remove_back(index)
            }
        };
        drop(state);
        self.not_full.notify_one();
        item.ok_or(DataError::QueueClosed)
    }

    /// Items that must stay buffered before one may leave.
    fn reserve(&self) -> usize {
        match self.kind {
            QueueKind::Fifo => 0,
            QueueKind::RandomShuffle { min_after_dequeue } => min_after_dequeue,
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn fifo_preserves_order() {
        let q = BoundedQueue::fifo(4);
        for i in 0..4 {
            q.enqueue(i).unwrap();
        }
        let out: Vec<i32> = (0..4).map(|_| q.dequeue().unwrap()).collect();
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[test]
    fn shuffle_queue_keeps_its_reserve_until_closed() {
        let q = Arc::new(BoundedQueue::random_shuffle(10, 3, Some(1)));
        for i in 0..5 {
            q.enqueue(i).unwrap();
        }
        // two items may leave, the third must wait
        q.dequeue().unwrap();
        q.dequeue().unwrap();
        assert_eq!(q.len(), 3);

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.dequeue())
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 3);

        q.close();
        assert!(consumer.join().unwrap().is_ok());
        // closed queues drain then fail
        assert!(q.dequeue().is_ok());
        assert!(q.dequeue().is_ok());
        assert!(matches!(q.dequeue(), Err(DataError::QueueClosed)));
    }

    #[test]
    fn close_wakes_blocked_producer() {
        let q = Arc::new(BoundedQueue::fifo(1));
        q.enqueue(0).unwrap();
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.enqueue(1))
        };
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert!(matches!(producer.join().unwrap(), Err(DataError::QueueClosed)));
    }

    #[test]
    fn shuffle_queue_returns_every_item() {
        let q = BoundedQueue::random_shuffle(100, 0, Some(9));
        for i in 0..50 {
            q.enqueue(i).unwrap();
        }
        let mut out: Vec<i32> = (0..50).map(|_| q.dequeue().unwrap()).collect();
        out.sort_unstable();
        assert_eq!(out, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_queue_dequeues_above_its_reserve() {
        let q = BoundedQueue::random_shuffle(8, 2, Some(4));
        for i in 0..6 {
            q.enqueue(i).unwrap();
        }
        let mut out: Vec<i32> = (0..4).map(|_| q.dequeue().unwrap()).collect();
        assert_eq!(q.len(), 2);
        q.close();
        out.push(q.dequeue().unwrap());
        out.push(q.dequeue().unwrap());
        out.sort_unstable();
        assert_eq!(out, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn shuffle_capacity_leaves_room_above_the_reserve() {
        let q = BoundedQueue::<u8>::random_shuffle(5, 5, None);
        assert_eq!(q.capacity(), 6);
        let q = BoundedQueue::<u8>::fifo(0);
        assert_eq!(q.capacity(), 1);
    }
}
