// ============================================================
// Thread Coordination
// ============================================================
// The Coordinator is shared by every pipeline thread. Stopping it
// sets a flag and closes every registered queue, which unblocks
// any thread waiting on one. Joining waits up to a grace period
// and then leaves stragglers running detached.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::queue::BoundedQueue;

/// How long `exit_threads` waits for threads after a stop request.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

const JOIN_POLL: Duration = Duration::from_millis(10);

/// Anything a stop request must close.
pub trait Closable: Send + Sync {
    fn close(&self);
}

impl<T: Send> Closable for BoundedQueue<T> {
    fn close(&self) {
        BoundedQueue::close(self);
    }
}

#[derive(Default)]
struct Inner {
    stop:   AtomicBool,
    queues: Mutex<Vec<Arc<dyn Closable>>>,
    error:  Mutex<Option<String>>,
}

#[derive(Clone, Default)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_queue(&self, queue: Arc<dyn Closable>) {
        self.inner
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(queue);
    }

    pub fn should_stop(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        if self.inner.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("Coordinator stop requested");
        let queues = self.inner.queues.lock().unwrap_or_else(PoisonError::into_inner);
        for queue in queues.iter() {
            queue.close();
        }
    }

    /// Record the first failure and stop every thread.
    pub fn request_stop_with_error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("Input pipeline error: {}", message);
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(message);
        self.request_stop();
    }

    pub fn error(&self) -> Option<String> {
        self.inner
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for `threads`, giving up after `grace`. Returns how many
    /// threads were still running when the grace period ran out.
    pub fn join(&self, threads: Vec<JoinHandle<()>>, grace: Duration) -> usize {
        let deadline = Instant::now() + grace;
        let mut pending = threads;

        while !pending.is_empty() && Instant::now() < deadline {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|t| t.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    tracing::warn!("Input pipeline thread panicked");
                }
            }
            pending = running;
            if !pending.is_empty() {
                thread::sleep(JOIN_POLL);
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                "{} input pipeline threads did not stop within {:?}; leaving them detached",
                pending.len(),
                grace,
            );
        }
        pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_closes_registered_queues() {
        let coord = Coordinator::new();
        let queue = Arc::new(BoundedQueue::<u8>::fifo(2));
        coord.register_queue(queue.clone());
        assert!(!coord.should_stop());

        coord.request_stop();
        assert!(coord.should_stop());
        assert!(queue.is_closed());
    }

    #[test]
    fn first_error_is_kept() {
        let coord = Coordinator::new();
        coord.request_stop_with_error("disk gone");
        coord.request_stop_with_error("later");
        assert_eq!(coord.error().as_deref(), Some("disk gone"));
    }

    #[test]
    fn join_gives_up_after_grace_period() {
        let coord = Coordinator::new();
        let quick = thread::spawn(|| {});
        let slow  = thread::spawn(|| thread::sleep(Duration::from_millis(500)));
        let stragglers = coord.join(vec![quick, slow], Duration::from_millis(50));
        assert_eq!(stragglers, 1);
    }
}
