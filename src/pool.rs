//! Bounded pool of backend sessions (spec.md §4.C).
//!
//! A LIFO free-list guarded by a plain `std::sync::Mutex`, with a
//! `tokio::sync::Notify` used to wake blocked acquirers. The mutex is kept
//! synchronous (rather than `tokio::sync::Mutex`) so that releasing a
//! session back to the pool — which happens in `Drop` — never needs to be
//! async. Ordering among waiters is not guaranteed to be FIFO, matching
//! spec.md's "ordering is not guaranteed to be FIFO."

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

struct Inner<T> {
    free: Mutex<Vec<T>>,
    notify: Notify,
    capacity: usize,
    allocated: AtomicUsize,
}

/// A bounded pool of backend sessions of type `T`. Capacity is fixed at
/// construction (`N = 64` per spec.md §4.C, configurable here for testing).
pub struct Pool<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                free: Mutex::new(Vec::with_capacity(capacity)),
                notify: Notify::new(),
                capacity,
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    pub fn idle(&self) -> usize {
        self.inner.free.lock().expect("pool lock poisoned").len()
    }

    /// Acquires a session: pop the free-list if non-empty, else open a new
    /// one if under capacity, else block until a release wakes this waiter.
    /// `open` is only ever invoked while under capacity; a failed open does
    /// not count against `N` (spec.md §4.C).
    pub async fn acquire<F, Fut>(&self, open: F) -> Option<Session<T>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        loop {
            if let Some(session) = self.try_pop() {
                return Some(Session::new(session, self.clone()));
            }

            if self.try_reserve() {
                match open().await {
                    Some(session) => return Some(Session::new(session, self.clone())),
                    None => {
                        self.inner.allocated.fetch_sub(1, Ordering::Relaxed);
                        self.inner.notify.notify_one();
                        continue;
                    }
                }
            }

            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().await;
        }
    }

    fn try_pop(&self) -> Option<T> {
        self.inner.free.lock().expect("pool lock poisoned").pop()
    }

    fn try_reserve(&self) -> bool {
        self.inner
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n < self.inner.capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn release(&self, session: T) {
        self.inner
            .free
            .lock()
            .expect("pool lock poisoned")
            .push(session);
        self.inner.notify.notify_one();
    }
}

/// An acquired session. Releasing it back to the free-list and waking one
/// waiter happens synchronously on drop.
pub struct Session<T: Send + 'static> {
    value: Option<T>,
    pool: Pool<T>,
}

impl<T: Send + 'static> Session<T> {
    fn new(value: T, pool: Pool<T>) -> Self {
        Self {
            value: Some(value),
            pool,
        }
    }
}

impl<T: Send + 'static> std::ops::Deref for Session<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("session value taken")
    }
}

impl<T: Send + 'static> std::ops::DerefMut for Session<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("session value taken")
    }
}

impl<T: Send + 'static> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_opens_up_to_capacity_then_blocks() {
        let pool: Pool<u32> = Pool::new(2);
        let counter = Arc::new(AtomicU32::new(0));

        let open = {
            let counter = Arc::clone(&counter);
            move || {
                let counter = Arc::clone(&counter);
                async move { Some(counter.fetch_add(1, Ordering::SeqCst)) }
            }
        };

        let a = pool.acquire(open.clone()).await.unwrap();
        let b = pool.acquire(open.clone()).await.unwrap();
        assert_eq!(pool.allocated(), 2);

        let pool2 = pool.clone();
        let open2 = open.clone();
        let blocked = tokio::spawn(async move { pool2.acquire(open2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        drop(a);
        let c = blocked.await.unwrap().unwrap();
        assert_eq!(pool.allocated(), 2);
        drop(b);
        drop(c);
    }

    #[tokio::test]
    async fn released_session_is_reused_without_reopening() {
        let pool: Pool<u32> = Pool::new(1);
        let opens = Arc::new(AtomicU32::new(0));
        let open = {
            let opens = Arc::clone(&opens);
            move || {
                let opens = Arc::clone(&opens);
                async move {
                    opens.fetch_add(1, Ordering::SeqCst);
                    Some(1u32)
                }
            }
        };

        let a = pool.acquire(open.clone()).await.unwrap();
        drop(a);
        let _b = pool.acquire(open).await.unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_open_does_not_count_against_capacity() {
        let pool: Pool<u32> = Pool::new(1);
        let attempt = Arc::new(AtomicU32::new(0));
        let open = {
            let attempt = Arc::clone(&attempt);
            move || {
                let attempt = Arc::clone(&attempt);
                async move {
                    let n = attempt.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        None
                    } else {
                        Some(42u32)
                    }
                }
            }
        };

        let session = pool.acquire(open).await.unwrap();
        assert_eq!(*session, 42);
        assert_eq!(pool.allocated(), 1);
    }
}
