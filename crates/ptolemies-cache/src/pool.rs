use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub max_size: usize,
    pub active: usize,
    pub available: usize,
    pub created: u64,
    pub reused: u64,
    pub timeouts: u64,
    pub errors: u64,
}

#[derive(Default)]
struct PoolCounters {
    active: usize,
    created: u64,
    reused: u64,
    timeouts: u64,
    errors: u64,
}

/// Bounded permit pool governing concurrency of an external call site.
///
/// No real connections are held; a permit is an abstract right to issue one
/// call. `acquire` waits up to the configured timeout for a free permit.
pub struct ConnectionPool {
    max_size: usize,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
    counters: Mutex<PoolCounters>,
}

impl ConnectionPool {
    pub fn new(max_size: usize, timeout: Duration) -> Self {
        Self {
            max_size,
            timeout,
            semaphore: Arc::new(Semaphore::new(max_size)),
            counters: Mutex::new(PoolCounters::default()),
        }
    }

    /// Acquire one permit, or return false on timeout. The caller must pair
    /// every successful acquire with a `release`.
    pub async fn acquire(&self) -> bool {
        match tokio::time::timeout(self.timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => {
                // The permit is tracked by release(), not by RAII drop.
                permit.forget();
                let mut counters = self.counters.lock();
                counters.active += 1;
                counters.reused += 1;
                debug!(active = counters.active, "connection permit acquired");
                true
            }
            Ok(Err(_)) => {
                self.counters.lock().errors += 1;
                warn!("connection pool semaphore closed");
                false
            }
            Err(_) => {
                self.counters.lock().timeouts += 1;
                warn!(timeout_ms = self.timeout.as_millis() as u64, "connection acquisition timeout");
                false
            }
        }
    }

    pub fn release(&self) {
        let mut counters = self.counters.lock();
        if counters.active > 0 {
            counters.active -= 1;
            self.semaphore.add_permits(1);
            debug!(active = counters.active, "connection permit released");
        }
    }

    pub fn stats(&self) -> PoolStats {
        let counters = self.counters.lock();
        PoolStats {
            max_size: self.max_size,
            active: counters.active,
            available: self.max_size - counters.active,
            created: counters.created,
            reused: counters.reused,
            timeouts: counters.timeouts,
            errors: counters.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_and_release_track_active_count() {
        let pool = ConnectionPool::new(2, Duration::from_millis(100));
        assert!(pool.acquire().await);
        assert!(pool.acquire().await);

        let stats = pool.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.available, 0);

        pool.release();
        let stats = pool.stats();
        assert_eq!(stats.active, 1);
        assert_eq!(stats.available, 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = ConnectionPool::new(1, Duration::from_millis(30));
        assert!(pool.acquire().await);
        assert!(!pool.acquire().await);
        assert_eq!(pool.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn released_permit_becomes_acquirable() {
        let pool = Arc::new(ConnectionPool::new(1, Duration::from_millis(200)));
        assert!(pool.acquire().await);

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.release();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn release_without_acquire_is_a_no_op() {
        let pool = ConnectionPool::new(1, Duration::from_millis(30));
        pool.release();
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.available, 1);
    }
}
