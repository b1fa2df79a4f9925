//! Edge guards: token-bucket rate limiter and semaphore bulkhead.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// ---------------------------------------------------------------------------
// TokenBucket
// ---------------------------------------------------------------------------

/// Integer token bucket. Tokens are tracked in thousandths so refill
/// arithmetic stays exact without floating point.
pub struct TokenBucket {
    rate_per_sec: u64,
    capacity_milli: u64,
    inner: Mutex<BucketInner>,
}

struct BucketInner {
    milli_tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let capacity_milli = burst as u64 * 1_000;
        TokenBucket {
            rate_per_sec: rate_per_sec as u64,
            capacity_milli,
            inner: Mutex::new(BucketInner {
                milli_tokens: capacity_milli,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut g = self.inner.lock().expect("token bucket lock poisoned");
        let now = Instant::now();
        let elapsed_ms = now.duration_since(g.last_refill).as_millis() as u64;
        if elapsed_ms > 0 {
            let refill = elapsed_ms.saturating_mul(self.rate_per_sec);
            g.milli_tokens = (g.milli_tokens + refill).min(self.capacity_milli);
            g.last_refill = now;
        }
        if g.milli_tokens >= 1_000 {
            g.milli_tokens -= 1_000;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Bulkhead
// ---------------------------------------------------------------------------

/// Bounds concurrent in-flight upstream calls. Exceeding it fast-fails
/// instead of queueing, so a slow upstream cannot absorb the worker pool.
pub struct Bulkhead {
    sem: Arc<Semaphore>,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Self {
        Bulkhead {
            sem: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn try_enter(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.sem).try_acquire_owned().ok()
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_enforces_burst_then_rate() {
        // 1 token/sec, burst 2: two immediate calls pass, third is refused.
        let bucket = TokenBucket::new(1, 2);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[test]
    fn bucket_refills_over_time() {
        let bucket = TokenBucket::new(1_000, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(bucket.try_acquire());
    }

    #[test]
    fn bulkhead_fast_fails_at_capacity() {
        let bh = Bulkhead::new(2);
        let p1 = bh.try_enter().unwrap();
        let _p2 = bh.try_enter().unwrap();
        assert!(bh.try_enter().is_none());
        drop(p1);
        assert!(bh.try_enter().is_some());
    }
}
