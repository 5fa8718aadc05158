use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::identity::ClientIdentity;
use crate::{GateConfigError, Rejection, Verdict};

/// Sliding-window limiter: at most `max_requests` admitted writes per client
/// within any trailing `window`.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    max_requests: usize,
    window: Duration,

    /// Admitted request times per client. Every entry is younger than
    /// `window` as of the last check for that client.
    buckets: Mutex<HashMap<ClientIdentity, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Result<Self, GateConfigError> {
        if max_requests == 0 || window.is_zero() {
            return Err(GateConfigError::InvalidRateLimit);
        }

        Ok(Self {
            inner: Arc::new(RateLimiterInner {
                max_requests,
                window,
                buckets: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn max_requests(&self) -> usize {
        self.inner.max_requests
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Drops expired timestamps for `identity`, then admits and records `now`
    /// if the client is under budget. A rejected request is not recorded.
    pub fn check_and_record(&self, identity: &ClientIdentity, now: Instant) -> Verdict {
        let window = self.inner.window;
        let mut buckets = self.buckets();
        let bucket = buckets.entry(identity.clone()).or_default();

        bucket.retain(|&seen| now.saturating_duration_since(seen) < window);

        if bucket.len() >= self.inner.max_requests {
            debug!(client = %identity, in_window = bucket.len(), "rate limit hit");
            return Verdict::Reject(Rejection::RateLimited {
                max: self.inner.max_requests,
                window_secs: window.as_secs(),
            });
        }

        bucket.push_back(now);
        Verdict::Admit
    }

    /// Requests `identity` could still make right now without being rejected.
    pub fn remaining(&self, identity: &ClientIdentity, now: Instant) -> usize {
        let window = self.inner.window;
        let used = self
            .buckets()
            .get(identity)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|&&seen| now.saturating_duration_since(seen) < window)
                    .count()
            })
            .unwrap_or(0);
        self.inner.max_requests.saturating_sub(used)
    }

    /// Forgets clients whose every timestamp has aged out. Returns how many
    /// buckets were removed.
    pub fn prune_idle(&self, now: Instant) -> usize {
        let window = self.inner.window;
        let mut buckets = self.buckets();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            bucket
                .iter()
                .any(|&seen| now.saturating_duration_since(seen) < window)
        });
        before - buckets.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets().len()
    }

    // A panic while holding the lock cannot leave a bucket half-written,
    // so a poisoned table is still safe to use.
    fn buckets(&self) -> MutexGuard<'_, HashMap<ClientIdentity, VecDeque<Instant>>> {
        self.inner
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background task that drops idle rate buckets once per window.
pub async fn run_prune_loop(limiter: RateLimiter) {
    let mut interval = tokio::time::interval(limiter.window());

    loop {
        interval.tick().await;

        let pruned = limiter.prune_idle(Instant::now());
        if pruned > 0 {
            info!("Rate limiter: pruned {} idle clients", pruned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(5, Duration::from_secs(60)).unwrap()
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn first_request_is_admitted() {
        let limiter = limiter();
        let client = ClientIdentity::from("198.51.100.1");
        assert!(limiter.check_and_record(&client, Instant::now()).is_admit());
    }

    #[test]
    fn sixth_write_in_window_is_rejected() {
        let limiter = limiter();
        let client = ClientIdentity::from("198.51.100.1");
        let start = Instant::now();

        for i in 0..5 {
            assert_eq!(limiter.check_and_record(&client, start + secs(i)), Verdict::Admit);
        }

        assert_eq!(
            limiter.check_and_record(&client, start + secs(10)),
            Verdict::Reject(Rejection::RateLimited { max: 5, window_secs: 60 })
        );
        assert_eq!(limiter.remaining(&client, start + secs(10)), 0);
    }

    #[test]
    fn admission_resumes_after_window_elapses() {
        let limiter = limiter();
        let client = ClientIdentity::from("198.51.100.1");
        let start = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_and_record(&client, start).is_admit());
        }
        assert!(!limiter.check_and_record(&client, start + secs(59)).is_admit());

        let later = start + secs(60);
        for _ in 0..5 {
            assert!(limiter.check_and_record(&client, later).is_admit());
        }
        assert!(!limiter.check_and_record(&client, later).is_admit());
    }

    #[test]
    fn oldest_aging_out_frees_exactly_one_slot() {
        let limiter = limiter();
        let client = ClientIdentity::from("198.51.100.1");
        let start = Instant::now();

        for i in 0..5 {
            assert!(limiter.check_and_record(&client, start + secs(i * 10)).is_admit());
        }

        // Only the request at t=0 has expired by t=65.
        assert!(limiter.check_and_record(&client, start + secs(65)).is_admit());
        assert!(!limiter.check_and_record(&client, start + secs(66)).is_admit());
    }

    #[test]
    fn rejected_requests_do_not_extend_the_window() {
        let limiter = limiter();
        let client = ClientIdentity::from("198.51.100.1");
        let start = Instant::now();

        for _ in 0..5 {
            limiter.check_and_record(&client, start);
        }
        for i in 1..50 {
            assert!(!limiter.check_and_record(&client, start + secs(i)).is_admit());
        }
        assert!(limiter.check_and_record(&client, start + secs(60)).is_admit());
    }

    #[test]
    fn clients_have_independent_buckets() {
        let limiter = limiter();
        let a = ClientIdentity::from("198.51.100.1");
        let b = ClientIdentity::from("198.51.100.2");
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_and_record(&a, now).is_admit());
        }
        assert!(!limiter.check_and_record(&a, now).is_admit());
        assert!(limiter.check_and_record(&b, now).is_admit());
        assert_eq!(limiter.remaining(&b, now), 4);
    }

    #[test]
    fn prune_drops_only_idle_clients() {
        let limiter = limiter();
        let idle = ClientIdentity::from("198.51.100.1");
        let busy = ClientIdentity::from("198.51.100.2");
        let start = Instant::now();

        limiter.check_and_record(&idle, start);
        limiter.check_and_record(&busy, start + secs(30));
        assert_eq!(limiter.tracked_clients(), 2);

        assert_eq!(limiter.prune_idle(start + secs(70)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.remaining(&busy, start + secs(70)), 4);
    }

    #[test]
    fn concurrent_writes_from_one_client_never_exceed_budget() {
        let limiter = limiter();
        let client = ClientIdentity::from("198.51.100.1");
        let now = Instant::now();

        let admitted: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let limiter = limiter.clone();
                    let client = client.clone();
                    s.spawn(move || limiter.check_and_record(&client, now).is_admit() as usize)
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 5);
    }

    #[test]
    fn zero_budget_is_a_config_error() {
        assert!(RateLimiter::new(0, secs(60)).is_err());
        assert!(RateLimiter::new(5, Duration::ZERO).is_err());
    }
}
