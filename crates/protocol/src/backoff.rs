//! Capped exponential backoff with jitter, shared by the exchange client
//! reconnect loop (spec §4.2), the orderbook resync loop (spec §4.3), and the
//! publisher's retry loop (spec §4.4) — each configures its own base/factor/
//! cap, but the shape (exponential, capped, jittered) is identical.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Jitter as a fraction of the computed delay, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl BackoffConfig {
    /// spec §4.2: base 1s, factor 2, cap 60s, jitter ±20%.
    pub fn exchange_client() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

/// Stateful backoff generator: call `next_delay()` after each failure,
/// `reset()` on success.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Computes the next delay and advances internal attempt state.
    pub fn next_delay(&mut self) -> Duration {
        let raw_ms = self.config.base.as_millis() as f64 * self.config.factor.powi(self.attempt as i32);
        let capped_ms = raw_ms.min(self.config.cap.as_millis() as f64);
        self.attempt = self.attempt.saturating_add(1);

        if self.config.jitter <= 0.0 {
            return Duration::from_millis(capped_ms as u64);
        }
        let mut rng = rand::thread_rng();
        let jitter_span = capped_ms * self.config.jitter;
        let jittered = capped_ms + rng.gen_range(-jitter_span..=jitter_span);
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_respect_cap() {
        let config = BackoffConfig {
            base: Duration::from_millis(100),
            factor: 2.0,
            cap: Duration::from_millis(800),
            jitter: 0.0,
        };
        let mut backoff = ExponentialBackoff::new(config);
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 800, 800]);
    }

    #[test]
    fn reset_restarts_sequence() {
        let config = BackoffConfig {
            base: Duration::from_millis(50),
            factor: 2.0,
            cap: Duration::from_secs(10),
            jitter: 0.0,
        };
        let mut backoff = ExponentialBackoff::new(config);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay().as_millis(), 50);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = BackoffConfig {
            base: Duration::from_millis(1000),
            factor: 1.0,
            cap: Duration::from_millis(1000),
            jitter: 0.2,
        };
        let mut backoff = ExponentialBackoff::new(config);
        for _ in 0..50 {
            let ms = backoff.next_delay().as_millis();
            assert!((800..=1200).contains(&ms), "delay {ms} out of ±20% bound");
        }
    }
}
