//! Time and randomness ports, injected so tests stay deterministic.

use chrono::{DateTime, Utc};

/// Wall-clock source. The quota limiter uses it for UTC-midnight resets.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Randomness source for backoff jitter and stealth-fetch variation.
pub trait RandomSource: Send + Sync {
    /// Uniform sample in [0, 1).
    fn unit(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn unit(&self) -> f64 {
        rand::random::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_random_stays_in_unit_interval() {
        let rng = ThreadRandom;
        for _ in 0..100 {
            let sample = rng.unit();
            assert!((0.0..1.0).contains(&sample));
        }
    }
}
