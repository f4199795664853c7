//! Bounded concurrent fan-out of independent lookups.
//!
//! Every bulk detector pushes its per-IOC lookups through [`FanOut`], which
//! caps both the number of in-flight operations and the rate at which new
//! operations start. A failing, panicking or timed-out unit yields `None`
//! at its own position and never disturbs the others.

use crate::error::FanOutError;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

pub const DEFAULT_MAX_AT_ONCE: usize = 10;
pub const DEFAULT_MAX_PER_SECOND: f64 = 5.0;
pub const DEFAULT_UNIT_TIMEOUT_SECONDS: u64 = 10;

/// Leaky-bucket start-rate limiter.
///
/// The whole state is one atomic holding the next free start slot in
/// nanoseconds since `epoch`. Each caller claims a slot with a
/// compare-exchange and sleeps until it arrives, so starts are spaced by
/// `1 / max_per_second` with no burst allowance.
#[derive(Debug)]
pub struct Throttle {
    interval_nanos: Option<u64>,
    epoch: Instant,
    next_slot: AtomicU64,
}

impl Throttle {
    pub fn new(max_per_second: Option<f64>) -> Result<Self, FanOutError> {
        let interval_nanos = match max_per_second {
            None => None,
            Some(rate) if rate.is_finite() && rate > 0.0 => {
                Some((1_000_000_000.0 / rate).round() as u64)
            }
            Some(rate) => return Err(FanOutError::InvalidRate(rate)),
        };

        Ok(Self {
            interval_nanos,
            epoch: Instant::now(),
            next_slot: AtomicU64::new(0),
        })
    }

    pub fn unlimited() -> Self {
        Self {
            interval_nanos: None,
            epoch: Instant::now(),
            next_slot: AtomicU64::new(0),
        }
    }

    /// Claim the next start slot and return how long to wait for it.
    pub fn reserve(&self) -> Duration {
        let Some(interval) = self.interval_nanos else {
            return Duration::ZERO;
        };

        let now = self.epoch.elapsed().as_nanos() as u64;
        let mut current = self.next_slot.load(Ordering::Acquire);
        loop {
            let slot = current.max(now);
            match self.next_slot.compare_exchange_weak(
                current,
                slot.saturating_add(interval),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Duration::from_nanos(slot - now),
                Err(actual) => current = actual,
            }
        }
    }

    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    pub max_at_once: usize,
    pub max_per_second: Option<f64>,
    pub timeout_seconds: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_at_once: DEFAULT_MAX_AT_ONCE,
            max_per_second: Some(DEFAULT_MAX_PER_SECOND),
            timeout_seconds: DEFAULT_UNIT_TIMEOUT_SECONDS,
        }
    }
}

pub struct FanOut {
    semaphore: Semaphore,
    throttle: Throttle,
    unit_timeout: Duration,
}

impl FanOut {
    pub fn new(config: &FanOutConfig) -> Result<Self, FanOutError> {
        Self::with_throttle(
            config.max_at_once,
            Throttle::new(config.max_per_second)?,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn with_throttle(
        max_at_once: usize,
        throttle: Throttle,
        unit_timeout: Duration,
    ) -> Result<Self, FanOutError> {
        if max_at_once == 0 {
            return Err(FanOutError::InvalidConcurrency);
        }

        Ok(Self {
            semaphore: Semaphore::new(max_at_once),
            throttle,
            unit_timeout,
        })
    }

    /// Run every unit and return their results in input order.
    ///
    /// All units are polled on the calling task; nothing is spawned.
    pub async fn run_all<F, Fut, T, E>(&self, units: Vec<F>) -> Vec<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        join_all(
            units
                .into_iter()
                .enumerate()
                .map(|(index, unit)| self.run_one(index, unit)),
        )
        .await
    }

    async fn run_one<F, Fut, T, E>(&self, index: usize, unit: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        // The semaphore is never closed, so acquire only fails on misuse.
        let _permit = self.semaphore.acquire().await.ok()?;
        self.throttle.acquire().await;

        let guarded = AssertUnwindSafe(async move { unit().await }).catch_unwind();
        match tokio::time::timeout(self.unit_timeout, guarded).await {
            Ok(Ok(Ok(value))) => Some(value),
            Ok(Ok(Err(e))) => {
                log::debug!("Fan-out unit {index} failed: {e}");
                None
            }
            Ok(Err(_)) => {
                log::debug!("Fan-out unit {index} panicked");
                None
            }
            Err(_) => {
                log::debug!(
                    "Fan-out unit {index} timed out after {}s",
                    self.unit_timeout.as_secs_f64()
                );
                None
            }
        }
    }
}

/// Zip results back against the keys they were produced from, dropping
/// the positions that came back empty.
pub fn pair_results<K, T>(keys: Vec<K>, results: Vec<Option<T>>) -> Vec<(K, T)> {
    keys.into_iter()
        .zip(results)
        .filter_map(|(key, result)| result.map(|value| (key, value)))
        .collect()
}
