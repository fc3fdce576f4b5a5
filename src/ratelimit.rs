//! Per-service and global token buckets.
//!
//! Buckets are governor direct rate limiters kept behind `RwLock`ed slots so
//! a job-carried override can swap a limiter atomically while other workers
//! keep waiting on the one they already cloned out.

use crate::protocol::RateLimitConfig;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const IMAGE_HOST_RPS: f64 = 2.0;
const IMAGE_HOST_BURST: u32 = 5;
const FORUM_RPS: f64 = 1.0;
const FORUM_BURST: u32 = 3;
const GLOBAL_RPS: f64 = 10.0;
const GLOBAL_BURST: u32 = 20;

/// Services seeded at startup; anything else gets the image-host default on
/// first sight.
const IMAGE_HOSTS: &[&str] = &[
    "imx.to",
    "pixhost.to",
    "vipr.im",
    "turboimagehost",
    "imagebam.com",
];
const FORUM_HOST: &str = "vipergirls.to";

#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    #[error("requests_per_second must be a positive finite number, got {0}")]
    InvalidRate(f64),
    #[error("burst_size must be at least 1")]
    InvalidBurst,
}

fn build_limiter(requests_per_second: f64, burst: u32) -> Result<DirectLimiter, LimitError> {
    if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
        return Err(LimitError::InvalidRate(requests_per_second));
    }
    let burst = NonZeroU32::new(burst).ok_or(LimitError::InvalidBurst)?;
    let period = Duration::from_secs_f64(1.0 / requests_per_second);
    let quota = Quota::with_period(period)
        .ok_or(LimitError::InvalidRate(requests_per_second))?
        .allow_burst(burst);
    Ok(RateLimiter::direct(quota))
}

struct GlobalBucket {
    limiter: Arc<DirectLimiter>,
    burst: u32,
}

/// Registry of per-service buckets plus the process-wide one.
pub struct RateLimiterRegistry {
    services: RwLock<HashMap<String, Arc<DirectLimiter>>>,
    global: RwLock<GlobalBucket>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        let mut services = HashMap::new();
        for host in IMAGE_HOSTS {
            if let Ok(limiter) = build_limiter(IMAGE_HOST_RPS, IMAGE_HOST_BURST) {
                services.insert(host.to_string(), Arc::new(limiter));
            }
        }
        if let Ok(limiter) = build_limiter(FORUM_RPS, FORUM_BURST) {
            services.insert(FORUM_HOST.to_string(), Arc::new(limiter));
        }
        let global = build_limiter(GLOBAL_RPS, GLOBAL_BURST)
            .expect("default global rate limit is valid");
        Self {
            services: RwLock::new(services),
            global: RwLock::new(GlobalBucket {
                limiter: Arc::new(global),
                burst: GLOBAL_BURST,
            }),
        }
    }

    fn limiter_for(&self, service: &str) -> Arc<DirectLimiter> {
        {
            let services = self.services.read().expect("limiter registry lock");
            if let Some(limiter) = services.get(service) {
                return limiter.clone();
            }
        }
        let mut services = self.services.write().expect("limiter registry lock");
        services
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(
                    build_limiter(IMAGE_HOST_RPS, IMAGE_HOST_BURST)
                        .expect("default rate limit is valid"),
                )
            })
            .clone()
    }

    /// Waits on the global bucket, then the service bucket. Runs under the
    /// caller's deadline: dropping the returned future abandons the wait.
    pub async fn wait_for(&self, service: &str) {
        let global = {
            let bucket = self.global.read().expect("global limiter lock");
            bucket.limiter.clone()
        };
        global.until_ready().await;
        self.limiter_for(service).until_ready().await;
    }

    /// Atomically replaces the service bucket; a positive `global_limit`
    /// also replaces the global bucket, preserving its current burst.
    pub fn update(&self, service: &str, config: &RateLimitConfig) -> Result<(), LimitError> {
        let limiter = build_limiter(config.requests_per_second, config.burst_size)?;

        if config.global_limit > 0.0 {
            let burst = self.global.read().expect("global limiter lock").burst;
            let global = build_limiter(config.global_limit, burst)?;
            let mut bucket = self.global.write().expect("global limiter lock");
            bucket.limiter = Arc::new(global);
        }

        let mut services = self.services.write().expect("limiter registry lock");
        services.insert(service.to_string(), Arc::new(limiter));
        Ok(())
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn rejects_invalid_configs() {
        assert!(build_limiter(0.0, 5).is_err());
        assert!(build_limiter(-1.0, 5).is_err());
        assert!(build_limiter(f64::NAN, 5).is_err());
        assert!(build_limiter(f64::INFINITY, 5).is_err());
        assert!(build_limiter(2.0, 0).is_err());
        assert!(build_limiter(0.5, 1).is_ok());
    }

    #[test]
    fn update_rejects_bad_override() {
        let registry = RateLimiterRegistry::new();
        let err = registry.update(
            "pixhost.to",
            &RateLimitConfig {
                requests_per_second: 0.0,
                burst_size: 1,
                global_limit: 0.0,
            },
        );
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn enforces_sustained_rate_after_burst() {
        let registry = RateLimiterRegistry::new();
        registry
            .update(
                "pixhost.to",
                &RateLimitConfig {
                    requests_per_second: 10.0,
                    burst_size: 1,
                    global_limit: 0.0,
                },
            )
            .unwrap();

        let start = Instant::now();
        for _ in 0..4 {
            registry.wait_for("pixhost.to").await;
        }
        // burst of 1 at 10 rps: three of the four permits wait ~100ms each.
        assert!(
            start.elapsed() >= Duration::from_millis(250),
            "rate not enforced: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn unknown_service_gets_default_bucket() {
        let registry = RateLimiterRegistry::new();
        // Must not panic or block forever.
        registry.wait_for("brand-new-host.example").await;
        registry.wait_for("brand-new-host.example").await;
    }
}
