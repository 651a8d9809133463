use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

/// 端点限流画像：最小调用间隔 + 最大并发在途数。
#[derive(Clone, Copy, Debug)]
pub struct LimiterProfile {
    pub min_interval: Duration,
    pub max_in_flight: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl LimiterProfile {
    /// 公共端点：约 300ms 间隔，最多 3 个在途请求。
    pub fn public() -> Self {
        Self {
            min_interval: Duration::from_millis(300),
            max_in_flight: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
        }
    }

    /// 付费端点：约 100ms 间隔，最多 10 个在途请求。
    pub fn premium() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_in_flight: 10,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(4),
        }
    }
}

/// 进程级共享的 RPC 调用闸门。所有 RPC 调用（包括余额与
/// 优先费查询）都要先从这里取许可，而不只是发送路径。
pub struct RateLimiter {
    profile: LimiterProfile,
    in_flight: Semaphore,
    next_slot: Mutex<Option<Instant>>,
    consecutive_throttles: AtomicU32,
}

pub struct RateLimitPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl RateLimiter {
    pub fn new(profile: LimiterProfile) -> Self {
        Self {
            profile,
            in_flight: Semaphore::new(profile.max_in_flight),
            next_slot: Mutex::new(None),
            consecutive_throttles: AtomicU32::new(0),
        }
    }

    pub fn profile(&self) -> LimiterProfile {
        self.profile
    }

    /// 获取一次调用许可：先占并发席位，再按最小间隔排队。
    /// 许可在返回值析构时释放。
    pub async fn acquire(&self) -> RateLimitPermit<'_> {
        let permit = self
            .in_flight
            .acquire()
            .await
            .expect("rate limiter semaphore closed");

        let wait = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let scheduled = match *next {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next = Some(scheduled + self.profile.min_interval);
            scheduled.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        RateLimitPermit { _permit: permit }
    }

    /// 429 之后调用，返回本次调用应退避的时长（指数、封顶）。
    /// 与交易层的重试退避相互独立。
    pub fn throttled_backoff(&self) -> Duration {
        let strikes = self
            .consecutive_throttles
            .fetch_add(1, Ordering::Relaxed)
            .min(8);
        let backoff = self
            .profile
            .backoff_base
            .saturating_mul(1u32 << strikes)
            .min(self.profile.backoff_cap);
        debug!(
            target: "rpc::limiter",
            strikes = strikes + 1,
            backoff_ms = backoff.as_millis() as u64,
            "端点限流, 安排退避"
        );
        backoff
    }

    /// 任一调用成功后重置限流计数。
    pub fn mark_success(&self) {
        self.consecutive_throttles.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn enforces_minimum_interval() {
        let limiter = RateLimiter::new(LimiterProfile {
            min_interval: Duration::from_millis(300),
            max_in_flight: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(1),
        });

        let start = Instant::now();
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        // 第一次立即通过，后两次各排队 300ms。
        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test]
    async fn caps_in_flight_calls() {
        let limiter = RateLimiter::new(LimiterProfile {
            min_interval: Duration::ZERO,
            max_in_flight: 2,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(1),
        });

        let first = limiter.acquire().await;
        let _second = limiter.acquire().await;
        let third = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(third.is_err(), "third call should block at the permit cap");

        drop(first);
        let retry = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(retry.is_ok(), "permit release should unblock waiters");
    }

    #[test]
    fn throttle_backoff_grows_and_resets() {
        let limiter = RateLimiter::new(LimiterProfile::public());
        let first = limiter.throttled_backoff();
        let second = limiter.throttled_backoff();
        assert!(second > first);
        assert!(second <= limiter.profile().backoff_cap);

        limiter.mark_success();
        assert_eq!(limiter.throttled_backoff(), first);
    }
}
