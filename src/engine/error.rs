use std::time::Duration;

use thiserror::Error;

use crate::rpc::GatewayError;

/// 固定短退避, 区块引用过期换个新引用即可, 不必等太久。
const STALE_REFERENCE_DELAY: Duration = Duration::from_millis(200);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("参数校验失败: {0}")]
    Validation(String),
    #[error("优先费尖峰: 提议 {proposed} 超过阈值 {threshold}")]
    FeeSpike { proposed: u64, threshold: u64 },
    #[error("重试次数耗尽: {0}")]
    RetriesExhausted(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// 按错误类别决定下一次尝试前的退避时长。
/// 引用过期用固定短延时, 限流用更陡的乘性延时。
pub fn retry_backoff(err: &GatewayError, attempt: u32, base: Duration) -> Duration {
    let exponent = attempt.min(6);
    match err {
        GatewayError::StaleReference(_) => STALE_REFERENCE_DELAY,
        GatewayError::RateLimited(_) => base
            .saturating_mul(1u32 << exponent)
            .saturating_mul(2)
            .min(BACKOFF_CAP),
        _ => base.saturating_mul(1u32 << exponent).min(BACKOFF_CAP),
    }
}
