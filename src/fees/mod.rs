pub mod collector;

use std::sync::Arc;

use tracing::warn;

use crate::rpc::LedgerGateway;

/// 无采样数据时的固定优先费 (micro-lamports / CU)。
pub const DEFAULT_PRIORITY_FEE: u64 = 5_000;
pub const DEFAULT_PERCENTILE: u8 = 90;
/// 尖峰阈值系数, 150 即 1.5 倍。
pub const DEFAULT_THRESHOLD_FACTOR: u64 = 150;
/// 常规出价系数, 刻意低于尖峰阈值, 正常运行不会触发自己的尖峰检测。
const OPTIMAL_FACTOR: u64 = 120;

/// 一次性读出的费率决策, 避免同一次提交多次打点 RPC。
#[derive(Clone, Copy, Debug)]
pub struct FeeQuote {
    pub current: u64,
    pub optimal: u64,
    pub spike_threshold: u64,
}

/// 把嘈杂的优先费遥测变成可执行的出价与尖峰信号。
///
/// 采样失败一律当作"无数据"回落到固定默认值, 绝不把网络错误
/// 抛给只想询价的调用方。
pub struct FeeOracle {
    gateway: Arc<dyn LedgerGateway>,
    percentile: u8,
    threshold_factor: u64,
}

impl FeeOracle {
    pub fn new(gateway: Arc<dyn LedgerGateway>, percentile: u8, threshold_factor: u64) -> Self {
        Self {
            gateway,
            percentile: percentile.clamp(1, 100),
            threshold_factor,
        }
    }

    pub fn with_defaults(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self::new(gateway, DEFAULT_PERCENTILE, DEFAULT_THRESHOLD_FACTOR)
    }

    /// 稳定分位数估计, 不用均值, 抗单样本离群。
    pub async fn current_fee(&self) -> u64 {
        let samples = match self.gateway.recent_fee_samples().await {
            Ok(samples) => samples,
            Err(err) => {
                warn!(
                    target: "fees::oracle",
                    error = %err,
                    "优先费采样失败, 回落到默认值"
                );
                Vec::new()
            }
        };
        if samples.is_empty() {
            return DEFAULT_PRIORITY_FEE;
        }

        let mut fees: Vec<u64> = samples.iter().map(|sample| sample.fee).collect();
        fees.sort_unstable();
        let len = fees.len();
        // ceil(percentile/100 * len) - 1, 整数运算后夹回有效下标。
        let rank = (self.percentile as usize * len).div_ceil(100);
        let index = rank.saturating_sub(1).min(len - 1);
        fees[index]
    }

    pub async fn spike_threshold(&self) -> u64 {
        spike_of(self.current_fee().await, self.threshold_factor)
    }

    pub async fn optimal_fee(&self) -> u64 {
        optimal_of(self.current_fee().await)
    }

    /// 单次采样, 同时给出出价与阈值。
    pub async fn quote(&self) -> FeeQuote {
        let current = self.current_fee().await;
        FeeQuote {
            current,
            optimal: optimal_of(current),
            spike_threshold: spike_of(current, self.threshold_factor),
        }
    }
}

fn optimal_of(current: u64) -> u64 {
    current.saturating_mul(OPTIMAL_FACTOR) / 100
}

fn spike_of(current: u64, factor: u64) -> u64 {
    current.saturating_mul(factor) / 100
}
