pub mod limiter;
pub mod solana;

use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use thiserror::Error;

pub use limiter::{LimiterProfile, RateLimiter};
pub use solana::SolanaGateway;

/// 表示一次发送可用的区块引用快照。
///
/// 每次发送尝试前必须重新获取；账本高度越过
/// `last_valid_block_height` 后该引用即失效，不可复用。
#[derive(Clone, Debug)]
pub struct BlockReference {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// 最近区块的优先费采样，仅在内存中短暂存在。
#[derive(Clone, Copy, Debug)]
pub struct FeeSample {
    pub slot: u64,
    pub fee: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SendOptions {
    pub skip_preflight: bool,
}

/// 签名状态查询的结论，幂等性复查依赖它区分三种情况。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureVerdict {
    /// 节点尚未见到该签名，或尚未达到目标确认级别。
    Unknown,
    Confirmed,
    Rejected(String),
}

/// RPC 层错误分类。原始 `ClientError` 只在网关边界被归类一次，
/// 可重试性由变体本身决定，上层不做字符串匹配。
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("请求被限流: {0}")]
    RateLimited(String),
    #[error("区块引用已过期: {0}")]
    StaleReference(String),
    #[error("确认超时, 已等待 {waited_ms} ms")]
    ConfirmationTimeout { waited_ms: u64 },
    #[error("账本拒绝交易: {0}")]
    Rejected(String),
    #[error("余额不足以支付费用: {0}")]
    InsufficientFunds(String),
    #[error("参数校验失败: {0}")]
    Validation(String),
    #[error("网络错误: {0}")]
    Network(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited(_)
                | GatewayError::StaleReference(_)
                | GatewayError::ConfirmationTimeout { .. }
                | GatewayError::Network(_)
        )
    }
}

/// 核心消费的账本 RPC 能力面。生产实现是 [`SolanaGateway`]；
/// 测试用内存 mock 替换。
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn latest_block_reference(&self) -> Result<BlockReference, GatewayError>;

    async fn balance(&self, address: &Pubkey) -> Result<u64, GatewayError>;

    async fn send_transaction(
        &self,
        transaction: &Transaction,
        options: &SendOptions,
    ) -> Result<Signature, GatewayError>;

    /// 等待签名达到确认级别。账本明确拒绝返回 `Rejected`，
    /// 超出时限返回 `ConfirmationTimeout`，区块引用失效返回
    /// `StaleReference`。
    async fn wait_for_confirmation(
        &self,
        signature: &Signature,
        reference: &BlockReference,
        timeout: Duration,
    ) -> Result<(), GatewayError>;

    /// 单次状态查询，用于重试前的幂等性复查。
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<SignatureVerdict, GatewayError>;

    async fn recent_fee_samples(&self) -> Result<Vec<FeeSample>, GatewayError>;

    /// 系统账户的免租底线，回收阶段留存用。
    async fn minimum_balance_floor(&self) -> Result<u64, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes_match_taxonomy() {
        assert!(GatewayError::RateLimited("429".into()).is_retryable());
        assert!(GatewayError::StaleReference("expired".into()).is_retryable());
        assert!(GatewayError::ConfirmationTimeout { waited_ms: 1 }.is_retryable());
        assert!(GatewayError::Network("reset".into()).is_retryable());

        assert!(!GatewayError::Rejected("bad ix".into()).is_retryable());
        assert!(!GatewayError::InsufficientFunds("0 lamports".into()).is_retryable());
        assert!(!GatewayError::Validation("empty".into()).is_retryable());
    }
}
