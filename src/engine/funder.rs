use std::sync::Arc;

use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::{info, warn};

use super::{
    OperationResult, SubmissionEngine, SubmitError, SubmitOptions, estimated_transaction_fee,
};
use crate::engine::TransferIntent;
use crate::rpc::GatewayError;
use crate::wallet::WalletIdentity;

pub const DEFAULT_MAX_PER_CHUNK: usize = 5;

#[derive(Clone, Debug)]
pub struct FundingOptions {
    /// 单个签名单元里最多打包的转账笔数。
    pub max_per_chunk: usize,
    pub submit: SubmitOptions,
}

impl Default for FundingOptions {
    fn default() -> Self {
        Self {
            max_per_chunk: DEFAULT_MAX_PER_CHUNK,
            submit: SubmitOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FundingError {
    #[error("余额不足: 可用 {available}, 需要 {required} (含费用预留 {reserve})")]
    InsufficientBalance {
        available: u64,
        required: u64,
        reserve: u64,
    },
    #[error("目标列表为空")]
    NoDestinations,
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[serde_as]
#[derive(Clone, Debug, Default, Serialize)]
pub struct FundingResult {
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    #[serde_as(as = "DisplayFromStr")]
    pub total_funded: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub total_fees_paid: u64,
    pub average_confirmation_ms: Option<u64>,
    pub operations: Vec<OperationResult>,
}

impl FundingResult {
    fn absorb(&mut self, operation: OperationResult) {
        if operation.is_confirmed() {
            self.successful_chunks += 1;
            self.total_funded = self.total_funded.saturating_add(operation.amount);
            self.total_fees_paid = self.total_fees_paid.saturating_add(operation.fee_paid);
        } else {
            self.failed_chunks += 1;
        }
        self.operations.push(operation);
        let latencies: Vec<u64> = self
            .operations
            .iter()
            .filter_map(|op| op.confirmation_latency_ms)
            .collect();
        self.average_confirmation_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() / latencies.len() as u64)
        };
    }
}

/// 把 (目标, 金额) 列表切成定长批次, 逐批驱动提交引擎。
///
/// 批次串行处理: 共享限流器吃得消, 批间余额检查也因此有效。
/// 单批失败记录在案但不中断后续批次。
pub struct BatchFunder {
    engine: Arc<SubmissionEngine>,
}

impl BatchFunder {
    pub fn new(engine: Arc<SubmissionEngine>) -> Self {
        Self { engine }
    }

    pub async fn fund(
        &self,
        source: &WalletIdentity,
        destinations: &[(Pubkey, u64)],
        options: &FundingOptions,
    ) -> Result<FundingResult, FundingError> {
        if destinations.is_empty() {
            return Err(FundingError::NoDestinations);
        }
        let max_per_chunk = options.max_per_chunk.max(1);

        let mut intents = Vec::with_capacity(destinations.len());
        for (destination, amount) in destinations {
            intents.push(TransferIntent::new(
                source.pubkey,
                *destination,
                *amount,
                false,
            )?);
        }

        let total: u64 = intents
            .iter()
            .fold(0u64, |sum, intent| sum.saturating_add(intent.amount));
        let chunk_count = intents.len().div_ceil(max_per_chunk);

        // 先验资再动手, 任何发送之前就拒绝注定失败的整批任务。
        let (priority_fee, _) = self.engine.resolve_priority_fee(&options.submit).await;
        let reserve = estimated_transaction_fee(priority_fee).saturating_mul(chunk_count as u64);
        let required = total.saturating_add(reserve);
        let available = self.engine.gateway().balance(&source.pubkey).await?;
        if available < required {
            return Err(FundingError::InsufficientBalance {
                available,
                required,
                reserve,
            });
        }

        info!(
            target: "engine::funder",
            source = %source.pubkey,
            destinations = destinations.len(),
            chunks = chunk_count,
            total,
            reserve,
            "开始批量注资"
        );

        let mut result = FundingResult::default();
        for (chunk_index, chunk) in intents.chunks(max_per_chunk).enumerate() {
            let operation = self
                .engine
                .submit(chunk_index, chunk, source, &options.submit)
                .await;
            if !operation.is_confirmed() {
                warn!(
                    target: "engine::funder",
                    chunk = chunk_index,
                    status = ?operation.status,
                    error = operation.error.as_deref().unwrap_or(""),
                    "批次未确认, 继续处理剩余批次"
                );
            }
            result.absorb(operation);
        }

        info!(
            target: "engine::funder",
            successful = result.successful_chunks,
            failed = result.failed_chunks,
            total_funded = result.total_funded,
            "批量注资结束"
        );
        Ok(result)
    }
}
