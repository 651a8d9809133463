pub mod error;
pub mod funder;
#[cfg(test)]
pub(crate) mod testkit;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::signature::Signature;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use solana_system_interface::instruction as system_instruction;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use error::{SubmitError, retry_backoff};
pub use funder::{BatchFunder, FundingError, FundingOptions, FundingResult};
pub use types::{OperationResult, OperationStatus, TransferIntent};

use crate::fees::FeeOracle;
use crate::monitoring::{EventBus, LifecycleEvent};
use crate::rpc::{GatewayError, LedgerGateway, SendOptions, SignatureVerdict};
use crate::wallet::WalletIdentity;

/// 每笔签名的基础协议费 (lamports)。
pub const BASE_SIGNATURE_FEE: u64 = 5_000;
/// 单个批次交易的计算预算上限, 覆盖最多 5 笔转账加预算指令。
pub const CHUNK_COMPUTE_UNIT_LIMIT: u32 = 50_000;

/// 一次提交的选项。
#[derive(Clone, Debug)]
pub struct SubmitOptions {
    pub skip_preflight: bool,
    pub max_retries: u32,
    /// 指数退避的基准延时。
    pub retry_delay: Duration,
    pub confirmation_timeout: Duration,
    /// 不设置时向费率预言机询价。
    pub priority_fee: Option<u64>,
    pub check_fee_spike: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(60),
            priority_fee: None,
            check_fee_spike: true,
        }
    }
}

/// 提交引擎: 构建、签名、发送并确认一个逻辑转账单元。
///
/// 重试循环 Building -> Sent -> {Confirmed | Failed}, 可重试失败
/// 回到 Building。每次尝试都取全新区块引用; 任何失败后的下一次
/// 尝试之前, 先对上一次的签名做状态复查, 已落地的交易绝不重发。
pub struct SubmissionEngine {
    gateway: Arc<dyn LedgerGateway>,
    oracle: Arc<FeeOracle>,
    events: Arc<EventBus>,
}

impl SubmissionEngine {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        oracle: Arc<FeeOracle>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            gateway,
            oracle,
            events,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// 解析本次提交的优先费与尖峰阈值。
    pub async fn resolve_priority_fee(&self, options: &SubmitOptions) -> (u64, u64) {
        match options.priority_fee {
            Some(fee) => (fee, self.oracle.spike_threshold().await),
            None => {
                let quote = self.oracle.quote().await;
                (quote.optimal, quote.spike_threshold)
            }
        }
    }

    /// 提交一个转账单元并跟踪到终态。所有失败都折叠进
    /// [`OperationResult`], 调用方拿到的永远是完整结论。
    pub async fn submit(
        &self,
        index: usize,
        intents: &[TransferIntent],
        identity: &WalletIdentity,
        options: &SubmitOptions,
    ) -> OperationResult {
        let total: u64 = intents.iter().map(|intent| intent.amount).sum();

        if intents.is_empty() {
            return OperationResult::failed(
                index,
                SubmitError::Validation("转账单元不能为空".into()).to_string(),
                None,
                0,
            );
        }
        if let Some(bad) = intents
            .iter()
            .find(|intent| intent.source != identity.pubkey)
        {
            return OperationResult::failed(
                index,
                SubmitError::Validation(format!(
                    "意图源 {} 与签名者 {} 不一致",
                    bad.source, identity.pubkey
                ))
                .to_string(),
                None,
                total,
            );
        }

        let (priority_fee, spike_threshold) = self.resolve_priority_fee(options).await;
        if options.check_fee_spike && priority_fee > spike_threshold {
            self.events.emit(LifecycleEvent::FeeSpikeDetected {
                index,
                proposed: priority_fee,
                threshold: spike_threshold,
            });
            return OperationResult::skipped(
                index,
                SubmitError::FeeSpike {
                    proposed: priority_fee,
                    threshold: spike_threshold,
                }
                .to_string(),
                total,
            );
        }

        let send_options = SendOptions {
            skip_preflight: options.skip_preflight,
        };
        let fee_paid = estimated_transaction_fee(priority_fee);

        let mut last_signature: Option<Signature> = None;
        let mut last_sent_at: Option<Instant> = None;
        let mut last_error = String::from("尚未尝试发送");

        for attempt in 0..=options.max_retries {
            // 幂等性守护: 上一次发送可能已经落地, 先查再发。
            if attempt > 0 {
                if let Some(verdict) = self
                    .recheck_previous(index, last_signature.as_ref(), last_sent_at)
                    .await
                {
                    return verdict.finish(total, fee_paid);
                }
            }

            let reference = match self.gateway.latest_block_reference().await {
                Ok(reference) => reference,
                Err(err) if err.is_retryable() && attempt < options.max_retries => {
                    last_error = err.to_string();
                    self.schedule_retry(index, attempt, &err, options).await;
                    continue;
                }
                Err(err) => {
                    self.events.emit(LifecycleEvent::Failed {
                        index,
                        error: err.to_string(),
                        attempt,
                    });
                    return OperationResult::failed(
                        index,
                        err.to_string(),
                        last_signature.map(|sig| sig.to_string()),
                        total,
                    );
                }
            };

            debug!(
                target: "engine::submit",
                index,
                attempt,
                blockhash = %reference.blockhash,
                last_valid_block_height = reference.last_valid_block_height,
                priority_fee,
                "构建转账交易"
            );
            let transaction =
                build_transfer_transaction(identity, intents, priority_fee, &reference);

            let sent_at = Instant::now();
            let signature = match self.gateway.send_transaction(&transaction, &send_options).await
            {
                Ok(signature) => signature,
                Err(err) if err.is_retryable() && attempt < options.max_retries => {
                    last_error = err.to_string();
                    self.schedule_retry(index, attempt, &err, options).await;
                    continue;
                }
                Err(err) => {
                    self.events.emit(LifecycleEvent::Failed {
                        index,
                        error: err.to_string(),
                        attempt,
                    });
                    return OperationResult::failed(index, err.to_string(), None, total);
                }
            };

            last_signature = Some(signature);
            last_sent_at = Some(sent_at);
            self.events.emit(LifecycleEvent::Sent {
                index,
                signature: signature.to_string(),
                attempt,
            });

            match self
                .gateway
                .wait_for_confirmation(&signature, &reference, options.confirmation_timeout)
                .await
            {
                Ok(()) => {
                    let latency_ms = sent_at.elapsed().as_millis() as u64;
                    self.events.emit(LifecycleEvent::Confirmed {
                        index,
                        signature: signature.to_string(),
                        latency_ms,
                    });
                    return OperationResult::confirmed(
                        index,
                        signature.to_string(),
                        latency_ms,
                        total,
                        fee_paid,
                    );
                }
                // 账本明确拒绝是硬失败, 不再重试。
                Err(GatewayError::Rejected(reason)) => {
                    self.events.emit(LifecycleEvent::Failed {
                        index,
                        error: reason.clone(),
                        attempt,
                    });
                    return OperationResult::failed(
                        index,
                        GatewayError::Rejected(reason).to_string(),
                        Some(signature.to_string()),
                        total,
                    );
                }
                Err(err) => {
                    last_error = err.to_string();
                    if attempt < options.max_retries {
                        self.schedule_retry(index, attempt, &err, options).await;
                    }
                }
            }
        }

        // 预算用完后再复查一次, 避免把已落地的交易报成失败。
        if let Some(verdict) = self
            .recheck_previous(index, last_signature.as_ref(), last_sent_at)
            .await
        {
            return verdict.finish(total, fee_paid);
        }

        let error = SubmitError::RetriesExhausted(last_error).to_string();
        self.events.emit(LifecycleEvent::Failed {
            index,
            error: error.clone(),
            attempt: options.max_retries,
        });
        OperationResult::failed(
            index,
            error,
            last_signature.map(|sig| sig.to_string()),
            total,
        )
    }

    async fn schedule_retry(
        &self,
        index: usize,
        attempt: u32,
        err: &GatewayError,
        options: &SubmitOptions,
    ) {
        let delay = retry_backoff(err, attempt, options.retry_delay);
        warn!(
            target: "engine::submit",
            index,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "尝试失败, 安排重试"
        );
        self.events.emit(LifecycleEvent::RetryScheduled {
            index,
            attempt: attempt + 1,
            delay_ms: delay.as_millis() as u64,
        });
        tokio::time::sleep(delay).await;
    }

    /// 查询上一次尝试的最终命运。返回 Some 表示已有终态结论。
    async fn recheck_previous(
        &self,
        index: usize,
        signature: Option<&Signature>,
        sent_at: Option<Instant>,
    ) -> Option<PreviousVerdict> {
        let signature = signature?;
        match self.gateway.signature_status(signature).await {
            Ok(SignatureVerdict::Confirmed) => {
                let latency_ms = sent_at
                    .map(|at| at.elapsed().as_millis() as u64)
                    .unwrap_or_default();
                info!(
                    target: "engine::submit",
                    index,
                    signature = %signature,
                    "上一次发送已确认, 不再重发"
                );
                self.events.emit(LifecycleEvent::Confirmed {
                    index,
                    signature: signature.to_string(),
                    latency_ms,
                });
                Some(PreviousVerdict::Confirmed {
                    index,
                    signature: signature.to_string(),
                    latency_ms,
                })
            }
            Ok(SignatureVerdict::Rejected(reason)) => {
                self.events.emit(LifecycleEvent::Failed {
                    index,
                    error: reason.clone(),
                    attempt: 0,
                });
                Some(PreviousVerdict::Rejected {
                    index,
                    signature: signature.to_string(),
                    reason,
                })
            }
            Ok(SignatureVerdict::Unknown) => None,
            Err(err) => {
                debug!(
                    target: "engine::submit",
                    index,
                    error = %err,
                    "幂等性复查失败, 按未知处理"
                );
                None
            }
        }
    }
}

enum PreviousVerdict {
    Confirmed {
        index: usize,
        signature: String,
        latency_ms: u64,
    },
    Rejected {
        index: usize,
        signature: String,
        reason: String,
    },
}

impl PreviousVerdict {
    fn finish(self, total: u64, fee_paid: u64) -> OperationResult {
        match self {
            PreviousVerdict::Confirmed {
                index,
                signature,
                latency_ms,
            } => OperationResult::confirmed(index, signature, latency_ms, total, fee_paid),
            PreviousVerdict::Rejected {
                index,
                signature,
                reason,
            } => OperationResult::failed(
                index,
                GatewayError::Rejected(reason).to_string(),
                Some(signature),
                total,
            ),
        }
    }
}

/// 单个批次交易的预估总费用: 基础签名费加优先费预算。
pub fn estimated_transaction_fee(priority_fee: u64) -> u64 {
    let priority_lamports =
        priority_fee.saturating_mul(u64::from(CHUNK_COMPUTE_UNIT_LIMIT)) / 1_000_000;
    BASE_SIGNATURE_FEE.saturating_add(priority_lamports)
}

fn build_transfer_transaction(
    identity: &WalletIdentity,
    intents: &[TransferIntent],
    priority_fee: u64,
    reference: &crate::rpc::BlockReference,
) -> Transaction {
    let mut instructions: Vec<Instruction> = Vec::with_capacity(intents.len() + 2);
    instructions.push(ComputeBudgetInstruction::set_compute_unit_limit(
        CHUNK_COMPUTE_UNIT_LIMIT,
    ));
    if priority_fee > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            priority_fee,
        ));
    }
    for intent in intents {
        instructions.push(system_instruction::transfer(
            &intent.source,
            &intent.destination,
            intent.amount,
        ));
    }

    let signers: Vec<&dyn Signer> = vec![identity.signer.as_ref()];
    Transaction::new_signed_with_payer(
        &instructions,
        Some(&identity.pubkey),
        &signers,
        reference.blockhash,
    )
}
