pub mod summary;

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;
use tracing::{info, warn};

pub use summary::{RunRecorder, RunSummary};

use crate::engine::{
    BatchFunder, FundingOptions, OperationResult, SubmissionEngine, estimated_transaction_fee,
};
use crate::fees::collector;
use crate::rpc::GatewayError;
use crate::scheduler;
use crate::wallet::WalletIdentity;

/// 线性状态机, 无回退转移。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Fund,
    Schedule,
    Execute,
    Reconcile,
    Done,
}

/// 收尾策略由调用方显式选择, 不从 RPC 端点字符串推断。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconciliationStrategy {
    /// 执行生成的调度, 资金留在批量钱包里。
    ExecuteSchedule,
    /// 跳过调度执行, 把余额 (扣除免租底线) 扫回源钱包。
    ReturnToSource,
}

#[derive(Clone, Debug)]
pub struct ServiceFee {
    pub numerator: u64,
    pub denominator: u64,
    pub destination: Option<Pubkey>,
}

#[derive(Clone, Debug)]
pub struct WorkflowSettings {
    /// 要做量的总额, 最小面额。
    pub total_volume: u64,
    pub precision: u32,
    pub service_fee: Option<ServiceFee>,
    pub reconciliation: ReconciliationStrategy,
    pub funding: FundingOptions,
    /// 每个钱包额外预留的费用余量 (lamports)。
    pub wallet_reserve: u64,
}

/// 只有初始化阶段的不可恢复错误才会以 Err 冒出;
/// 之后的一切失败都折叠进 RunSummary。
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("缺少源钱包")]
    MissingOrigin,
    #[error("批量钱包至少需要 2 个, 实际 {0}")]
    TooFewWallets(usize),
    #[error("做量总额必须大于 0")]
    ZeroVolume,
    #[error("RPC 探测失败: {0}")]
    Probe(#[from] GatewayError),
}

/// 编排器: Init -> Fund -> Schedule -> Execute -> Reconcile -> Done。
///
/// 任一阶段失败即中止, 带着已取得的部分进展产出汇总;
/// 已确认的转账不回滚, 账本状态是权威。
pub struct WorkflowOrchestrator {
    engine: Arc<SubmissionEngine>,
    funder: BatchFunder,
}

impl WorkflowOrchestrator {
    pub fn new(engine: Arc<SubmissionEngine>) -> Self {
        let funder = BatchFunder::new(Arc::clone(&engine));
        Self { engine, funder }
    }

    pub async fn run(
        &self,
        origin: &WalletIdentity,
        wallets: &[WalletIdentity],
        settings: &WorkflowSettings,
    ) -> Result<RunSummary, WorkflowError> {
        // Init: 配置硬伤直接报错, 不产出汇总。
        if wallets.len() < 2 {
            return Err(WorkflowError::TooFewWallets(wallets.len()));
        }
        if settings.total_volume == 0 {
            return Err(WorkflowError::ZeroVolume);
        }
        self.engine.gateway().latest_block_reference().await?;
        info!(
            target: "workflow",
            origin = %origin.pubkey,
            wallets = wallets.len(),
            total_volume = settings.total_volume,
            strategy = ?settings.reconciliation,
            "初始化完成, 开始编排"
        );

        let mut recorder = RunRecorder::start();

        // Fund: 切分即注资计划, 同一份切分随后驱动调度。
        let amounts = match scheduler::partition(
            wallets.len(),
            settings.total_volume,
            settings.precision,
        ) {
            Ok(amounts) => amounts,
            Err(err) => {
                recorder.abort(err.to_string());
                return Ok(recorder.finish(RunPhase::Fund));
            }
        };
        let destinations: Vec<(Pubkey, u64)> = wallets
            .iter()
            .zip(amounts.iter())
            .map(|(wallet, amount)| {
                (
                    wallet.pubkey,
                    amount.saturating_add(settings.wallet_reserve),
                )
            })
            .collect();

        match self
            .funder
            .fund(origin, &destinations, &settings.funding)
            .await
        {
            Ok(funding) => {
                let aborted = funding.failed_chunks > 0;
                recorder.record_all(funding.operations);
                if aborted {
                    // 部分批次失败不算致命, 但记录在案。
                    warn!(
                        target: "workflow",
                        failed_chunks = funding.failed_chunks,
                        "注资存在失败批次, 继续执行"
                    );
                }
            }
            Err(err) => {
                recorder.abort(err.to_string());
                return Ok(recorder.finish(RunPhase::Fund));
            }
        }

        // Schedule: 轮转映射 + 服务费注入, 纯计算。
        let wallet_keys: Vec<Pubkey> = wallets.iter().map(|wallet| wallet.pubkey).collect();
        let intents = match scheduler::build_intents(&wallet_keys, &amounts) {
            Ok(intents) => intents,
            Err(err) => {
                recorder.abort(err.to_string());
                return Ok(recorder.finish(RunPhase::Schedule));
            }
        };
        let schedule = match &settings.service_fee {
            Some(fee) => {
                match collector::with_fees(
                    intents,
                    fee.numerator,
                    fee.denominator,
                    fee.destination,
                ) {
                    Ok(plan) => {
                        info!(
                            target: "workflow",
                            intents = plan.intents.len(),
                            total_fee = plan.total_fee,
                            "服务费已注入调度"
                        );
                        plan.intents
                    }
                    Err(err) => {
                        recorder.abort(err.to_string());
                        return Ok(recorder.finish(RunPhase::Schedule));
                    }
                }
            }
            None => intents,
        };

        // Execute: 调度逐笔提交, 每笔由意图源钱包签名。
        let identities: HashMap<Pubkey, &WalletIdentity> = wallets
            .iter()
            .map(|wallet| (wallet.pubkey, wallet))
            .collect();
        match settings.reconciliation {
            ReconciliationStrategy::ExecuteSchedule => {
                for intent in &schedule {
                    let index = recorder.next_index();
                    let operation = match identities.get(&intent.source) {
                        Some(identity) => {
                            self.engine
                                .submit(
                                    index,
                                    std::slice::from_ref(intent),
                                    identity,
                                    &settings.funding.submit,
                                )
                                .await
                        }
                        None => OperationResult::failed(
                            index,
                            format!("调度源 {} 不在钱包注册表中", intent.source),
                            None,
                            intent.amount,
                        ),
                    };
                    recorder.record(operation);
                }
            }
            ReconciliationStrategy::ReturnToSource => {
                // 显式分支: 非生产环境跳过调度执行, 资金在收尾阶段回笼。
                info!(
                    target: "workflow",
                    skipped = schedule.len(),
                    "收尾策略为回笼资金, 跳过调度执行"
                );
                for intent in &schedule {
                    let index = recorder.next_index();
                    recorder.record(OperationResult::skipped(
                        index,
                        "收尾策略为回笼资金, 未执行调度".into(),
                        intent.amount,
                    ));
                }
            }
        }

        // Reconcile: 回笼策略把钱包余额扫回源, 保住免租底线。
        if settings.reconciliation == ReconciliationStrategy::ReturnToSource {
            let floor = match self.engine.gateway().minimum_balance_floor().await {
                Ok(floor) => floor,
                Err(err) => {
                    recorder.abort(err.to_string());
                    return Ok(recorder.finish(RunPhase::Reconcile));
                }
            };
            let (priority_fee, _) = self
                .engine
                .resolve_priority_fee(&settings.funding.submit)
                .await;
            let fee_budget = estimated_transaction_fee(priority_fee);

            for wallet in wallets {
                let index = recorder.next_index();
                let balance = match self.engine.gateway().balance(&wallet.pubkey).await {
                    Ok(balance) => balance,
                    Err(err) => {
                        recorder.record(OperationResult::failed(
                            index,
                            err.to_string(),
                            None,
                            0,
                        ));
                        continue;
                    }
                };
                let sweepable = balance.saturating_sub(floor).saturating_sub(fee_budget);
                if sweepable == 0 {
                    continue;
                }
                let intent = match crate::engine::TransferIntent::new(
                    wallet.pubkey,
                    origin.pubkey,
                    sweepable,
                    false,
                ) {
                    Ok(intent) => intent,
                    Err(err) => {
                        recorder.record(OperationResult::failed(
                            index,
                            err.to_string(),
                            None,
                            sweepable,
                        ));
                        continue;
                    }
                };
                let operation = self
                    .engine
                    .submit(index, &[intent], wallet, &settings.funding.submit)
                    .await;
                recorder.record(operation);
            }
        }

        Ok(recorder.finish(RunPhase::Done))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::testkit::{self, MockGateway};
    use crate::engine::{OperationStatus, SubmitOptions};
    use crate::fees::FeeOracle;
    use crate::monitoring::EventBus;

    fn orchestrator_with(gateway: Arc<MockGateway>) -> WorkflowOrchestrator {
        let oracle = Arc::new(FeeOracle::with_defaults(gateway.clone()));
        let engine = Arc::new(SubmissionEngine::new(
            gateway,
            oracle,
            Arc::new(EventBus::new()),
        ));
        WorkflowOrchestrator::new(engine)
    }

    fn settings(strategy: ReconciliationStrategy) -> WorkflowSettings {
        WorkflowSettings {
            total_volume: 1_000_000_000,
            precision: 9,
            service_fee: Some(ServiceFee {
                numerator: 1,
                denominator: 1_000,
                destination: Some(Pubkey::new_unique()),
            }),
            reconciliation: strategy,
            funding: FundingOptions {
                max_per_chunk: 5,
                submit: SubmitOptions {
                    retry_delay: Duration::from_millis(1),
                    ..SubmitOptions::default()
                },
            },
            wallet_reserve: 1_000_000,
        }
    }

    fn wallets(n: usize) -> Vec<WalletIdentity> {
        (0..n).map(|_| testkit::identity()).collect()
    }

    #[tokio::test]
    async fn full_run_reaches_done_with_complete_summary() {
        let gateway = Arc::new(MockGateway::new());
        let orchestrator = orchestrator_with(gateway.clone());
        let origin = testkit::identity();
        let batch = wallets(3);

        let summary = orchestrator
            .run(&origin, &batch, &settings(ReconciliationStrategy::ExecuteSchedule))
            .await
            .unwrap();

        assert_eq!(summary.phase_reached, RunPhase::Done);
        // 1 个注资批次 (3 目标) + 3 笔主调度 + 3 笔服务费。
        assert_eq!(summary.total_operations, 7);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 0);
        assert!(summary.abort_error.is_none());
        assert!(summary.total_amount_moved > 1_000_000_000);
    }

    #[tokio::test]
    async fn too_few_wallets_is_a_setup_error() {
        let gateway = Arc::new(MockGateway::new());
        let orchestrator = orchestrator_with(gateway);
        let origin = testkit::identity();
        let result = orchestrator
            .run(
                &origin,
                &wallets(1),
                &settings(ReconciliationStrategy::ExecuteSchedule),
            )
            .await;
        assert!(matches!(result, Err(WorkflowError::TooFewWallets(1))));
    }

    #[tokio::test]
    async fn insufficient_origin_balance_aborts_at_fund() {
        let origin = testkit::identity();
        let gateway = Arc::new(MockGateway::new().with_balance(origin.pubkey, 10));
        let orchestrator = orchestrator_with(gateway.clone());

        let summary = orchestrator
            .run(
                &origin,
                &wallets(3),
                &settings(ReconciliationStrategy::ExecuteSchedule),
            )
            .await
            .unwrap();

        assert_eq!(summary.phase_reached, RunPhase::Fund);
        assert!(summary.abort_error.as_deref().unwrap().contains("余额不足"));
        assert_eq!(gateway.sends(), 0);
    }

    #[tokio::test]
    async fn return_to_source_skips_schedule_and_sweeps() {
        let gateway = Arc::new(MockGateway::new());
        let orchestrator = orchestrator_with(gateway.clone());
        let origin = testkit::identity();
        let batch = wallets(3);
        for wallet in &batch {
            gateway.set_balance(wallet.pubkey, 500_000_000);
        }

        let summary = orchestrator
            .run(&origin, &batch, &settings(ReconciliationStrategy::ReturnToSource))
            .await
            .unwrap();

        assert_eq!(summary.phase_reached, RunPhase::Done);
        // 调度 (3 主 + 3 费) 全部跳过, 3 笔回笼转账确认。
        assert_eq!(summary.skipped, 6);
        let sweeps = summary
            .operations
            .iter()
            .filter(|op| op.status == OperationStatus::Confirmed)
            .count();
        assert_eq!(sweeps, 4, "1 funding chunk + 3 sweeps");
        // 注资 1 批 + 回笼 3 笔。
        assert_eq!(gateway.sends(), 4);
    }

    #[tokio::test]
    async fn mid_run_failures_still_produce_a_summary() {
        let gateway = Arc::new(MockGateway::new());
        // 注资批次成功, 之后每笔调度的确认都被拒绝。
        gateway.script_confirm(Ok(()));
        for _ in 0..6 {
            gateway.script_confirm(Err(GatewayError::Rejected("program failure".into())));
        }
        let orchestrator = orchestrator_with(gateway.clone());
        let origin = testkit::identity();

        let summary = orchestrator
            .run(
                &origin,
                &wallets(3),
                &settings(ReconciliationStrategy::ExecuteSchedule),
            )
            .await
            .unwrap();

        assert_eq!(summary.phase_reached, RunPhase::Done);
        assert_eq!(summary.total_operations, 7);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(summary.failed, 6);
        for op in summary.operations.iter().filter(|op| op.status == OperationStatus::Failed) {
            assert!(op.error.is_some(), "每个失败操作都要有可诊断的错误串");
        }
    }
}
