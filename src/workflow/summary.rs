use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};

use crate::engine::{OperationResult, OperationStatus};

use super::RunPhase;

/// 一次编排运行的最终汇总。运行结束后不可变,
/// 金额字段以十进制字符串序列化。
#[serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub phase_reached: RunPhase,
    pub total_operations: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde_as(as = "DisplayFromStr")]
    pub total_amount_moved: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub total_fees_paid: u64,
    pub average_confirmation_ms: Option<u64>,
    pub started_at_unix_ms: u64,
    pub finished_at_unix_ms: u64,
    /// 中止运行的错误, 正常完成时为空。
    pub abort_error: Option<String>,
    pub operations: Vec<OperationResult>,
}

/// 运行过程中的累积器, `finish` 后冻结为 [`RunSummary`]。
pub struct RunRecorder {
    started_at_unix_ms: u64,
    operations: Vec<OperationResult>,
    abort_error: Option<String>,
}

impl RunRecorder {
    pub fn start() -> Self {
        Self {
            started_at_unix_ms: unix_millis(),
            operations: Vec::new(),
            abort_error: None,
        }
    }

    pub fn record(&mut self, operation: OperationResult) {
        self.operations.push(operation);
    }

    pub fn record_all(&mut self, operations: impl IntoIterator<Item = OperationResult>) {
        self.operations.extend(operations);
    }

    pub fn abort(&mut self, error: String) {
        self.abort_error = Some(error);
    }

    pub fn next_index(&self) -> usize {
        self.operations.len()
    }

    pub fn finish(self, phase_reached: RunPhase) -> RunSummary {
        let confirmed = self.count(OperationStatus::Confirmed);
        let failed = self.count(OperationStatus::Failed);
        let skipped = self.count(OperationStatus::Skipped);
        let total_amount_moved = self
            .operations
            .iter()
            .filter(|op| op.is_confirmed())
            .fold(0u64, |sum, op| sum.saturating_add(op.amount));
        let total_fees_paid = self
            .operations
            .iter()
            .filter(|op| op.is_confirmed())
            .fold(0u64, |sum, op| sum.saturating_add(op.fee_paid));
        let latencies: Vec<u64> = self
            .operations
            .iter()
            .filter_map(|op| op.confirmation_latency_ms)
            .collect();
        let average_confirmation_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() / latencies.len() as u64)
        };

        RunSummary {
            phase_reached,
            total_operations: self.operations.len(),
            confirmed,
            failed,
            skipped,
            total_amount_moved,
            total_fees_paid,
            average_confirmation_ms,
            started_at_unix_ms: self.started_at_unix_ms,
            finished_at_unix_ms: unix_millis(),
            abort_error: self.abort_error,
            operations: self.operations,
        }
    }

    fn count(&self, status: OperationStatus) -> usize {
        self.operations
            .iter()
            .filter(|op| op.status == status)
            .count()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
