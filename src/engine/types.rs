use serde::Serialize;
use serde_with::{DisplayFromStr, serde_as};
use solana_sdk::pubkey::Pubkey;

use super::error::SubmitError;

/// 一笔待执行的转账意图。创建后不可变。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferIntent {
    pub source: Pubkey,
    pub destination: Pubkey,
    /// 最小面额（lamports），恒大于 0。
    pub amount: u64,
    pub is_fee: bool,
}

impl TransferIntent {
    pub fn new(
        source: Pubkey,
        destination: Pubkey,
        amount: u64,
        is_fee: bool,
    ) -> Result<Self, SubmitError> {
        if amount == 0 {
            return Err(SubmitError::Validation(format!(
                "转账金额必须大于 0: {source} -> {destination}"
            )));
        }
        Ok(Self {
            source,
            destination,
            amount,
            is_fee,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Confirmed,
    Failed,
    Skipped,
}

/// 每个提交单元一条, 状态离开 Pending 后即为终态。
/// 金额以十进制字符串序列化, 防止下游 JSON 精度丢失。
#[serde_as]
#[derive(Clone, Debug, Serialize)]
pub struct OperationResult {
    pub index: usize,
    pub status: OperationStatus,
    pub signature: Option<String>,
    pub error: Option<String>,
    pub confirmation_latency_ms: Option<u64>,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub fee_paid: u64,
}

impl OperationResult {
    pub fn confirmed(
        index: usize,
        signature: String,
        latency_ms: u64,
        amount: u64,
        fee_paid: u64,
    ) -> Self {
        Self {
            index,
            status: OperationStatus::Confirmed,
            signature: Some(signature),
            error: None,
            confirmation_latency_ms: Some(latency_ms),
            amount,
            fee_paid,
        }
    }

    pub fn failed(index: usize, error: String, signature: Option<String>, amount: u64) -> Self {
        Self {
            index,
            status: OperationStatus::Failed,
            signature,
            error: Some(error),
            confirmation_latency_ms: None,
            amount,
            fee_paid: 0,
        }
    }

    pub fn skipped(index: usize, reason: String, amount: u64) -> Self {
        Self {
            index,
            status: OperationStatus::Skipped,
            signature: None,
            error: Some(reason),
            confirmation_latency_ms: None,
            amount,
            fee_paid: 0,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == OperationStatus::Confirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_amount_intent() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        assert!(TransferIntent::new(a, b, 0, false).is_err());
        assert!(TransferIntent::new(a, b, 1, false).is_ok());
    }

    #[test]
    fn amounts_serialize_as_decimal_strings() {
        let result = OperationResult::confirmed(0, "sig".into(), 42, u64::MAX, 5_000);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["amount"], "18446744073709551615");
        assert_eq!(json["fee_paid"], "5000");
        assert_eq!(json["status"], "confirmed");
    }
}
