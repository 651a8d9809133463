use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::engine::TransferIntent;

#[derive(Debug, Error)]
pub enum FeeConfigError {
    #[error("费率分子 {numerator} 不得大于等于分母 {denominator}")]
    RatioTooHigh { numerator: u64, denominator: u64 },
    #[error("费率分母必须大于 0")]
    ZeroDenominator,
    #[error("未配置服务费收款地址")]
    MissingDestination,
    #[error(transparent)]
    Intent(#[from] crate::engine::SubmitError),
}

#[derive(Clone, Debug)]
pub struct FeePlan {
    /// 主意图与费意图交错排列, 费意图紧随其对应主意图之后。
    pub intents: Vec<TransferIntent>,
    pub total_amount: u64,
    pub total_fee: u64,
}

/// 为每笔非费转账注入并行的服务费意图。
///
/// 费额 = max(1, amount * numerator / denominator), 整数除法;
/// 非零转账永远收到至少 1 个最小单位, 小额转账不会被静默免费。
pub fn with_fees(
    intents: Vec<TransferIntent>,
    numerator: u64,
    denominator: u64,
    destination: Option<Pubkey>,
) -> Result<FeePlan, FeeConfigError> {
    if denominator == 0 {
        return Err(FeeConfigError::ZeroDenominator);
    }
    if numerator >= denominator {
        return Err(FeeConfigError::RatioTooHigh {
            numerator,
            denominator,
        });
    }
    let destination = destination.ok_or(FeeConfigError::MissingDestination)?;

    let mut all = Vec::with_capacity(intents.len() * 2);
    let mut total_amount = 0u64;
    let mut total_fee = 0u64;

    for intent in intents {
        if intent.is_fee {
            all.push(intent);
            continue;
        }
        let fee = (intent.amount.saturating_mul(numerator) / denominator).max(1);
        total_amount = total_amount.saturating_add(intent.amount);
        total_fee = total_fee.saturating_add(fee);
        let source = intent.source;
        all.push(intent);
        all.push(TransferIntent::new(source, destination, fee, true)?);
    }

    Ok(FeePlan {
        intents: all,
        total_amount,
        total_fee,
    })
}
