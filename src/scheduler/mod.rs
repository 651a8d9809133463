use std::collections::{BTreeSet, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::engine::TransferIntent;

/// 每个钱包的切点采样预算系数, 预算 = 10 * n。
const ATTEMPT_BUDGET_FACTOR: usize = 10;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("份数必须不少于 2, 实际 {0}")]
    TooFewParts(usize),
    #[error("总量必须大于 0")]
    ZeroTotal,
    #[error("总量 {total} 不足以给 {n} 份各分配下限 {floor}")]
    TotalBelowFloor { total: u64, n: usize, floor: u64 },
    #[error("采样预算耗尽 ({attempts} 次), 无法生成满足约束的切分")]
    Partition { attempts: usize },
    #[error(transparent)]
    Intent(#[from] crate::engine::SubmitError),
}

/// 按代币精度推出的单份金额下限: 10^max(0, precision-2)。
pub fn precision_floor(precision: u32) -> u64 {
    10u64.pow(precision.saturating_sub(2))
}

/// 把 `total` 切成 `n` 份两两不同的整数金额。
///
/// 在 `[floor, total-floor]` 内拒绝采样 `n-1` 个互异切点,
/// 排序后取相邻差值 (含隐式 0 与 total 边界), 再打乱顺序,
/// 使位次与金额大小不相关。全程整数运算。
pub fn partition(n: usize, total: u64, precision: u32) -> Result<Vec<u64>, SchedulerError> {
    let floor = precision_floor(precision);
    validate(n, total, floor)?;

    let budget = ATTEMPT_BUDGET_FACTOR * n;
    let mut attempts = 0usize;
    let mut rng = rand::rng();
    let mut cuts: BTreeSet<u64> = BTreeSet::new();

    loop {
        cuts.clear();
        while cuts.len() < n - 1 {
            if attempts >= budget {
                return Err(SchedulerError::Partition { attempts });
            }
            attempts += 1;
            cuts.insert(rng.random_range(floor..=total - floor));
        }

        let amounts = differences(&cuts, total);
        if amounts.iter().all(|amount| *amount >= floor) && pairwise_distinct(&amounts) {
            let mut amounts = amounts;
            amounts.shuffle(&mut rng);
            return Ok(amounts);
        }
        // 整组不满足约束时丢弃重来, 继续消耗同一预算。
        if attempts >= budget {
            return Err(SchedulerError::Partition { attempts });
        }
    }
}

/// 复查三条不变量: 两两不同、不低于下限、整数和恰为 total。
pub fn verify(amounts: &[u64], total: u64, floor: u64) -> bool {
    if amounts.is_empty() {
        return false;
    }
    if !pairwise_distinct(amounts) {
        return false;
    }
    if amounts.iter().any(|amount| *amount < floor) {
        return false;
    }
    let mut sum = 0u64;
    for amount in amounts {
        sum = match sum.checked_add(*amount) {
            Some(next) => next,
            None => return false,
        };
    }
    sum == total
}

/// 金额按轮转顺序映射成意图: wallet[i] -> wallet[(i+1) mod n]。
/// 给定金额顺序, 结果是确定的。
pub fn build_intents(
    wallets: &[Pubkey],
    amounts: &[u64],
) -> Result<Vec<TransferIntent>, SchedulerError> {
    if wallets.len() != amounts.len() {
        return Err(SchedulerError::TooFewParts(wallets.len().min(amounts.len())));
    }
    let n = wallets.len();
    let mut intents = Vec::with_capacity(n);
    for (i, amount) in amounts.iter().enumerate() {
        let destination = wallets[(i + 1) % n];
        intents.push(TransferIntent::new(wallets[i], destination, *amount, false)?);
    }
    Ok(intents)
}

fn validate(n: usize, total: u64, floor: u64) -> Result<(), SchedulerError> {
    if n < 2 {
        return Err(SchedulerError::TooFewParts(n));
    }
    if total == 0 {
        return Err(SchedulerError::ZeroTotal);
    }
    let required = (n as u64).checked_mul(floor);
    match required {
        Some(required) if total >= required => Ok(()),
        _ => Err(SchedulerError::TotalBelowFloor { total, n, floor }),
    }
}

fn differences(cuts: &BTreeSet<u64>, total: u64) -> Vec<u64> {
    let mut amounts = Vec::with_capacity(cuts.len() + 1);
    let mut previous = 0u64;
    for cut in cuts {
        amounts.push(cut - previous);
        previous = *cut;
    }
    amounts.push(total - previous);
    amounts
}

fn pairwise_distinct(amounts: &[u64]) -> bool {
    let mut seen = HashSet::with_capacity(amounts.len());
    amounts.iter().all(|amount| seen.insert(*amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_one_sol_into_three_distinct_amounts() {
        let amounts = partition(3, 1_000_000_000, 9).unwrap();
        assert_eq!(amounts.len(), 3);
        let floor = precision_floor(9);
        assert_eq!(floor, 10_000_000);
        assert!(verify(&amounts, 1_000_000_000, floor));
        for amount in &amounts {
            assert!(*amount >= floor);
        }
    }

    #[test]
    fn randomized_inputs_hold_all_invariants() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let n = rng.random_range(2usize..=12);
            let precision = rng.random_range(0u32..=9);
            let floor = precision_floor(precision);
            // 给足余量, 让互异约束有充分空间。
            let total = (n as u64) * floor * rng.random_range(50u64..=5_000);
            let amounts = partition(n, total, precision).unwrap();
            assert_eq!(amounts.len(), n);
            assert!(verify(&amounts, total, floor), "n={n} total={total}");
        }
    }

    #[test]
    fn rejects_domain_violations() {
        assert!(matches!(
            partition(1, 1_000_000, 6),
            Err(SchedulerError::TooFewParts(1))
        ));
        assert!(matches!(partition(2, 0, 6), Err(SchedulerError::ZeroTotal)));
        let floor = precision_floor(9);
        assert!(matches!(
            partition(3, 3 * floor - 1, 9),
            Err(SchedulerError::TotalBelowFloor { .. })
        ));
    }

    #[test]
    fn exhausted_budget_is_a_hard_error() {
        // 唯一可行的切点组合会产生三份相同金额, 约束永远不满足。
        let floor = precision_floor(4);
        let total = 3 * floor;
        match partition(3, total, 4) {
            Err(SchedulerError::Partition { attempts }) => assert!(attempts >= 30),
            other => panic!("expected partition exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn verify_spots_each_broken_invariant() {
        assert!(verify(&[10, 20, 70], 100, 10));
        assert!(!verify(&[10, 20, 70], 101, 10), "sum mismatch");
        assert!(!verify(&[10, 10, 80], 100, 10), "duplicate amounts");
        assert!(!verify(&[5, 25, 70], 100, 10), "below floor");
        assert!(!verify(&[], 0, 1));
    }

    #[test]
    fn intents_follow_round_robin_order() {
        let wallets: Vec<Pubkey> = (0..4).map(|_| Pubkey::new_unique()).collect();
        let amounts = vec![40u64, 10, 30, 20];
        let intents = build_intents(&wallets, &amounts).unwrap();
        assert_eq!(intents.len(), 4);
        for (i, intent) in intents.iter().enumerate() {
            assert_eq!(intent.source, wallets[i]);
            assert_eq!(intent.destination, wallets[(i + 1) % 4]);
            assert_eq!(intent.amount, amounts[i]);
            assert!(!intent.is_fee);
        }
    }
}
