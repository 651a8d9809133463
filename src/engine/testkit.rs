//! 引擎与上层测试共用的脚本化网关 mock。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::Transaction;

use crate::monitoring::{EventBus, EventKind, LifecycleEvent};
use crate::rpc::{
    BlockReference, FeeSample, GatewayError, LedgerGateway, SendOptions, SignatureVerdict,
};
use crate::wallet::WalletIdentity;

pub(crate) fn identity() -> WalletIdentity {
    WalletIdentity::from_keypair(Keypair::new())
}

/// 订阅指定种类事件并把它们收进共享向量。
pub(crate) fn capture(
    bus: &Arc<EventBus>,
    kind: EventKind,
) -> Arc<Mutex<Vec<LifecycleEvent>>> {
    let seen: Arc<Mutex<Vec<LifecycleEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(
        kind,
        Arc::new(move |event: &LifecycleEvent| sink.lock().push(event.clone())),
    );
    seen
}

/// 脚本化网关: 各方法按队列弹出预设结果, 队列空了走默认成功。
pub(crate) struct MockGateway {
    balances: Mutex<HashMap<Pubkey, u64>>,
    default_balance: u64,
    fee_samples: Mutex<Vec<u64>>,
    reference_script: Mutex<VecDeque<Result<(), GatewayError>>>,
    send_script: Mutex<VecDeque<Result<(), GatewayError>>>,
    confirm_script: Mutex<VecDeque<Result<(), GatewayError>>>,
    status_script: Mutex<VecDeque<SignatureVerdict>>,
    sent: Mutex<Vec<Signature>>,
    reference_fetches: AtomicUsize,
    balance_queries: AtomicUsize,
    rent_floor: u64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            default_balance: u64::MAX / 2,
            fee_samples: Mutex::new(vec![1_000, 2_000, 3_000]),
            reference_script: Mutex::new(VecDeque::new()),
            send_script: Mutex::new(VecDeque::new()),
            confirm_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            reference_fetches: AtomicUsize::new(0),
            balance_queries: AtomicUsize::new(0),
            rent_floor: 890_880,
        }
    }

    pub fn with_balance(self, address: Pubkey, lamports: u64) -> Self {
        self.balances.lock().insert(address, lamports);
        self
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.balances.lock().insert(address, lamports);
    }

    pub fn script_reference(&self, result: Result<(), GatewayError>) {
        self.reference_script.lock().push_back(result);
    }

    pub fn script_send(&self, result: Result<(), GatewayError>) {
        self.send_script.lock().push_back(result);
    }

    pub fn script_confirm(&self, result: Result<(), GatewayError>) {
        self.confirm_script.lock().push_back(result);
    }

    pub fn script_status(&self, verdict: SignatureVerdict) {
        self.status_script.lock().push_back(verdict);
    }

    pub fn sends(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent_signatures(&self) -> Vec<Signature> {
        self.sent.lock().clone()
    }

    pub fn reference_fetches(&self) -> usize {
        self.reference_fetches.load(Ordering::Relaxed)
    }

    pub fn balance_queries(&self) -> usize {
        self.balance_queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LedgerGateway for MockGateway {
    async fn latest_block_reference(&self) -> Result<BlockReference, GatewayError> {
        let fetches = self.reference_fetches.fetch_add(1, Ordering::Relaxed);
        if let Some(scripted) = self.reference_script.lock().pop_front() {
            scripted?;
        }
        // 每次取引用都给出不同的 blockhash, 模拟链上推进。
        let mut seed = [0u8; 32];
        seed[..8].copy_from_slice(&(fetches as u64 + 1).to_le_bytes());
        Ok(BlockReference {
            blockhash: Hash::new_from_array(seed),
            last_valid_block_height: 10_000,
        })
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64, GatewayError> {
        self.balance_queries.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .balances
            .lock()
            .get(address)
            .copied()
            .unwrap_or(self.default_balance))
    }

    async fn send_transaction(
        &self,
        transaction: &Transaction,
        _options: &SendOptions,
    ) -> Result<Signature, GatewayError> {
        let signature = transaction.signatures[0];
        self.sent.lock().push(signature);
        let scripted = self.send_script.lock().pop_front().unwrap_or(Ok(()));
        scripted?;
        Ok(signature)
    }

    async fn wait_for_confirmation(
        &self,
        _signature: &Signature,
        _reference: &BlockReference,
        _timeout: Duration,
    ) -> Result<(), GatewayError> {
        self.confirm_script.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn signature_status(
        &self,
        _signature: &Signature,
    ) -> Result<SignatureVerdict, GatewayError> {
        Ok(self
            .status_script
            .lock()
            .pop_front()
            .unwrap_or(SignatureVerdict::Unknown))
    }

    async fn recent_fee_samples(&self) -> Result<Vec<FeeSample>, GatewayError> {
        Ok(self
            .fee_samples
            .lock()
            .iter()
            .enumerate()
            .map(|(slot, fee)| FeeSample {
                slot: slot as u64,
                fee: *fee,
            })
            .collect())
    }

    async fn minimum_balance_floor(&self) -> Result<u64, GatewayError> {
        Ok(self.rent_floor)
    }
}
