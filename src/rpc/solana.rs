use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcSendTransactionConfig, RpcSignatureSubscribeConfig};
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_client::rpc_response::RpcSignatureResult;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, TransactionError};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::limiter::RateLimiter;
use super::{
    BlockReference, FeeSample, GatewayError, LedgerGateway, SendOptions, SignatureVerdict,
};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1_000);
/// 每隔几次状态轮询检查一次区块高度是否越过引用的有效窗口。
const HEIGHT_CHECK_EVERY: u32 = 4;

/// 基于 solana-client 的网关实现。所有调用经过共享限流器；
/// 配置了 websocket 端点时优先用订阅等确认，失败回落轮询。
pub struct SolanaGateway {
    client: Arc<RpcClient>,
    websocket_url: Option<String>,
    limiter: Arc<RateLimiter>,
    commitment: CommitmentConfig,
}

impl SolanaGateway {
    pub fn new(
        client: Arc<RpcClient>,
        websocket_url: Option<String>,
        limiter: Arc<RateLimiter>,
        commitment: CommitmentConfig,
    ) -> Self {
        Self {
            client,
            websocket_url,
            limiter,
            commitment,
        }
    }

    pub fn endpoint(&self) -> String {
        self.client.url()
    }

    /// 调用结束后更新限流计数；429 时写回退避并原样返回错误。
    async fn settle<T>(&self, result: Result<T, ClientError>) -> Result<T, GatewayError> {
        match result {
            Ok(value) => {
                self.limiter.mark_success();
                Ok(value)
            }
            Err(err) => {
                let classified = classify_client_error(err);
                if let GatewayError::RateLimited(_) = &classified {
                    let backoff = self.limiter.throttled_backoff();
                    tokio::time::sleep(backoff).await;
                }
                Err(classified)
            }
        }
    }

    /// 订阅路径：signature_subscribe 一条通知即出结论。
    /// 返回 Err 表示订阅本身失败，调用方回落到轮询。
    async fn wait_via_subscription(
        &self,
        ws_url: &str,
        signature: &Signature,
    ) -> Result<Result<(), GatewayError>, String> {
        let client = PubsubClient::new(ws_url)
            .await
            .map_err(|err| format!("websocket 连接失败: {err}"))?;
        let config = RpcSignatureSubscribeConfig {
            commitment: Some(self.commitment),
            enable_received_notification: Some(false),
        };
        let (mut stream, unsubscribe) = client
            .signature_subscribe(signature, Some(config))
            .await
            .map_err(|err| format!("signature 订阅失败: {err}"))?;

        let outcome = match stream.next().await {
            Some(response) => match response.value {
                RpcSignatureResult::ProcessedSignature(processed) => match processed.err {
                    None => Ok(Ok(())),
                    Some(err) => Ok(Err(GatewayError::Rejected(err.to_string()))),
                },
                RpcSignatureResult::ReceivedSignature(_) => {
                    Err("订阅返回 received 通知, 无法判定确认".to_string())
                }
            },
            None => Err("订阅流提前关闭".to_string()),
        };

        drop(stream);
        unsubscribe().await;
        outcome
    }

    /// 轮询路径：按固定间隔查状态，周期性核对区块高度，
    /// 高度越过引用窗口立即判定引用过期。
    async fn wait_via_polling(
        &self,
        signature: &Signature,
        reference: &BlockReference,
    ) -> Result<(), GatewayError> {
        let mut polls = 0u32;
        loop {
            match self.signature_status(signature).await {
                Ok(SignatureVerdict::Confirmed) => return Ok(()),
                Ok(SignatureVerdict::Rejected(reason)) => {
                    return Err(GatewayError::Rejected(reason));
                }
                Ok(SignatureVerdict::Unknown) => {}
                Err(err) if err.is_retryable() => {
                    debug!(
                        target: "rpc::gateway",
                        error = %err,
                        "状态轮询暂时失败, 继续等待"
                    );
                }
                Err(err) => return Err(err),
            }

            polls += 1;
            if polls % HEIGHT_CHECK_EVERY == 0 {
                let _permit = self.limiter.acquire().await;
                let height = self.settle(self.client.get_block_height().await).await;
                if let Ok(height) = height {
                    if height > reference.last_valid_block_height {
                        return Err(GatewayError::StaleReference(format!(
                            "区块高度 {height} 已越过 {}",
                            reference.last_valid_block_height
                        )));
                    }
                }
            }

            tokio::time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl LedgerGateway for SolanaGateway {
    async fn latest_block_reference(&self) -> Result<BlockReference, GatewayError> {
        let _permit = self.limiter.acquire().await;
        let (blockhash, last_valid_block_height) = self
            .settle(
                self.client
                    .get_latest_blockhash_with_commitment(self.commitment)
                    .await,
            )
            .await?;
        Ok(BlockReference {
            blockhash,
            last_valid_block_height,
        })
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64, GatewayError> {
        let _permit = self.limiter.acquire().await;
        self.settle(self.client.get_balance(address).await).await
    }

    async fn send_transaction(
        &self,
        transaction: &Transaction,
        options: &SendOptions,
    ) -> Result<Signature, GatewayError> {
        let mut config = RpcSendTransactionConfig::default();
        config.skip_preflight = options.skip_preflight;
        config.preflight_commitment = Some(self.commitment.commitment);
        // 链上侧不自动重试, 重试由提交引擎掌控以保住幂等性检查。
        config.max_retries = Some(0);

        let _permit = self.limiter.acquire().await;
        self.settle(
            self.client
                .send_transaction_with_config(transaction, config)
                .await,
        )
        .await
    }

    async fn wait_for_confirmation(
        &self,
        signature: &Signature,
        reference: &BlockReference,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        let started = Instant::now();
        let wait = async {
            if let Some(ws_url) = self.websocket_url.clone() {
                match self.wait_via_subscription(&ws_url, signature).await {
                    Ok(outcome) => return outcome,
                    Err(reason) => {
                        warn!(
                            target: "rpc::gateway",
                            signature = %signature,
                            reason,
                            "订阅确认不可用, 回落到状态轮询"
                        );
                    }
                }
            }
            self.wait_via_polling(signature, reference).await
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::ConfirmationTimeout {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<SignatureVerdict, GatewayError> {
        let _permit = self.limiter.acquire().await;
        let status = self
            .settle(
                self.client
                    .get_signature_status_with_commitment(signature, self.commitment)
                    .await,
            )
            .await?;
        Ok(match status {
            None => SignatureVerdict::Unknown,
            Some(Ok(())) => SignatureVerdict::Confirmed,
            Some(Err(err)) => SignatureVerdict::Rejected(err.to_string()),
        })
    }

    async fn recent_fee_samples(&self) -> Result<Vec<FeeSample>, GatewayError> {
        let _permit = self.limiter.acquire().await;
        let fees = self
            .settle(self.client.get_recent_prioritization_fees(&[]).await)
            .await?;
        Ok(fees
            .into_iter()
            .map(|entry| FeeSample {
                slot: entry.slot,
                fee: entry.prioritization_fee,
            })
            .collect())
    }

    async fn minimum_balance_floor(&self) -> Result<u64, GatewayError> {
        let _permit = self.limiter.acquire().await;
        self.settle(self.client.get_minimum_balance_for_rent_exemption(0).await)
            .await
    }
}

/// 原始客户端错误到网关分类的唯一映射点。
fn classify_client_error(err: ClientError) -> GatewayError {
    match err.kind() {
        ClientErrorKind::TransactionError(tx_err) => classify_transaction_error(tx_err),
        ClientErrorKind::RpcError(rpc_err) => match rpc_err {
            RpcError::RpcResponseError { code, message, data } => {
                if let RpcResponseErrorData::SendTransactionPreflightFailure(result) = data {
                    if let Some(tx_err) = &result.err {
                        return classify_transaction_error(&TransactionError::from(
                            tx_err.clone(),
                        ));
                    }
                }
                if *code == 429 {
                    GatewayError::RateLimited(message.clone())
                } else {
                    GatewayError::Network(format!("rpc {code}: {message}"))
                }
            }
            other => GatewayError::Network(other.to_string()),
        },
        ClientErrorKind::Reqwest(inner) => {
            let throttled = inner
                .status()
                .map(|status| status.as_u16() == 429)
                .unwrap_or(false);
            if throttled {
                GatewayError::RateLimited(inner.to_string())
            } else {
                GatewayError::Network(inner.to_string())
            }
        }
        other => GatewayError::Network(other.to_string()),
    }
}

fn classify_transaction_error(err: &TransactionError) -> GatewayError {
    match err {
        TransactionError::BlockhashNotFound => {
            GatewayError::StaleReference("blockhash not found".to_string())
        }
        TransactionError::InsufficientFundsForFee => {
            GatewayError::InsufficientFunds(err.to_string())
        }
        TransactionError::AlreadyProcessed => {
            // 同一交易重复发送, 对提交引擎而言等价于需要走状态复查。
            GatewayError::Network(err.to_string())
        }
        other => GatewayError::Rejected(other.to_string()),
    }
}
