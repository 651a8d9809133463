use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;

use crate::engine::{FundingOptions, SubmitOptions};
use crate::rpc::LimiterProfile;
use crate::workflow::{ReconciliationStrategy, ServiceFee};

use super::{
    default_commitment, default_confirmation_timeout_ms, default_fee_denominator,
    default_logging_level, default_max_per_chunk, default_max_retries, default_origin_path,
    default_precision,
    default_prometheus_listen, default_retry_delay_ms, default_rpc_url, default_total_lamports,
    default_true, default_wallet_count, default_wallet_path, default_wallet_reserve_lamports,
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediciConfig {
    pub global: GlobalConfig,
    pub rpc: RpcConfig,
    pub wallets: WalletsConfig,
    pub volume: VolumeConfig,
    pub service_fee: ServiceFeeConfig,
    pub engine: EngineConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub logging: LoggingConfig,
    pub prometheus: PrometheusConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_logging_level(),
            json: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enable: bool,
    pub listen: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enable: false,
            listen: default_prometheus_listen(),
        }
    }
}

/// RPC 端点画像, 决定限流参数。
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointProfile {
    #[default]
    Public,
    Premium,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,
    /// websocket 端点, 配置后确认走订阅优先。
    pub ws_url: Option<String>,
    pub commitment: String,
    pub profile: EndpointProfile,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            ws_url: None,
            commitment: default_commitment(),
            profile: EndpointProfile::Public,
        }
    }
}

impl RpcConfig {
    pub fn limiter_profile(&self) -> LimiterProfile {
        match self.profile {
            EndpointProfile::Public => LimiterProfile::public(),
            EndpointProfile::Premium => LimiterProfile::premium(),
        }
    }

    pub fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.trim() {
            "processed" => CommitmentConfig::processed(),
            "finalized" => CommitmentConfig::finalized(),
            _ => CommitmentConfig::confirmed(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WalletsConfig {
    pub path: String,
    pub count: usize,
    /// 源钱包私钥文件 (单行 bs58)。
    pub origin_path: String,
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            path: default_wallet_path(),
            count: default_wallet_count(),
            origin_path: default_origin_path(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub total_lamports: u64,
    pub precision: u32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            total_lamports: default_total_lamports(),
            precision: default_precision(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServiceFeeConfig {
    pub enable: bool,
    pub numerator: u64,
    pub denominator: u64,
    pub destination: Option<String>,
}

impl Default for ServiceFeeConfig {
    fn default() -> Self {
        Self {
            enable: false,
            numerator: 1,
            denominator: default_fee_denominator(),
            destination: None,
        }
    }
}

impl ServiceFeeConfig {
    pub fn to_service_fee(&self) -> Option<ServiceFee> {
        if !self.enable {
            return None;
        }
        Some(ServiceFee {
            numerator: self.numerator,
            denominator: self.denominator,
            destination: self
                .destination
                .as_deref()
                .and_then(|raw| Pubkey::from_str(raw.trim()).ok()),
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub skip_preflight: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub confirmation_timeout_ms: u64,
    /// 固定优先费; 不设置时向预言机询价。
    pub priority_fee: Option<u64>,
    pub check_fee_spike: bool,
    pub max_per_chunk: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            skip_preflight: false,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            priority_fee: None,
            check_fee_spike: default_true(),
            max_per_chunk: default_max_per_chunk(),
        }
    }
}

impl EngineConfig {
    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            skip_preflight: self.skip_preflight,
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            confirmation_timeout: Duration::from_millis(self.confirmation_timeout_ms),
            priority_fee: self.priority_fee,
            check_fee_spike: self.check_fee_spike,
        }
    }

    pub fn funding_options(&self) -> FundingOptions {
        FundingOptions {
            max_per_chunk: self.max_per_chunk,
            submit: self.submit_options(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationMode {
    #[default]
    ExecuteSchedule,
    ReturnToSource,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub reconciliation: ReconciliationMode,
    pub wallet_reserve_lamports: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            reconciliation: ReconciliationMode::ExecuteSchedule,
            wallet_reserve_lamports: default_wallet_reserve_lamports(),
        }
    }
}

impl WorkflowConfig {
    pub fn strategy(&self) -> ReconciliationStrategy {
        match self.reconciliation {
            ReconciliationMode::ExecuteSchedule => ReconciliationStrategy::ExecuteSchedule,
            ReconciliationMode::ReturnToSource => ReconciliationStrategy::ReturnToSource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_defaults() {
        let config: MediciConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.confirmation_timeout_ms, 60_000);
        assert_eq!(config.engine.max_per_chunk, 5);
        assert!(config.engine.check_fee_spike);
        assert_eq!(config.rpc.profile, EndpointProfile::Public);
        assert!(config.service_fee.to_service_fee().is_none());
    }

    #[test]
    fn profile_maps_to_limiter_parameters() {
        let config: MediciConfig = toml::from_str(
            r#"
            [rpc]
            url = "https://example.org"
            profile = "premium"
            "#,
        )
        .unwrap();
        let profile = config.rpc.limiter_profile();
        assert_eq!(profile.max_in_flight, 10);
        assert_eq!(profile.min_interval, Duration::from_millis(100));
    }

    #[test]
    fn service_fee_parses_destination() {
        let destination = Pubkey::new_unique();
        let raw = format!(
            r#"
            [service_fee]
            enable = true
            numerator = 5
            denominator = 1000
            destination = "{destination}"
            "#
        );
        let config: MediciConfig = toml::from_str(&raw).unwrap();
        let fee = config.service_fee.to_service_fee().unwrap();
        assert_eq!(fee.numerator, 5);
        assert_eq!(fee.destination, Some(destination));
    }

    #[test]
    fn reconciliation_mode_round_trips() {
        let config: MediciConfig = toml::from_str(
            r#"
            [workflow]
            reconciliation = "return_to_source"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.workflow.strategy(),
            ReconciliationStrategy::ReturnToSource
        );
    }
}
