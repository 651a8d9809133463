pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_logging_level() -> String {
    "info".to_string()
}

pub(crate) fn default_prometheus_listen() -> String {
    "0.0.0.0:9188".to_string()
}

pub(crate) fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

pub(crate) fn default_commitment() -> String {
    "confirmed".to_string()
}

pub(crate) fn default_wallet_path() -> String {
    "wallets.json".to_string()
}

pub(crate) fn default_wallet_count() -> usize {
    10
}

pub(crate) fn default_origin_path() -> String {
    "origin.key".to_string()
}

// 1 SOL, 仅作模板占位, 实际跑量前必须改。
pub(crate) fn default_total_lamports() -> u64 {
    1_000_000_000
}

pub(crate) fn default_precision() -> u32 {
    9
}

pub(crate) fn default_fee_denominator() -> u64 {
    1_000
}

pub(crate) fn default_max_retries() -> u32 {
    3
}

pub(crate) fn default_retry_delay_ms() -> u64 {
    500
}

pub(crate) fn default_confirmation_timeout_ms() -> u64 {
    60_000
}

pub(crate) fn default_max_per_chunk() -> usize {
    5
}

pub(crate) fn default_wallet_reserve_lamports() -> u64 {
    1_000_000
}

/// `init` 子命令写出的模板, 字段与 [`MediciConfig`] 一一对应。
pub const CONFIG_TEMPLATE: &str = r#"[global.logging]
level = "info"
json = false

[global.prometheus]
enable = false
listen = "0.0.0.0:9188"

[rpc]
url = "https://api.mainnet-beta.solana.com"
# ws_url = "wss://api.mainnet-beta.solana.com"
commitment = "confirmed"
# public | premium
profile = "public"

[wallets]
path = "wallets.json"
count = 10
origin_path = "origin.key"

[volume]
total_lamports = 1000000000
precision = 9

[service_fee]
enable = false
numerator = 1
denominator = 1000
# destination = "..."

[engine]
skip_preflight = false
max_retries = 3
retry_delay_ms = 500
confirmation_timeout_ms = 60000
# priority_fee = 5000
check_fee_spike = true
max_per_chunk = 5

[workflow]
# execute_schedule | return_to_source
reconciliation = "execute_schedule"
wallet_reserve_lamports = 1000000
"#;
