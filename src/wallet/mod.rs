use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("读取钱包文件失败 {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("解析钱包文件失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("钱包私钥非法 (第 {index} 条): {reason}")]
    InvalidKey { index: usize, reason: String },
}

/// 持有签名能力的钱包身份。
#[derive(Clone, Debug)]
pub struct WalletIdentity {
    pub pubkey: Pubkey,
    pub signer: Arc<Keypair>,
}

impl WalletIdentity {
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            pubkey: keypair.pubkey(),
            signer: Arc::new(keypair),
        }
    }
}

/// 读取源钱包私钥文件 (单行 bs58 编码的 64 字节私钥)。
pub fn load_origin(path: &Path) -> Result<WalletIdentity, WalletError> {
    let contents = fs::read_to_string(path).map_err(|source| WalletError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let bytes = bs58::decode(contents.trim())
        .into_vec()
        .map_err(|err| WalletError::InvalidKey {
            index: 0,
            reason: err.to_string(),
        })?;
    let keypair = Keypair::try_from(bytes.as_slice()).map_err(|err| WalletError::InvalidKey {
        index: 0,
        reason: err.to_string(),
    })?;
    Ok(WalletIdentity::from_keypair(keypair))
}

#[derive(Serialize, Deserialize)]
struct StoredWallet {
    pubkey: String,
    /// bs58 编码的 64 字节私钥。明文落盘, 只用于测试网批量钱包。
    secret: String,
}

/// 批量钱包注册表: 生成、落盘、加载。
#[derive(Debug)]
pub struct WalletRegistry {
    wallets: Vec<WalletIdentity>,
}

impl WalletRegistry {
    pub fn generate(count: usize) -> Self {
        let wallets = (0..count)
            .map(|_| WalletIdentity::from_keypair(Keypair::new()))
            .collect();
        Self { wallets }
    }

    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let contents = fs::read_to_string(path).map_err(|source| WalletError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stored: Vec<StoredWallet> =
            serde_json::from_str(&contents).map_err(|source| WalletError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut wallets = Vec::with_capacity(stored.len());
        for (index, entry) in stored.iter().enumerate() {
            let bytes = bs58::decode(entry.secret.trim())
                .into_vec()
                .map_err(|err| WalletError::InvalidKey {
                    index,
                    reason: err.to_string(),
                })?;
            let keypair =
                Keypair::try_from(bytes.as_slice()).map_err(|err| WalletError::InvalidKey {
                    index,
                    reason: err.to_string(),
                })?;
            wallets.push(WalletIdentity::from_keypair(keypair));
        }
        info!(
            target: "wallet::registry",
            path = %path.display(),
            count = wallets.len(),
            "钱包注册表已加载"
        );
        Ok(Self { wallets })
    }

    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let stored: Vec<StoredWallet> = self
            .wallets
            .iter()
            .map(|wallet| StoredWallet {
                pubkey: wallet.pubkey.to_string(),
                secret: bs58::encode(wallet.signer.to_bytes()).into_string(),
            })
            .collect();
        let contents = serde_json::to_string_pretty(&stored).map_err(|source| {
            WalletError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        fs::write(path, contents).map_err(|source| WalletError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: "wallet::registry",
            path = %path.display(),
            count = self.wallets.len(),
            "钱包注册表已写入"
        );
        Ok(())
    }

    /// 加载已有注册表; 数量不足时补足并回写。
    pub fn load_or_generate(path: &Path, count: usize) -> Result<Self, WalletError> {
        let mut registry = if path.exists() {
            Self::load(path)?
        } else {
            Self { wallets: Vec::new() }
        };
        if registry.wallets.len() < count {
            let missing = count - registry.wallets.len();
            registry
                .wallets
                .extend((0..missing).map(|_| WalletIdentity::from_keypair(Keypair::new())));
            registry.save(path)?;
        }
        Ok(registry)
    }

    pub fn identities(&self) -> &[WalletIdentity] {
        &self.wallets
    }

    pub fn pubkeys(&self) -> Vec<Pubkey> {
        self.wallets.iter().map(|wallet| wallet.pubkey).collect()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}
