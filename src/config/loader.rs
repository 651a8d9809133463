use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::MediciConfig;

/// 未通过 `-c` 指定路径时, 按顺序探测的候选文件。
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["medici.toml", "config/medici.toml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("指定的配置文件不存在: {path}")]
    NotFound { path: PathBuf },
    #[error("读取配置失败 {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("解析配置失败 {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// 显式路径必须存在; 默认探测跳过缺失的候选,
/// 全部缺失时回落到内建默认配置。
pub fn load_config(path: Option<PathBuf>) -> Result<MediciConfig, ConfigError> {
    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        return parse_file(&path);
    }

    for candidate in DEFAULT_CONFIG_PATHS.iter().map(Path::new) {
        if candidate.exists() {
            return parse_file(candidate);
        }
    }
    debug!(target: "config", "未找到配置文件, 使用内建默认值");
    Ok(MediciConfig::default())
}

fn parse_file(path: &Path) -> Result<MediciConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(target: "config", path = %path.display(), "配置已加载");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        match load_config(Some(path.clone())) {
            Err(ConfigError::NotFound { path: reported }) => assert_eq!(reported, path),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn malformed_toml_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[rpc\nurl = ").unwrap();
        let err = load_config(Some(path.clone())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(path.to_str().unwrap()));
    }

    #[test]
    fn explicit_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("medici.toml");
        fs::write(
            &path,
            r#"
            [wallets]
            count = 42
            "#,
        )
        .unwrap();
        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.wallets.count, 42);
    }
}
