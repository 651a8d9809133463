//! Prometheus 导出器的进程级引导。
//!
//! 未启用时 [`prometheus_enabled`] 保持 false, 生命周期事件只走
//! tracing 打点, `metrics` 宏一律跳过。

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use tracing::info;

/// 已安装导出器的监听地址。整个进程最多安装一次。
static EXPORTER_ADDR: OnceCell<SocketAddr> = OnceCell::new();
static ENABLED: AtomicBool = AtomicBool::new(false);

/// 在 `listen` 上安装 HTTP 导出器。地址先于安装校验,
/// 重复调用是无害的幂等操作。
pub fn try_init_prometheus(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("prometheus 监听地址非法: {listen}"))?;

    EXPORTER_ADDR.get_or_try_init(|| -> Result<SocketAddr> {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("prometheus 导出器安装失败: {addr}"))?;
        ENABLED.store(true, Ordering::Relaxed);
        info!(
            target: "monitoring::metrics",
            %addr,
            "prometheus 导出器已启动"
        );
        Ok(addr)
    })?;
    Ok(())
}

/// 打点前的快速闸门, 见 [`super::events`]。
pub fn prometheus_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}
