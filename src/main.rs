use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod engine;
mod fees;
mod monitoring;
mod rpc;
mod scheduler;
mod wallet;
mod workflow;

use config::{CONFIG_TEMPLATE, MediciConfig, load_config};
use engine::SubmissionEngine;
use fees::FeeOracle;
use monitoring::EventBus;
use rpc::{RateLimiter, SolanaGateway};
use wallet::{WalletRegistry, load_origin};
use workflow::{WorkflowOrchestrator, WorkflowSettings};

#[derive(Parser, Debug)]
#[command(name = "medici", version, about = "批量钱包做量编排器")]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径（默认查找 medici.toml 或 config/medici.toml）"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 初始化配置模版文件
    Init(InitCmd),
    /// 批量钱包管理
    #[command(subcommand)]
    Wallets(WalletsCmd),
    /// 只做切分与调度规划, 不触网
    Plan,
    /// 执行完整做量流程并输出汇总
    Run,
}

#[derive(Args, Debug)]
struct InitCmd {
    #[arg(long, value_name = "DIR", help = "可选输出目录（默认当前目录）")]
    output: Option<PathBuf>,
    #[arg(long, help = "若文件存在则覆盖")]
    force: bool,
}

#[derive(Subcommand, Debug)]
enum WalletsCmd {
    /// 按配置数量生成或补足批量钱包
    Generate,
    /// 列出已注册钱包的公钥
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;
    init_tracing(&config.global.logging)?;

    if config.global.prometheus.enable {
        monitoring::try_init_prometheus(&config.global.prometheus.listen)?;
    }

    match cli.command {
        Command::Init(cmd) => run_init(cmd),
        Command::Wallets(cmd) => run_wallets(cmd, &config),
        Command::Plan => run_plan(&config),
        Command::Run => run_workflow(&config).await,
    }
}

fn run_init(cmd: InitCmd) -> Result<()> {
    let dir = cmd.output.unwrap_or_else(|| PathBuf::from("."));
    let target = dir.join("medici.toml");
    if target.exists() && !cmd.force {
        return Err(anyhow!("{} 已存在, 加 --force 覆盖", target.display()));
    }
    fs::create_dir_all(&dir)
        .with_context(|| format!("创建目录失败: {}", dir.display()))?;
    fs::write(&target, CONFIG_TEMPLATE)
        .with_context(|| format!("写入模版失败: {}", target.display()))?;
    println!("已写入 {}", target.display());
    Ok(())
}

fn run_wallets(cmd: WalletsCmd, config: &MediciConfig) -> Result<()> {
    let path = PathBuf::from(&config.wallets.path);
    match cmd {
        WalletsCmd::Generate => {
            let registry = WalletRegistry::load_or_generate(&path, config.wallets.count)?;
            println!("{} 个钱包就绪: {}", registry.len(), path.display());
        }
        WalletsCmd::Show => {
            let registry = WalletRegistry::load(&path)?;
            for pubkey in registry.pubkeys() {
                println!("{pubkey}");
            }
        }
    }
    Ok(())
}

/// 离线演练: 同一套切分/调度逻辑, 只是不碰 RPC 也不签名。
fn run_plan(config: &MediciConfig) -> Result<()> {
    let path = PathBuf::from(&config.wallets.path);
    let registry = WalletRegistry::load(&path)
        .with_context(|| "规划前请先执行 `medici wallets generate`")?;
    let wallets = registry.pubkeys();

    let amounts = scheduler::partition(
        wallets.len(),
        config.volume.total_lamports,
        config.volume.precision,
    )?;
    let intents = scheduler::build_intents(&wallets, &amounts)?;

    let (intents, service_fee_total) = match config.service_fee.to_service_fee() {
        Some(fee) => {
            let plan =
                fees::collector::with_fees(intents, fee.numerator, fee.denominator, fee.destination)?;
            (plan.intents, plan.total_fee)
        }
        None => (intents, 0),
    };

    let plan = json!({
        "wallets": wallets.len(),
        "total_lamports": config.volume.total_lamports.to_string(),
        "floor": scheduler::precision_floor(config.volume.precision).to_string(),
        "service_fee_total": service_fee_total.to_string(),
        "amounts": amounts.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        "transfers": intents
            .iter()
            .map(|intent| {
                json!({
                    "source": intent.source.to_string(),
                    "destination": intent.destination.to_string(),
                    "amount": intent.amount.to_string(),
                    "is_fee": intent.is_fee,
                })
            })
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn run_workflow(config: &MediciConfig) -> Result<()> {
    let origin = load_origin(&PathBuf::from(&config.wallets.origin_path))?;
    let registry = WalletRegistry::load_or_generate(
        &PathBuf::from(&config.wallets.path),
        config.wallets.count,
    )?;

    let commitment = config.rpc.commitment_config();
    let client = Arc::new(RpcClient::new_with_commitment(
        config.rpc.url.clone(),
        commitment,
    ));
    let limiter = Arc::new(RateLimiter::new(config.rpc.limiter_profile()));
    let gateway = Arc::new(SolanaGateway::new(
        client,
        config.rpc.ws_url.clone(),
        limiter,
        commitment,
    ));
    let oracle = Arc::new(FeeOracle::with_defaults(gateway.clone()));
    let events = Arc::new(EventBus::new());
    let engine = Arc::new(SubmissionEngine::new(gateway.clone(), oracle, events));
    let orchestrator = WorkflowOrchestrator::new(Arc::clone(&engine));

    let settings = WorkflowSettings {
        total_volume: config.volume.total_lamports,
        precision: config.volume.precision,
        service_fee: config.service_fee.to_service_fee(),
        reconciliation: config.workflow.strategy(),
        funding: config.engine.funding_options(),
        wallet_reserve: config.workflow.wallet_reserve_lamports,
    };

    info!(
        target: "medici",
        origin = %origin.pubkey,
        wallets = registry.len(),
        endpoint = %gateway.endpoint(),
        "开始执行做量流程"
    );

    let summary = orchestrator
        .run(&origin, registry.identities(), &settings)
        .await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing(config: &config::LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
    Ok(())
}
