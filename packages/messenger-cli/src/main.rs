use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use messenger_core::{
    config::ChainConfig,
    gas::EstimateOutcome,
    store::FileStore,
    types::GasEstimateParams,
    validation::validate_form,
    Config, CrossChainTransaction, EventBus, GasEstimator, MessageEngine, Notification,
    NotificationKind, SendMessageParams,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 配置文件路径（JSON 或 TOML），不指定时使用内置配置
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 验证并解析配置文件
    ValidateConfig,
    /// 列出支持的链
    Chains,
    /// 发送一条跨链消息并跟踪投递状态
    Send {
        #[arg(short, long)]
        message: String,
        /// 源链 id
        #[arg(short, long)]
        source: String,
        /// 目标链 id
        #[arg(short, long)]
        destination: String,
        /// 接收地址
        #[arg(short, long)]
        recipient: String,
        /// 提交后立即退出，不等待确认
        #[arg(long)]
        no_wait: bool,
    },
    /// 查看消息历史
    History {
        /// 先与存储重新同步
        #[arg(long)]
        refresh: bool,
    },
    /// 估算 gas 费用
    Estimate {
        #[arg(short, long)]
        source: String,
        #[arg(short, long)]
        destination: String,
        #[arg(short, long, default_value = "")]
        message: String,
        #[arg(short, long, default_value = "")]
        recipient: String,
    },
}

#[derive(Tabled)]
struct ChainRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "名称")]
    name: String,
    #[tabled(rename = "原生代币")]
    currency: String,
    #[tabled(rename = "浏览器")]
    explorer: String,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "消息")]
    message: String,
    #[tabled(rename = "路由")]
    route: String,
    #[tabled(rename = "源链")]
    source: String,
    #[tabled(rename = "目标链")]
    destination: String,
    #[tabled(rename = "时间")]
    age: String,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("使用配置文件: {:?}", path);
            Ok(Config::load(path)?)
        }
        None => Ok(Config::default()),
    }
}

fn open_engine(config: &Config) -> Result<MessageEngine> {
    let store = FileStore::new(&config.storage.data_dir)?;
    let engine = MessageEngine::new(config, Arc::new(store), EventBus::new())?;
    Ok(engine)
}

fn chain_name(config: &Config, chain_id: &str) -> String {
    config
        .get_chain_config(chain_id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| chain_id.to_string())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", head)
}

fn format_age(timestamp: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(timestamp);
    let secs = now.saturating_sub(timestamp) / 1000;
    match secs {
        0..=59 => format!("{}秒前", secs),
        60..=3_599 => format!("{}分钟前", secs / 60),
        3_600..=86_399 => format!("{}小时前", secs / 3_600),
        _ => format!("{}天前", secs / 86_400),
    }
}

fn side_status(status: impl std::fmt::Display, hash: Option<&str>, chain: Option<&ChainConfig>) -> String {
    match (hash, chain) {
        (Some(hash), Some(chain)) => format!("{}\n{}", status, chain.explorer_tx_url(hash)),
        (Some(hash), None) => format!("{}\n{}", status, hash),
        _ => status.to_string(),
    }
}

fn print_status(config: &Config, tx: &CrossChainTransaction) {
    println!(
        "[{}] 源链 {}: {}{}",
        tx.id,
        chain_name(config, &tx.source_chain_id),
        tx.source_status,
        tx.source_tx_hash
            .as_deref()
            .map(|h| format!(" ({})", h))
            .unwrap_or_default()
    );
    println!(
        "[{}] 目标链 {}: {}{}",
        tx.id,
        chain_name(config, &tx.destination_chain_id),
        tx.destination_status,
        tx.destination_tx_hash
            .as_deref()
            .map(|h| format!(" ({})", h))
            .unwrap_or_default()
    );
}

fn print_notification(notification: &Notification) {
    let marker = match notification.kind {
        NotificationKind::Default => "✔",
        NotificationKind::Destructive => "✘",
    };
    println!("{} {}: {}", marker, notification.title, notification.description);
}

async fn send(config: &Config, params: SendMessageParams, no_wait: bool) -> Result<()> {
    let errors = validate_form(&params);
    if !errors.is_empty() {
        for error in &errors {
            println!("- {}: {}", error.field, error.reason);
        }
        bail!("表单校验失败，共 {} 处错误", errors.len());
    }

    let engine = open_engine(config)?;
    let mut notifications = engine.events().subscribe();
    let mut current = engine.watch_current();

    let tx = engine.submit(params)?;
    if let Some(notification) = notifications.try_recv() {
        print_notification(&notification);
    }
    print_status(config, &tx);

    if no_wait {
        warn!("未等待确认，消息 {} 将保持 pending 状态", tx.id);
        return Ok(());
    }

    current.borrow_and_update();
    loop {
        current
            .changed()
            .await
            .context("引擎已停止")?;
        let Some(latest) = current.borrow_and_update().clone() else {
            continue;
        };
        print_status(config, &latest);
        if latest.is_terminal() {
            break;
        }
    }

    // 终态通知在状态写入后紧接着发布
    while let Ok(Some(notification)) =
        tokio::time::timeout(Duration::from_secs(1), notifications.recv()).await
    {
        print_notification(&notification);
    }
    Ok(())
}

async fn history(config: &Config, refresh: bool) -> Result<()> {
    let engine = open_engine(config)?;
    if refresh {
        engine.refresh_history();
    }

    let messages = engine.message_history();
    if messages.is_empty() {
        println!("暂无消息记录");
        return Ok(());
    }

    let rows: Vec<HistoryRow> = messages
        .iter()
        .map(|tx| HistoryRow {
            id: tx.id.clone(),
            message: truncate(&tx.message, 32),
            route: format!(
                "{} → {}",
                chain_name(config, &tx.source_chain_id),
                chain_name(config, &tx.destination_chain_id)
            ),
            source: side_status(
                tx.source_status,
                tx.source_tx_hash.as_deref(),
                config.get_chain_config(&tx.source_chain_id),
            ),
            destination: side_status(
                tx.destination_status,
                tx.destination_tx_hash.as_deref(),
                config.get_chain_config(&tx.destination_chain_id),
            ),
            age: format_age(tx.timestamp),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::modern()));
    println!("共 {} 条消息", messages.len());
    Ok(())
}

async fn estimate(config: &Config, params: GasEstimateParams) -> Result<()> {
    let estimator = GasEstimator::simulated(&config.gas);
    match estimator.estimate_gas(params).await {
        Ok(EstimateOutcome::Ready(estimate)) => {
            println!("源链费用:   {} (${}, {:?})", estimate.source_gas, estimate.source_usd, estimate.source_trend);
            println!(
                "目标链费用: {} (${}, {:?})",
                estimate.destination_gas, estimate.destination_usd, estimate.destination_trend
            );
            println!("合计:       {} (${})", estimate.total_gas, estimate.total_usd);
            println!("预计耗时:   {}", estimate.estimated_time);
        }
        Ok(_) => println!("请选择两条不同的链后再估算"),
        Err(e) => {
            warn!("估算失败: {}", e);
            println!("暂无可用估算");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig => {
            let Some(path) = cli.config.as_ref() else {
                bail!("请通过 --config 指定配置文件");
            };
            info!("正在验证配置文件: {:?}", path);
            let config = Config::load(path)?;
            println!("配置文件验证成功!");
            println!("配置内容概要:");
            println!("- 支持的链:");
            for chain in &config.chains {
                println!("  - {} ({}): {}", chain.name, chain.id, chain.rpc_url);
            }
            println!("- 生命周期:");
            println!(
                "  - 源链确认延迟: {}-{}毫秒",
                config.engine.source_delay.min_ms, config.engine.source_delay.max_ms
            );
            println!(
                "  - 目标链确认延迟: {}-{}毫秒",
                config.engine.destination_delay.min_ms, config.engine.destination_delay.max_ms
            );
            println!("  - 源链失败注入概率: {}", config.engine.source_failure_rate);
            println!("- 存储目录: {:?} (键: {})", config.storage.data_dir, config.storage.history_key);
            Ok(())
        }
        Commands::Chains => {
            let config = load_config(cli.config.as_ref())?;
            let rows: Vec<ChainRow> = config
                .chains
                .iter()
                .map(|c| ChainRow {
                    id: c.id,
                    name: c.name.clone(),
                    currency: c.native_currency.symbol.clone(),
                    explorer: c.block_explorer.clone(),
                })
                .collect();
            println!("{}", Table::new(rows).with(Style::modern()));
            Ok(())
        }
        Commands::Send {
            message,
            source,
            destination,
            recipient,
            no_wait,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let params = SendMessageParams {
                message,
                source_chain_id: source,
                destination_chain_id: destination,
                recipient,
            };
            send(&config, params, no_wait).await
        }
        Commands::History { refresh } => {
            let config = load_config(cli.config.as_ref())?;
            history(&config, refresh).await
        }
        Commands::Estimate {
            source,
            destination,
            message,
            recipient,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let params = GasEstimateParams {
                source_chain: source,
                destination_chain: destination,
                message,
                recipient,
            };
            estimate(&config, params).await
        }
    }
}
