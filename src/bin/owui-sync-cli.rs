//! OpenWebUI 同步 CLI
//!
//! 把一个或多个 OpenWebUI 实例的用户/会话/消息镜像到本地 SQLite。
//! 子命令：sync（单实例或全部）、status（查看镜像状态）、
//! schedule（常驻定时同步）。

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use openwebui_sync_rust::sync::entities::{SyncOutcome, SyncType};
use openwebui_sync_rust::{run_scheduler, SyncConfig, SyncEngine, SyncListener};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// OpenWebUI 同步工具
#[derive(Parser, Debug)]
#[command(name = "owui-sync-cli")]
#[command(about = "OpenWebUI 同步工具 - 把远端实例镜像到本地 SQLite", long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "sync_config.json")]
    config: String,

    /// 日志级别（默认: info,openwebui_sync_rust=debug）
    #[arg(long, default_value = "info,openwebui_sync_rust=debug")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 同步指定实例，或用 --all 同步全部激活实例
    Sync {
        /// 实例名（与 --all 二选一）
        instance: Option<String>,

        /// 同步所有激活的实例
        #[arg(long)]
        all: bool,

        /// 强制全量同步（忽略已有基线）
        #[arg(long)]
        full: bool,
    },
    /// 查看实例的镜像状态与最近的同步流水
    Status {
        /// 实例名
        instance: String,
    },
    /// 常驻运行，按配置的间隔定时同步全部激活实例
    Schedule,
}

/// 初始化日志（同时输出到 stdout 和文件）
fn init_logger(log_level: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    // 优先使用环境变量 RUST_LOG（如果设置了），否则使用命令行参数
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    // 创建日志文件（追加模式）
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("sync.log")
        .context("无法创建日志文件 sync.log")?;

    // 输出到 stdout（控制台），保留 ANSI 颜色代码用于终端显示
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(true);

    // 输出到文件，禁用 ANSI 颜色代码（文件不需要颜色）
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("[CLI] 📝 日志已同时输出到控制台和文件: sync.log");
    Ok(())
}

/// 把同步进度打到日志的监听器
struct CliSyncListener;

#[async_trait]
impl SyncListener for CliSyncListener {
    async fn on_sync_start(&self, instance_name: &str, sync_type: SyncType) {
        info!("[CLI/Sync] 🔄 {} 开始 {} 同步", instance_name, sync_type);
    }

    async fn on_sync_progress(&self, instance_name: &str, done: usize, total: usize) {
        info!("[CLI/Sync] 📊 {} 进度: {}/{} 用户", instance_name, done, total);
    }

    async fn on_sync_finish(&self, instance_name: &str, outcome: &SyncOutcome) {
        info!(
            "[CLI/Sync] ✅ {} 同步完成: {} 用户, {} 会话, {} 消息 (run #{})",
            instance_name,
            outcome.users_synced,
            outcome.chats_synced,
            outcome.messages_synced,
            outcome.run_id
        );
    }

    async fn on_sync_failed(&self, instance_name: &str, error: &str) {
        error!("[CLI/Sync] ❌ {} 同步失败: {}", instance_name, error);
    }
}

fn print_status(status: &openwebui_sync_rust::InstanceStatus) {
    info!("[CLI] 📋 实例: {}", status.name);
    match status.last_sync {
        Some(t) => info!("[CLI]   最近成功同步: {}", t.format("%Y-%m-%d %H:%M:%S UTC")),
        None => info!("[CLI]   最近成功同步: 从未"),
    }
    info!(
        "[CLI]   活跃用户: {} | 活跃会话: {} | 消息: {}",
        status.user_count, status.chat_count, status.message_count
    );
    info!("[CLI]   最近 {} 次同步:", status.recent_runs.len());
    for run in &status.recent_runs {
        info!(
            "[CLI]   - #{} {} {} | {} 用户 {} 会话 {} 消息{}",
            run.id,
            run.sync_type,
            run.status,
            run.users_synced,
            run.chats_synced,
            run.messages_synced,
            run.error_message
                .as_deref()
                .map(|e| format!(" | {}", e))
                .unwrap_or_default()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level)?;

    let config = SyncConfig::from_json_file(&args.config)?;
    let interval = Duration::from_secs(config.settings.schedule_interval_secs);
    let engine = SyncEngine::new(config)
        .await?
        .with_listener(Arc::new(CliSyncListener));

    match args.command {
        Command::Sync { instance, all, full } => {
            if all {
                let outcomes = engine.sync_all_instances(full).await?;
                info!("[CLI] ✅ 本轮完成 {} 个实例", outcomes.len());
            } else if let Some(name) = instance {
                engine.sync_instance(&name, full).await?;
            } else {
                anyhow::bail!("请指定实例名，或用 --all 同步全部激活实例");
            }
        }
        Command::Status { instance } => {
            let status = engine.status(&instance).await?;
            print_status(&status);
        }
        Command::Schedule => {
            info!("[CLI] ⏰ 定时同步模式，间隔 {:?}，按 Ctrl+C 退出", interval);
            run_scheduler(Arc::new(engine), interval).await;
        }
    }

    Ok(())
}
