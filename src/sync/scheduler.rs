//! 定时调度
//!
//! 固定间隔触发一轮 `sync_all_instances`（启动时立刻先跑一轮）。
//! 单个实例失败由引擎内部记流水账，调度器只管节拍。

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::sync::engine::SyncEngine;

/// 按固定间隔循环同步所有激活实例，永不返回
pub async fn run_scheduler(engine: Arc<SyncEngine>, interval: Duration) {
    info!("[Scheduler] 启动，间隔 {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    // 一轮跑超了就顺延，不补跑
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        info!("[Scheduler] ⏰ 触发定时同步");
        match engine.sync_all_instances(false).await {
            Ok(outcomes) => info!("[Scheduler] 本轮完成 {} 个实例", outcomes.len()),
            Err(e) => tracing::error!("[Scheduler] 本轮同步出错: {:#}", e),
        }
    }
}
