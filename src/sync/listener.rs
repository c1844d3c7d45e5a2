//! 同步事件监听器
//!
//! 引擎在同步通道的关键节点回调监听器，CLI / 上层应用用它展示进度。
//! 回调都是"尽力通知"，监听器里不要做会失败的事。

use async_trait::async_trait;

use crate::sync::entities::{SyncOutcome, SyncType};

/// 同步监听器 trait
#[async_trait]
pub trait SyncListener: Send + Sync {
    /// 一轮同步开始
    async fn on_sync_start(&self, instance_name: &str, sync_type: SyncType);

    /// 每处理完一个用户回调一次（done/total 为用户数口径）
    async fn on_sync_progress(&self, instance_name: &str, done: usize, total: usize);

    /// 一轮同步成功结束
    async fn on_sync_finish(&self, instance_name: &str, outcome: &SyncOutcome);

    /// 一轮同步失败
    async fn on_sync_failed(&self, instance_name: &str, error: &str);
}

/// 默认空监听器（不关心进度时用）
pub struct EmptySyncListener;

#[async_trait]
impl SyncListener for EmptySyncListener {
    async fn on_sync_start(&self, _instance_name: &str, _sync_type: SyncType) {}

    async fn on_sync_progress(&self, _instance_name: &str, _done: usize, _total: usize) {}

    async fn on_sync_finish(&self, _instance_name: &str, _outcome: &SyncOutcome) {}

    async fn on_sync_failed(&self, _instance_name: &str, _error: &str) {}
}
