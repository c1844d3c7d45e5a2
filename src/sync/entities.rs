//! 本地镜像行结构
//!
//! 所有实体都以 (id, instance_id) 复合键存储；`sync_datetime` 是
//! 该行最近一次被同步确认存在的时间（只前进不回退），`is_deleted`
//! 是软删除墓碑，历史数据不做物理删除。

use chrono::{DateTime, Utc};

/// instances 表的一行
#[derive(Debug, Clone)]
pub struct LocalInstance {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub is_active: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// users 表的一行
#[derive(Debug, Clone)]
pub struct LocalUser {
    pub id: String,
    pub instance_id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub profile_image_url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub sync_datetime: DateTime<Utc>,
    pub is_deleted: bool,
}

/// chats 表的一行
///
/// `sync_datetime` 表示"最近一次在远端列表里确认存在"；
/// `content_synced_at` 表示"最近一次成功刷新消息/模型关联内容"，
/// 摘要已入库但详情尚未拉到时为 NULL，下一轮增量会补拉。
#[derive(Debug, Clone)]
pub struct LocalChat {
    pub id: String,
    pub instance_id: i64,
    pub user_id: String,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub sync_datetime: DateTime<Utc>,
    pub content_synced_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub archived: bool,
    pub pinned: bool,
    pub folder_id: Option<String>,
    pub share_id: Option<String>,
}

/// messages 表的一行
#[derive(Debug, Clone)]
pub struct LocalMessage {
    pub id: String,
    pub chat_id: String,
    pub instance_id: i64,
    pub parent_id: Option<String>,
    pub role: String,
    pub content: String,
    pub content_length: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub sync_datetime: DateTime<Utc>,
    pub has_files: bool,
}

/// models 表的一行
#[derive(Debug, Clone)]
pub struct LocalModel {
    pub id: String,
    pub instance_id: i64,
    pub name: String,
    /// 远端返回的原始 JSON
    pub info: String,
    pub sync_datetime: DateTime<Utc>,
    pub is_deleted: bool,
}

/// knowledge_bases 表的一行
#[derive(Debug, Clone)]
pub struct LocalKnowledgeBase {
    pub id: String,
    pub instance_id: i64,
    pub name: String,
    pub description: String,
    /// 远端返回的原始 JSON
    pub data: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub sync_datetime: DateTime<Utc>,
    pub is_deleted: bool,
}

/// 同步类型：全量 / 增量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Full,
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
        }
    }
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// sync_runs 表的一行（同步流水账）
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: i64,
    pub instance_name: String,
    pub sync_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub users_synced: i64,
    pub chats_synced: i64,
    pub messages_synced: i64,
    pub status: String,
    pub error_message: Option<String>,
}

/// 一次同步通道的结果
///
/// `chats_synced` 只统计内容被成功刷新的会话；增量通道里只
/// touch（推进 sync_datetime）的会话不计入，所以无变化的增量
/// 通道 chats_synced 为 0。
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub run_id: i64,
    pub sync_type: SyncType,
    pub users_synced: i64,
    pub chats_synced: i64,
    pub messages_synced: i64,
}

/// 实例的运行状态视图（供 status 命令 / 运维面板使用）
#[derive(Debug, Clone)]
pub struct InstanceStatus {
    pub name: String,
    pub last_sync: Option<DateTime<Utc>>,
    pub user_count: i64,
    pub chat_count: i64,
    pub message_count: i64,
    pub recent_runs: Vec<SyncRun>,
}
