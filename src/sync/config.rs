//! 同步配置
//!
//! 显式配置对象：实例注册表 + 同步参数，由调用方构造后传入 SyncEngine，
//! 不使用进程级全局状态。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 单个 OpenWebUI 实例的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// 实例名（如 "fasgpt"），作为本地镜像中的实例标识
    pub name: String,
    /// API 基础 URL（不带尾部斜杠）
    pub url: String,
    /// Bearer Token（JWT）
    pub api_key: String,
    /// 是否参与同步
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// 同步参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// 单个 HTTP 请求超时（秒）
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    /// 相邻请求之间的间隔（毫秒），用于尊重远端的共享请求配额
    #[serde(default = "default_api_delay_ms")]
    pub api_delay_ms: u64,
    /// 瞬时错误的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 同一实例内并发拉取的用户数上限
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,
    /// 定时器触发增量同步的间隔（秒）
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_api_delay_ms() -> u64 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_concurrent_users() -> usize {
    4
}

fn default_schedule_interval_secs() -> u64 {
    3600
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_timeout_secs: default_api_timeout_secs(),
            api_delay_ms: default_api_delay_ms(),
            max_retries: default_max_retries(),
            max_concurrent_users: default_max_concurrent_users(),
            schedule_interval_secs: default_schedule_interval_secs(),
        }
    }
}

/// 同步总配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 数据库路径（SQLite），可以是：
    /// - 相对路径：如 "openwebui_sync.db" 会转换为 "sqlite://openwebui_sync.db?mode=rwc"
    /// - 完整 URL：如 "sqlite://openwebui_sync.db?mode=rwc" 直接使用
    pub db_path: String,
    /// 实例注册表
    pub instances: Vec<InstanceConfig>,
    /// 同步参数
    #[serde(default)]
    pub settings: SyncSettings,
}

impl SyncConfig {
    /// 从 JSON 字符串解析配置
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("解析同步配置失败")
    }

    /// 从 JSON 文件加载配置
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .context(format!("读取配置文件失败: {}", path.display()))?;
        Self::from_json_str(&content)
    }

    /// 按名称查找实例配置
    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// 所有激活的实例
    pub fn active_instances(&self) -> Vec<&InstanceConfig> {
        self.instances.iter().filter(|i| i.is_active).collect()
    }

    /// 数据库连接 URL（补全 sqlite:// 前缀与 mode=rwc）
    pub fn db_url(&self) -> String {
        if self.db_path.starts_with("sqlite:") {
            self.db_path.clone()
        } else {
            format!("sqlite://{}?mode=rwc", self.db_path)
        }
    }
}
