//! 远端 API 数据结构
//!
//! OpenWebUI 的各个 list/get 端点返回的 JSON 结构。
//! 服务器版本之间字段差异较大，缺失字段一律用默认值兜底。

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 把 epoch 秒转换为 UTC 时间；0 或负值视为缺失
pub fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

/// `GET /api/v1/users/all` 返回的用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub profile_image_url: String,
    /// epoch 秒
    #[serde(default)]
    pub created_at: i64,
    /// epoch 秒
    #[serde(default)]
    pub updated_at: i64,
}

impl RemoteUser {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.created_at)
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.updated_at)
    }
}

/// `GET /api/v1/chats/list/user/{id}` 返回的会话摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteChatSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// epoch 秒
    #[serde(default)]
    pub created_at: i64,
    /// epoch 秒
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub share_id: Option<String>,
}

impl RemoteChatSummary {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.created_at)
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.updated_at)
    }
}

/// `GET /api/v1/chats/all/{id}` 返回的会话详情
///
/// `chat` 字段缺失视为详情不可用（反序列化失败 -> absent）。
#[derive(Debug, Clone, Deserialize)]
pub struct ChatDetail {
    pub chat: ChatContent,
}

/// 会话详情中的实际内容：使用的模型列表 + 消息列表
#[derive(Debug, Clone, Deserialize)]
pub struct ChatContent {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
}

/// 会话详情中的单条消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub files: Vec<RemoteMessageFile>,
    /// epoch 秒（部分服务器版本字段名为 timestamp）
    #[serde(default, alias = "timestamp")]
    pub created_at: i64,
}

impl RemoteMessage {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.created_at)
    }
}

/// 消息上挂载的附件条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessageFile {
    #[serde(rename = "type", default)]
    pub file_type: String,
    #[serde(default)]
    pub file: Option<RemoteFileInfo>,
}

/// 附件的文件元信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFileInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub hash: String,
}

/// `GET /api/v1/models/` 返回的模型（保留原始 JSON）
#[derive(Debug, Clone)]
pub struct RemoteModel {
    pub id: String,
    pub name: String,
    pub raw: Value,
}

impl RemoteModel {
    /// 从原始 JSON 对象提取模型；没有 id 的条目丢弃
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?.to_string();
        let name = value
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(&id)
            .to_string();
        Some(Self {
            id,
            name,
            raw: value.clone(),
        })
    }
}

/// `GET /api/v1/knowledge/` 返回的知识库（保留原始 JSON）
#[derive(Debug, Clone)]
pub struct RemoteKnowledgeBase {
    pub id: String,
    pub name: String,
    pub description: String,
    /// epoch 秒
    pub created_at: i64,
    /// epoch 秒
    pub updated_at: i64,
    pub raw: Value,
}

impl RemoteKnowledgeBase {
    /// 从原始 JSON 对象提取知识库；没有 id 的条目丢弃
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?.to_string();
        let str_field = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let epoch_field = |key: &str| value.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
        Some(Self {
            id,
            name: str_field("name"),
            description: str_field("description"),
            created_at: epoch_field("created_at"),
            updated_at: epoch_field("updated_at"),
            raw: value.clone(),
        })
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.created_at)
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        epoch_to_utc(self.updated_at)
    }
}
