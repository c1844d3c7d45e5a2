//! OpenWebUI HTTP API 客户端
//!
//! 负责对单个实例的所有 HTTP 请求：带 Bearer 认证、指数退避重试、
//! 429 限流等待。远端只有 list/get 端点，没有变更流。
//!
//! ## NOTE: 错误不越过客户端边界
//!
//! 重试耗尽一律返回"缺席"结果（空列表 / None）并打日志，调用方
//! 跳过该条目继续本轮同步。单个拉不到的会话不应让整轮同步失败。

use anyhow::{Context, Result};
use reqwest::{header, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::sync::config::{InstanceConfig, SyncSettings};
use crate::sync::types::{
    ChatDetail, RemoteChatSummary, RemoteKnowledgeBase, RemoteModel, RemoteUser,
};

/// OpenWebUI API 客户端（一个实例一个）
pub struct OpenWebUiApi {
    client: reqwest::Client,
    base_url: String,
    instance_name: String,
    max_retries: u32,
}

impl OpenWebUiApi {
    /// 创建 API 客户端
    ///
    /// Bearer Token 通过 default_headers 自动附在每个请求上。
    pub fn new(instance: &InstanceConfig, settings: &SyncSettings) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = header::HeaderMap::new();
                headers.insert(
                    header::AUTHORIZATION,
                    header::HeaderValue::from_str(&format!("Bearer {}", instance.api_key))
                        .context("无效的 API Key")?,
                );
                headers
            })
            .timeout(Duration::from_secs(settings.api_timeout_secs))
            .build()
            .context("创建 HTTP 客户端失败")?;

        Ok(Self {
            client,
            base_url: instance.url.trim_end_matches('/').to_string(),
            instance_name: instance.name.clone(),
            max_retries: settings.max_retries,
        })
    }

    /// 发 GET 请求并解析 JSON，带重试
    ///
    /// - 瞬时错误（连接失败、非 200 响应）按 2^attempt 秒退避重试，
    ///   最多 max_retries 次；
    /// - 429 读 Retry-After（缺省 60 秒）等待后重试，单独计数，
    ///   不占用瞬时错误的重试预算；
    /// - 耗尽后返回 None。
    async fn get_json(&self, endpoint: &str) -> Option<Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let operation_id = Uuid::new_v4().to_string();
        debug!(
            "[OWUIAPI] 📡 请求 {}，实例: {}, 操作ID: {}",
            endpoint, self.instance_name, operation_id
        );

        let mut attempt: u32 = 0;
        let mut rate_limit_hits: u32 = 0;
        while attempt < self.max_retries {
            match self
                .client
                .get(&url)
                .header("operationID", &operation_id)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<Value>().await {
                            Ok(value) => return Some(value),
                            Err(e) => {
                                error!(
                                    "[OWUIAPI] {} 响应不是合法 JSON: {:?}",
                                    endpoint, e
                                );
                                return None;
                            }
                        }
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = response
                            .headers()
                            .get(header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(60);
                        rate_limit_hits += 1;
                        if rate_limit_hits > self.max_retries {
                            error!(
                                "[OWUIAPI] {} 连续被限流 {} 次，放弃",
                                endpoint, rate_limit_hits
                            );
                            break;
                        }
                        warn!(
                            "[OWUIAPI] {} 被限流，等待 {}s 后重试",
                            endpoint, retry_after
                        );
                        sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }
                    warn!(
                        "[OWUIAPI] {} 返回 HTTP {}，按瞬时错误重试",
                        endpoint, status
                    );
                }
                Err(e) => {
                    warn!(
                        "[OWUIAPI] 第 {}/{} 次请求 {} 失败: {}",
                        attempt + 1,
                        self.max_retries,
                        endpoint,
                        e
                    );
                }
            }
            attempt += 1;
            if attempt < self.max_retries {
                sleep(Duration::from_secs(2u64.pow(attempt - 1))).await;
            }
        }

        error!(
            "[OWUIAPI] 重试 {} 次后仍无法获取 {}，跳过",
            self.max_retries, endpoint
        );
        None
    }

    /// 拉取实例的全部用户
    pub async fn list_users(&self) -> Vec<RemoteUser> {
        let Some(data) = self.get_json("/api/v1/users/all").await else {
            return Vec::new();
        };
        // 响应形如 {"users": [...]}
        let users = data.get("users").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<Vec<RemoteUser>>(users) {
            Ok(users) => {
                info!(
                    "[OWUIAPI] ✅ 用户列表响应，实例: {}, 用户数: {}",
                    self.instance_name,
                    users.len()
                );
                users
            }
            Err(e) => {
                error!("[OWUIAPI] 用户列表反序列化失败: {:?}", e);
                Vec::new()
            }
        }
    }

    /// 拉取某个用户的会话摘要列表
    ///
    /// 拉取失败返回 None 而不是空列表：空列表意味着"该用户确认没有
    /// 会话"，会让通道末尾的 sweep 把他名下的会话全部打墓碑，
    /// 两种情况必须区分开。
    pub async fn list_user_chats(&self, user_id: &str) -> Option<Vec<RemoteChatSummary>> {
        let endpoint = format!("/api/v1/chats/list/user/{}", user_id);
        let data = self.get_json(&endpoint).await?;
        match serde_json::from_value::<Vec<RemoteChatSummary>>(data) {
            Ok(chats) => Some(chats),
            Err(e) => {
                error!(
                    "[OWUIAPI] 用户 {} 的会话列表反序列化失败: {:?}",
                    user_id, e
                );
                None
            }
        }
    }

    /// 拉取会话详情（消息 + 模型关联）
    ///
    /// 用管理端点 /api/v1/chats/all/{id}，可以访问所有用户的会话。
    /// 拉不到或缺 chat 字段返回 None。
    pub async fn get_chat_detail(&self, chat_id: &str) -> Option<ChatDetail> {
        let endpoint = format!("/api/v1/chats/all/{}", chat_id);
        let data = self.get_json(&endpoint).await?;
        match serde_json::from_value::<ChatDetail>(data) {
            Ok(detail) => Some(detail),
            Err(e) => {
                warn!("[OWUIAPI] 会话 {} 详情缺失或格式异常: {:?}", chat_id, e);
                None
            }
        }
    }

    /// 拉取实例的模型列表
    ///
    /// 先试带尾部斜杠的端点，失败再试不带斜杠的，兼容两个观察到的
    /// 服务器版本。响应可能是数组，也可能是 {"data": [...]}。
    pub async fn list_models(&self) -> Vec<RemoteModel> {
        let mut data = self.get_json("/api/v1/models/").await;
        if data.is_none() {
            data = self.get_json("/api/v1/models").await;
        }
        let Some(data) = data else {
            return Vec::new();
        };
        let models = Self::unwrap_list(data);
        let models: Vec<RemoteModel> = models.iter().filter_map(RemoteModel::from_value).collect();
        info!(
            "[OWUIAPI] ✅ 模型列表响应，实例: {}, 模型数: {}",
            self.instance_name,
            models.len()
        );
        models
    }

    /// 拉取实例的知识库列表
    pub async fn list_knowledge_bases(&self) -> Vec<RemoteKnowledgeBase> {
        let Some(data) = self.get_json("/api/v1/knowledge/").await else {
            return Vec::new();
        };
        let kbs = Self::unwrap_list(data);
        kbs.iter().filter_map(RemoteKnowledgeBase::from_value).collect()
    }

    /// 兼容"裸数组"和"{"data": [...]}"两种响应包装
    fn unwrap_list(data: Value) -> Vec<Value> {
        match data {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;
    use std::time::Instant;

    fn api_for(server: &MockServer, max_retries: u32) -> OpenWebUiApi {
        let instance = InstanceConfig {
            name: "test".to_string(),
            url: server.base_url(),
            api_key: "test-key".to_string(),
            is_active: true,
        };
        let settings = SyncSettings {
            max_retries,
            ..SyncSettings::default()
        };
        OpenWebUiApi::new(&instance, &settings).unwrap()
    }

    #[tokio::test]
    async fn rate_limit_honors_retry_after() {
        let server = MockServer::start_async().await;
        let mut throttled = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(429).header("Retry-After", "2");
            })
            .await;

        let api = api_for(&server, 3);
        let start = Instant::now();
        let handle = tokio::spawn(async move { api.list_users().await });

        // 客户端吃到 429 后会睡满 Retry-After；趁这个窗口把远端"恢复"
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(throttled.hits_async().await, 1);
        throttled.delete_async().await;
        let ok = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({
                    "users": [{"id": "u1", "name": "Alice", "email": "a@example.com",
                               "role": "user", "created_at": 1700000000, "updated_at": 1700000000}]
                }));
            })
            .await;

        let users = handle.await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "u1");
        // 重试发生在等满 Retry-After 之后，且只重试了一次
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(ok.hits_async().await, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_absent() {
        let server = MockServer::start_async().await;
        let failing = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(500);
            })
            .await;

        let api = api_for(&server, 1);
        let users = api.list_users().await;
        assert!(users.is_empty());
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn models_fall_back_to_bare_path() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/models/");
                then.status(404);
            })
            .await;
        let bare = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/models");
                then.status(200)
                    .json_body(json!({"data": [{"id": "gpt-4o", "name": "GPT-4o"}]}));
            })
            .await;

        let api = api_for(&server, 1);
        let models = api.list_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "gpt-4o");
        bare.assert_async().await;
    }

    #[tokio::test]
    async fn absent_chat_listing_differs_from_empty() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ub");
                then.status(200).json_body(json!([]));
            })
            .await;

        let api = api_for(&server, 1);
        // 拉取失败是 None，真正的空列表是 Some(空)
        assert!(api.list_user_chats("ua").await.is_none());
        assert_eq!(api.list_user_chats("ub").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn chat_detail_without_chat_field_is_absent() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(200).json_body(json!({"detail": "not found"}));
            })
            .await;

        let api = api_for(&server, 1);
        assert!(api.get_chat_detail("c1").await.is_none());
    }

    #[tokio::test]
    async fn bearer_token_attached() {
        let server = MockServer::start_async().await;
        let authed = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/knowledge/")
                    .header("authorization", "Bearer test-key");
                then.status(200).json_body(json!([{"id": "kb1", "name": "docs"}]));
            })
            .await;

        let api = api_for(&server, 1);
        let kbs = api.list_knowledge_bases().await;
        assert_eq!(kbs.len(), 1);
        assert_eq!(kbs[0].name, "docs");
        authed.assert_async().await;
    }
}
