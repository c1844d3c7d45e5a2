//! 同步引擎
//!
//! 一个引擎实例管理多个远端实例到同一个本地库的镜像。每次
//! `sync_instance` 是一个完整的同步通道：
//!
//! 1. 拉远端用户全集，本地有而远端没有的用户打墓碑；
//! 2. 按用户并发走会话摘要列表，变化判定后拉详情、整体替换内容；
//! 3. 全集 upsert 模型与知识库目录；
//! 4. 通道结束做 staleness sweep：本轮没确认到的会话打墓碑；
//! 5. 成功后把通道开始时间写成实例的同步基线，并落一条流水账。
//!
//! 同一实例同一时刻只允许一个通道在跑；不同实例互不阻塞。

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{stream, StreamExt};
use sqlx::{Pool, Sqlite};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::sync::api::OpenWebUiApi;
use crate::sync::config::SyncConfig;
use crate::sync::dao::{CatalogDao, ChatDao, InstanceDao, MessageDao, SyncRunDao, UserDao};
use crate::sync::db::create_sqlite_pool_with_schema;
use crate::sync::entities::{InstanceStatus, SyncOutcome, SyncType};
use crate::sync::listener::{EmptySyncListener, SyncListener};
use crate::sync::types::{RemoteChatSummary, RemoteUser};

/// 同步引擎
pub struct SyncEngine {
    config: SyncConfig,
    instance_dao: InstanceDao,
    user_dao: UserDao,
    chat_dao: ChatDao,
    message_dao: MessageDao,
    catalog_dao: CatalogDao,
    run_dao: SyncRunDao,
    listener: Arc<dyn SyncListener>,
    /// 实例名 -> 通道互斥锁。引擎内保证同一实例不会并发跑两个通道。
    locks: StdMutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl SyncEngine {
    /// 创建引擎：打开（必要时创建）本地库并建表
    pub async fn new(config: SyncConfig) -> Result<Self> {
        let pool = create_sqlite_pool_with_schema(&config.db_url()).await?;
        Ok(Self::with_pool(config, pool))
    }

    /// 复用已有连接池创建引擎（嵌入场景）
    pub fn with_pool(config: SyncConfig, pool: Pool<Sqlite>) -> Self {
        Self {
            config,
            instance_dao: InstanceDao::new(pool.clone()),
            user_dao: UserDao::new(pool.clone()),
            chat_dao: ChatDao::new(pool.clone()),
            message_dao: MessageDao::new(pool.clone()),
            catalog_dao: CatalogDao::new(pool.clone()),
            run_dao: SyncRunDao::new(pool),
            listener: Arc::new(EmptySyncListener),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// 挂监听器
    pub fn with_listener(mut self, listener: Arc<dyn SyncListener>) -> Self {
        self.listener = listener;
        self
    }

    fn channel_lock(&self, name: &str) -> Arc<TokioMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }

    /// 同步单个实例
    ///
    /// 没有同步基线（从未成功同步过）或 force_full 时走全量，
    /// 否则走增量。返回本通道的计数结果。
    pub async fn sync_instance(&self, name: &str, force_full: bool) -> Result<SyncOutcome> {
        let instance = self
            .config
            .instance(name)
            .ok_or_else(|| anyhow!("配置中不存在实例: {}", name))?
            .clone();

        let _guard = self
            .channel_lock(name)
            .try_lock_owned()
            .map_err(|_| anyhow!("实例 {} 的同步通道已在运行，本次请求被拒绝", name))?;

        let instance_id = self
            .instance_dao
            .upsert_instance(&instance.name, &instance.url, &instance.api_key, instance.is_active)
            .await?;
        let baseline = self.instance_dao.last_sync_time(instance_id).await?;
        let sync_type = if force_full || baseline.is_none() {
            SyncType::Full
        } else {
            SyncType::Incremental
        };

        // 通道开始时间，成功后作为下一轮的基线。通道进行期间写入的行
        // sync_datetime 都 >= 这个时间，所以它同时是 sweep 的 cutoff。
        let sync_time = Utc::now();
        let run_id = self.run_dao.start_run(name, sync_type).await?;
        self.listener.on_sync_start(name, sync_type).await;
        info!(
            "[SyncEngine] 🔄 实例 {} 开始 {} 同步, run #{}, 基线: {:?}",
            name, sync_type, run_id, baseline
        );

        let api = OpenWebUiApi::new(&instance, &self.config.settings)?;
        match self
            .run_channel(&api, name, instance_id, sync_type, sync_time)
            .await
        {
            Ok((users_synced, chats_synced, messages_synced)) => {
                self.run_dao
                    .complete_run(run_id, users_synced, chats_synced, messages_synced)
                    .await?;
                self.instance_dao.update_last_sync(instance_id, sync_time).await?;
                let outcome = SyncOutcome {
                    run_id,
                    sync_type,
                    users_synced,
                    chats_synced,
                    messages_synced,
                };
                info!(
                    "[SyncEngine] ✅ 实例 {} 同步完成: {} 用户, {} 会话, {} 消息",
                    name, users_synced, chats_synced, messages_synced
                );
                self.listener.on_sync_finish(name, &outcome).await;
                Ok(outcome)
            }
            Err(e) => {
                error!("[SyncEngine] 实例 {} 同步失败: {:?}", name, e);
                self.run_dao.fail_run(run_id, &format!("{:#}", e)).await?;
                self.listener.on_sync_failed(name, &format!("{:#}", e)).await;
                Err(e)
            }
        }
    }

    /// 同步所有激活的实例（单个实例失败只记日志，不中断其余实例）
    pub async fn sync_all_instances(&self, force_full: bool) -> Result<Vec<SyncOutcome>> {
        let names: Vec<String> = self
            .config
            .active_instances()
            .iter()
            .map(|i| i.name.clone())
            .collect();
        if names.is_empty() {
            warn!("[SyncEngine] 配置中没有激活的实例");
        }

        let mut outcomes = Vec::with_capacity(names.len());
        for name in names {
            match self.sync_instance(&name, force_full).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!("[SyncEngine] 跳过实例 {}: {:#}", name, e),
            }
        }
        Ok(outcomes)
    }

    /// 通道主体。返回 (用户数, 会话数, 消息数)；任何 Err 都会让
    /// 整个通道按失败收场（不 sweep、不推进基线）。
    async fn run_channel(
        &self,
        api: &OpenWebUiApi,
        name: &str,
        instance_id: i64,
        sync_type: SyncType,
        sync_time: DateTime<Utc>,
    ) -> Result<(i64, i64, i64)> {
        let users = api.list_users().await;
        if users.is_empty() {
            // 空响应和拉取失败无法区分，宁可让通道失败也不做
            // 可能把全库打成墓碑的 sweep
            bail!("未能从实例 {} 获取用户列表", name);
        }

        // 用户墓碑：本地活跃而远端消失的
        let known_ids = self.user_dao.active_user_ids(instance_id).await?;
        let remote_ids: HashSet<String> = users.iter().map(|u| u.id.clone()).collect();
        let vanished: Vec<String> = known_ids.difference(&remote_ids).cloned().collect();
        self.user_dao.mark_users_deleted(&vanished, instance_id).await?;

        // 目录实体基数小，每个通道全量 upsert
        for model in api.list_models().await {
            self.catalog_dao.upsert_model(&model, instance_id, sync_time).await?;
        }
        for kb in api.list_knowledge_bases().await {
            self.catalog_dao
                .upsert_knowledge_base(&kb, instance_id, sync_time)
                .await?;
        }

        // 按用户并发走会话，单用户内部串行
        let total = users.len();
        let progress = AtomicUsize::new(0);
        let concurrency = self.config.settings.max_concurrent_users.max(1);
        let user_futures: Vec<_> = users
            .iter()
            .map(|user| {
                self.sync_user(api, name, instance_id, user, &known_ids, sync_type, sync_time, &progress, total)
            })
            .collect();
        let results: Vec<Result<(i64, i64)>> = stream::iter(user_futures)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut chats_synced = 0i64;
        let mut messages_synced = 0i64;
        for result in results {
            let (chats, messages) = result?;
            chats_synced += chats;
            messages_synced += messages;
        }

        // 所有用户都走完之后才能 sweep：本轮没被确认的会话
        //（含已墓碑用户名下的）打墓碑，消息保留作历史
        let swept = self.chat_dao.mark_stale_chats_deleted(instance_id, sync_time).await?;
        if swept > 0 {
            info!("[SyncEngine] 实例 {} sweep 标记 {} 个会话为已删除", name, swept);
        }

        Ok((users.len() as i64, chats_synced, messages_synced))
    }

    /// 处理单个用户：upsert 资料 + 走会话列表
    #[allow(clippy::too_many_arguments)]
    async fn sync_user(
        &self,
        api: &OpenWebUiApi,
        name: &str,
        instance_id: i64,
        user: &RemoteUser,
        known_ids: &HashSet<String>,
        sync_type: SyncType,
        sync_time: DateTime<Utc>,
        progress: &AtomicUsize,
        total: usize,
    ) -> Result<(i64, i64)> {
        self.user_dao.upsert_user(user, instance_id, sync_time).await?;

        let mut chats_synced = 0i64;
        let mut messages_synced = 0i64;
        match api.list_user_chats(&user.id).await {
            Some(chats) => {
                // 全量通道或首次见到的用户，所有会话都拉详情
                let bootstrap = sync_type == SyncType::Full || !known_ids.contains(&user.id);
                debug!(
                    "[SyncEngine] 用户 {} 有 {} 个会话, bootstrap: {}",
                    user.id,
                    chats.len(),
                    bootstrap
                );
                for chat in &chats {
                    if let Some(written) = self
                        .sync_chat(api, instance_id, &user.id, chat, bootstrap, sync_time)
                        .await?
                    {
                        chats_synced += 1;
                        messages_synced += written;
                    }
                }
            }
            None => {
                // 列表拉取失败和"确认没有会话"必须区分：把该用户名下的
                // 会话从本轮 sweep 里摘出来，留到下一轮重新判定
                warn!(
                    "[SyncEngine] 用户 {} 的会话列表拉取失败，本轮保留其本地会话",
                    user.id
                );
                self.chat_dao
                    .touch_chats_for_user(&user.id, instance_id, sync_time)
                    .await?;
            }
        }

        let done = progress.fetch_add(1, Ordering::SeqCst) + 1;
        self.listener.on_sync_progress(name, done, total).await;
        Ok((chats_synced, messages_synced))
    }

    /// 处理单个会话摘要
    ///
    /// 变化判定：新会话、墓碑复活、内容从未成功拉到
    /// （content_synced_at 为 NULL）、或远端 updated_at 晚于本地
    /// 最近确认时间，都要重新拉详情；否则只推进 sync_datetime。
    /// 详情拉不到不算通道失败：摘要照常入库，content_synced_at
    /// 保持 NULL，下一轮增量自动补拉。
    ///
    /// 内容刷新成功返回 Some(写入消息数)；只 touch 或详情缺席
    /// 返回 None，不计入流水账的会话计数。
    async fn sync_chat(
        &self,
        api: &OpenWebUiApi,
        instance_id: i64,
        user_id: &str,
        chat: &RemoteChatSummary,
        bootstrap: bool,
        sync_time: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let local = self.chat_dao.get_chat(&chat.id, instance_id).await?;
        let needs_content = bootstrap
            || match &local {
                None => true,
                Some(local) => {
                    local.is_deleted
                        || local.content_synced_at.is_none()
                        || chat
                            .updated_at_utc()
                            .map_or(false, |updated| updated > local.sync_datetime)
                }
            };

        if !needs_content {
            self.chat_dao.touch_chat(&chat.id, instance_id, sync_time).await?;
            return Ok(None);
        }

        self.chat_dao
            .upsert_chat(chat, instance_id, user_id, sync_time)
            .await?;
        let written = match api.get_chat_detail(&chat.id).await {
            Some(detail) => Some(
                self.chat_dao
                    .replace_chat_content(
                        &chat.id,
                        instance_id,
                        &detail.chat.models,
                        &detail.chat.messages,
                        sync_time,
                    )
                    .await? as i64,
            ),
            None => {
                warn!(
                    "[SyncEngine] 会话 {} 详情暂不可用，内容留待下一轮补拉",
                    chat.id
                );
                None
            }
        };
        if self.config.settings.api_delay_ms > 0 {
            sleep(Duration::from_millis(self.config.settings.api_delay_ms)).await;
        }
        Ok(written)
    }

    /// 实例状态视图：基线时间、实体计数、最近的同步流水
    pub async fn status(&self, name: &str) -> Result<InstanceStatus> {
        let instance = self
            .instance_dao
            .get_instance(name)
            .await?
            .with_context(|| format!("实例 {} 尚未同步过", name))?;
        Ok(InstanceStatus {
            name: instance.name,
            last_sync: instance.last_sync_at,
            user_count: self.user_dao.count_active(instance.id).await?,
            chat_count: self.chat_dao.count_active(instance.id).await?,
            message_count: self.message_dao.count_for_instance(instance.id).await?,
            recent_runs: self.run_dao.recent_runs_for_instance(name, 5).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::config::{InstanceConfig, SyncSettings};
    use httpmock::Method::GET;
    use httpmock::{Mock, MockServer};
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(server: &MockServer, dir: &TempDir) -> SyncConfig {
        SyncConfig {
            db_path: dir.path().join("mirror.db").display().to_string(),
            instances: vec![InstanceConfig {
                name: "fasgpt".to_string(),
                url: server.base_url(),
                api_key: "token".to_string(),
                is_active: true,
            }],
            settings: SyncSettings {
                api_delay_ms: 0,
                max_retries: 1,
                max_concurrent_users: 2,
                ..SyncSettings::default()
            },
        }
    }

    fn user_json(id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id, "name": name, "email": format!("{}@example.com", id),
            "role": "user", "created_at": 1700000000, "updated_at": 1700000000
        })
    }

    fn chat_json(id: &str, updated_at: i64) -> serde_json::Value {
        json!({"id": id, "title": "hello", "created_at": 1700000000, "updated_at": updated_at})
    }

    async fn mock_catalog(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/models/");
                then.status(200).json_body(json!([{"id": "gpt-4o", "name": "GPT-4o"}]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/knowledge/");
                then.status(200).json_body(json!([]));
            })
            .await;
    }

    async fn mock_empty_chats<'a>(server: &'a MockServer, user_id: &str) -> Mock<'a> {
        let path = format!("/api/v1/chats/list/user/{}", user_id);
        server
            .mock_async(move |when, then| {
                when.method(GET).path(path);
                then.status(200).json_body(json!([]));
            })
            .await
    }

    #[tokio::test]
    async fn full_sync_then_incremental_tombstones() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;

        let mut users_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200)
                    .json_body(json!({"users": [user_json("ua", "Alice"), user_json("ub", "Bob")]}));
            })
            .await;
        let mut chats_a = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(200).json_body(json!([chat_json("c1", 1700000500)]));
            })
            .await;
        mock_empty_chats(&server, "ub").await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(200).json_body(json!({"chat": {
                    "models": ["gpt-4o"],
                    "messages": [
                        {"id": "m1", "role": "user", "content": "hi", "timestamp": 1700000100},
                        {"id": "m2", "parentId": "m1", "role": "assistant", "content": "hello", "timestamp": 1700000200},
                        {"id": "m3", "parentId": "m2", "role": "user", "content": "thanks", "timestamp": 1700000300}
                    ]
                }}));
            })
            .await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(outcome.sync_type, SyncType::Full);
        assert_eq!(outcome.users_synced, 2);
        assert_eq!(outcome.chats_synced, 1);
        assert_eq!(outcome.messages_synced, 3);

        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.user_count, 2);
        assert_eq!(status.chat_count, 1);
        assert_eq!(status.message_count, 3);
        assert!(status.last_sync.is_some());

        // 远端删除了用户 ub 和会话 c1
        users_mock.delete_async().await;
        chats_a.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        mock_empty_chats(&server, "ua").await;

        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(outcome.sync_type, SyncType::Incremental);

        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.user_count, 1);
        assert_eq!(status.chat_count, 0);
        // 墓碑只打在会话上，消息保留作历史
        assert_eq!(status.message_count, 3);
        assert_eq!(status.recent_runs.len(), 2);
        assert_eq!(status.recent_runs[0].sync_type, "incremental");
        assert_eq!(status.recent_runs[0].status, "success");
    }

    #[tokio::test]
    async fn incremental_skips_unchanged_chat_content() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(200).json_body(json!([chat_json("c1", 1700000500)]));
            })
            .await;
        let detail = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(200).json_body(json!({"chat": {
                    "models": [],
                    "messages": [{"id": "m1", "role": "user", "content": "hi", "timestamp": 1700000100}]
                }}));
            })
            .await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(detail.hits_async().await, 1);

        // updated_at 没动：增量通道只 touch，不再拉详情，也不计入会话计数
        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(outcome.sync_type, SyncType::Incremental);
        assert_eq!(outcome.chats_synced, 0);
        assert_eq!(outcome.messages_synced, 0);
        assert_eq!(detail.hits_async().await, 1);

        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.chat_count, 1);
        assert_eq!(status.message_count, 1);
    }

    #[tokio::test]
    async fn failed_detail_fetch_is_retried_next_channel() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(200).json_body(json!([chat_json("c1", 1700000500)]));
            })
            .await;
        let mut broken_detail = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(500);
            })
            .await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        // 详情拉不到：通道照常成功，摘要入库，但不计入刷新计数
        assert_eq!(outcome.chats_synced, 0);
        assert_eq!(outcome.messages_synced, 0);

        // 远端恢复；updated_at 没变，但 content_synced_at 为空会触发补拉
        broken_detail.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(200).json_body(json!({"chat": {
                    "models": ["gpt-4o"],
                    "messages": [{"id": "m1", "role": "user", "content": "hi", "timestamp": 1700000100}]
                }}));
            })
            .await;

        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(outcome.messages_synced, 1);
        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.message_count, 1);
    }

    #[tokio::test]
    async fn unreachable_users_endpoint_fails_run_without_sweep() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;

        let mut broken_users = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(500);
            })
            .await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        assert!(engine.sync_instance("fasgpt", false).await.is_err());

        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.recent_runs.len(), 1);
        assert_eq!(status.recent_runs[0].status, "failed");
        assert!(status.recent_runs[0].error_message.is_some());
        // 基线没有推进，下一次成功的通道仍是全量
        assert!(status.last_sync.is_none());

        broken_users.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        mock_empty_chats(&server, "ua").await;

        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(outcome.sync_type, SyncType::Full);
    }

    #[tokio::test]
    async fn forced_full_resync_still_sweeps() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        let mut chats = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(200).json_body(json!([chat_json("c1", 1700000500)]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(200).json_body(json!({"chat": {"models": [], "messages": []}}));
            })
            .await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        engine.sync_instance("fasgpt", false).await.unwrap();

        chats.delete_async().await;
        mock_empty_chats(&server, "ua").await;

        let outcome = engine.sync_instance("fasgpt", true).await.unwrap();
        assert_eq!(outcome.sync_type, SyncType::Full);
        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.chat_count, 0);
    }

    #[tokio::test]
    async fn failed_chat_listing_preserves_local_chats() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        let mut chats = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(200).json_body(json!([chat_json("c1", 1700000500)]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(200).json_body(json!({"chat": {
                    "models": [],
                    "messages": [{"id": "m1", "role": "user", "content": "hi", "timestamp": 1700000100}]
                }}));
            })
            .await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        engine.sync_instance("fasgpt", false).await.unwrap();

        // 第二轮该用户的会话列表拉不到：不能把他的会话当成已删除
        chats.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(500);
            })
            .await;

        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(outcome.sync_type, SyncType::Incremental);
        assert_eq!(outcome.chats_synced, 0);

        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.chat_count, 1);
        assert_eq!(status.message_count, 1);
        assert_eq!(status.recent_runs[0].status, "success");
    }

    #[tokio::test]
    async fn concurrent_channel_for_same_instance_is_rejected() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;
        // 第一个通道靠慢响应把锁握住
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200)
                    .delay(std::time::Duration::from_millis(800))
                    .json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        mock_empty_chats(&server, "ua").await;

        let other = MockServer::start_async().await;
        mock_catalog(&other).await;
        other
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ub", "Bob")]}));
            })
            .await;
        mock_empty_chats(&other, "ub").await;

        let mut config = test_config(&server, &dir);
        config.instances.push(InstanceConfig {
            name: "resgpt".to_string(),
            url: other.base_url(),
            api_key: "token".to_string(),
            is_active: true,
        });
        let engine = Arc::new(SyncEngine::new(config).await.unwrap());

        let background = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync_instance("fasgpt", false).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        // 同一实例的第二个通道被立即拒绝，不同实例照常进行
        assert!(engine.sync_instance("fasgpt", false).await.is_err());
        engine.sync_instance("resgpt", false).await.unwrap();

        let first = background.await.unwrap().unwrap();
        assert_eq!(first.users_synced, 1);

        // 被拒绝的通道没有在流水账里留下任何记录
        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.recent_runs.len(), 1);
        assert_eq!(status.recent_runs[0].status, "success");
    }

    #[tokio::test]
    async fn repeated_full_sync_is_idempotent() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ua");
                then.status(200).json_body(json!([chat_json("c1", 1700000500)]));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c1");
                then.status(200).json_body(json!({"chat": {
                    "models": ["gpt-4o"],
                    "messages": [
                        {"id": "m1", "role": "user", "content": "hi", "timestamp": 1700000100},
                        {"id": "m2", "parentId": "m1", "role": "assistant", "content": "hey", "timestamp": 1700000200}
                    ]
                }}));
            })
            .await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        let first = engine.sync_instance("fasgpt", false).await.unwrap();
        let second = engine.sync_instance("fasgpt", true).await.unwrap();

        assert_eq!(second.sync_type, SyncType::Full);
        assert_eq!(first.users_synced, second.users_synced);
        assert_eq!(first.chats_synced, second.chats_synced);
        assert_eq!(first.messages_synced, second.messages_synced);

        // 两轮全量后本地状态与一轮后完全一致
        let status = engine.status("fasgpt").await.unwrap();
        assert_eq!(status.user_count, 1);
        assert_eq!(status.chat_count, 1);
        assert_eq!(status.message_count, 2);
    }

    #[tokio::test]
    async fn new_user_bootstraps_all_chats() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        mock_catalog(&server).await;
        let mut users_mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200).json_body(json!({"users": [user_json("ua", "Alice")]}));
            })
            .await;
        mock_empty_chats(&server, "ua").await;

        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        engine.sync_instance("fasgpt", false).await.unwrap();

        // 增量通道里出现了新用户 ub，其会话的 updated_at 远早于基线
        users_mock.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/users/all");
                then.status(200)
                    .json_body(json!({"users": [user_json("ua", "Alice"), user_json("ub", "Bob")]}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/list/user/ub");
                then.status(200).json_body(json!([chat_json("c9", 1600000000)]));
            })
            .await;
        let detail = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/chats/all/c9");
                then.status(200).json_body(json!({"chat": {
                    "models": [],
                    "messages": [{"id": "m1", "role": "user", "content": "old", "timestamp": 1600000100}]
                }}));
            })
            .await;

        let outcome = engine.sync_instance("fasgpt", false).await.unwrap();
        assert_eq!(outcome.sync_type, SyncType::Incremental);
        // 新用户的会话即便时间戳很旧也要拉详情
        assert_eq!(detail.hits_async().await, 1);
        assert_eq!(outcome.messages_synced, 1);
    }

    #[tokio::test]
    async fn unknown_instance_is_rejected() {
        let server = MockServer::start_async().await;
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::new(test_config(&server, &dir)).await.unwrap();
        assert!(engine.sync_instance("nope", false).await.is_err());
        assert!(engine.status("nope").await.is_err());
    }
}
