//! 会话数据访问层（DAO）
//!
//! chats 表 + chat_models 关联表。会话内容（消息、模型关联）的刷新
//! 走整体替换：在一个事务里删旧插新，读报表的一方要么看到完整的
//! 旧集合，要么看到完整的新集合。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info};

use crate::sync::entities::LocalChat;
use crate::sync::types::{RemoteChatSummary, RemoteMessage};

/// 会话 DAO（基于 sqlx）
pub struct ChatDao {
    db: Pool<Sqlite>,
}

impl ChatDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化 chats / chat_models 表（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT NOT NULL,
                instance_id INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                created_at DATETIME,
                updated_at DATETIME,
                sync_datetime DATETIME NOT NULL,
                content_synced_at DATETIME,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                archived INTEGER NOT NULL DEFAULT 0,
                pinned INTEGER NOT NULL DEFAULT 0,
                folder_id TEXT,
                share_id TEXT,
                PRIMARY KEY (id, instance_id)
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建会话表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, instance_id)")
            .execute(db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_instance ON chats(instance_id)")
            .execute(db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_deleted ON chats(is_deleted)")
            .execute(db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_sync ON chats(sync_datetime)")
            .execute(db)
            .await?;

        let sql = r#"
            CREATE TABLE IF NOT EXISTS chat_models (
                chat_id TEXT NOT NULL,
                instance_id INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                sync_datetime DATETIME NOT NULL,
                PRIMARY KEY (chat_id, instance_id, model_id)
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建会话模型关联表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_models_model ON chat_models(model_id)")
            .execute(db)
            .await?;
        Ok(())
    }

    /// 插入或更新会话摘要（幂等）
    ///
    /// 冲突更新不触碰 created_at 与 content_synced_at，也不改 user_id；
    /// 重新出现的会话自动摘除墓碑。
    pub async fn upsert_chat(
        &self,
        chat: &RemoteChatSummary,
        instance_id: i64,
        user_id: &str,
        sync_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chats (
                id, instance_id, user_id, title, created_at, updated_at,
                sync_datetime, archived, pinned, folder_id, share_id, is_deleted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(id, instance_id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at,
                sync_datetime = excluded.sync_datetime,
                archived = excluded.archived,
                pinned = excluded.pinned,
                folder_id = excluded.folder_id,
                share_id = excluded.share_id,
                is_deleted = 0
            "#,
        )
        .bind(&chat.id)
        .bind(instance_id)
        .bind(user_id)
        .bind(&chat.title)
        .bind(chat.created_at_utc())
        .bind(chat.updated_at_utc())
        .bind(sync_time)
        .bind(if chat.archived { 1 } else { 0 })
        .bind(if chat.pinned { 1 } else { 0 })
        .bind(&chat.folder_id)
        .bind(&chat.share_id)
        .execute(&self.db)
        .await
        .context(format!("写入会话 {} 失败", chat.id))?;
        Ok(())
    }

    /// 按复合键查询会话
    pub async fn get_chat(&self, chat_id: &str, instance_id: i64) -> Result<Option<LocalChat>> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ? AND instance_id = ?")
            .bind(chat_id)
            .bind(instance_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(match row {
            Some(row) => Some(Self::map_chat(&row)?),
            None => None,
        })
    }

    fn map_chat(row: &sqlx::sqlite::SqliteRow) -> Result<LocalChat> {
        Ok(LocalChat {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            sync_datetime: row.try_get("sync_datetime")?,
            content_synced_at: row.try_get("content_synced_at")?,
            is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
            archived: row.try_get::<i64, _>("archived")? != 0,
            pinned: row.try_get::<i64, _>("pinned")? != 0,
            folder_id: row.try_get("folder_id")?,
            share_id: row.try_get("share_id")?,
        })
    }

    /// 只推进会话的 sync_datetime，不改写内容（增量同步的廉价路径）
    pub async fn touch_chat(
        &self,
        chat_id: &str,
        instance_id: i64,
        sync_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE chats SET sync_datetime = ? WHERE id = ? AND instance_id = ?")
            .bind(sync_time)
            .bind(chat_id)
            .bind(instance_id)
            .execute(&self.db)
            .await
            .context(format!("touch 会话 {} 失败", chat_id))?;
        Ok(())
    }

    /// 推进某用户名下所有未删除会话的 sync_datetime
    ///
    /// 用户的会话列表本轮拉取失败时调用：把他名下的会话从本轮 sweep
    /// 的打击范围里摘出来，留到下一轮重新判定。内容时间戳不动。
    pub async fn touch_chats_for_user(
        &self,
        user_id: &str,
        instance_id: i64,
        sync_time: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE chats
            SET sync_datetime = ?
            WHERE user_id = ? AND instance_id = ? AND is_deleted = 0
            "#,
        )
        .bind(sync_time)
        .bind(user_id)
        .bind(instance_id)
        .execute(&self.db)
        .await
        .context(format!("touch 用户 {} 的会话失败", user_id))?;
        Ok(result.rows_affected())
    }

    /// 把本轮没确认到的会话打墓碑（staleness sweep）
    ///
    /// 只能在一个通道把该实例要访问的用户/会话全部走完之后调用，
    /// 提前调用会把还没轮到的会话误判为已删除。
    pub async fn mark_stale_chats_deleted(
        &self,
        instance_id: i64,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE chats
            SET is_deleted = 1
            WHERE instance_id = ? AND sync_datetime < ? AND is_deleted = 0
            "#,
        )
        .bind(instance_id)
        .bind(cutoff)
        .execute(&self.db)
        .await
        .context("标记过期会话失败")?;
        if result.rows_affected() > 0 {
            info!(
                "[ChatDAO] 实例 {} 标记 {} 个会话为已删除",
                instance_id,
                result.rows_affected()
            );
        }
        Ok(result.rows_affected())
    }

    /// 整体替换会话内容：模型关联 + 消息 + 附件，单事务删旧插新
    ///
    /// 成功后把 content_synced_at / sync_datetime 一并推进到本轮时间。
    /// 返回写入的消息数。
    pub async fn replace_chat_content(
        &self,
        chat_id: &str,
        instance_id: i64,
        models: &[String],
        messages: &[RemoteMessage],
        sync_time: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.db.begin().await.context("开启会话内容事务失败")?;

        sqlx::query("DELETE FROM chat_models WHERE chat_id = ? AND instance_id = ?")
            .bind(chat_id)
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;
        for model_id in models {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO chat_models (chat_id, instance_id, model_id, sync_datetime)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(chat_id)
            .bind(instance_id)
            .bind(model_id)
            .bind(sync_time)
            .execute(&mut *tx)
            .await?;
        }

        // 附件按 message_id 挂靠，先于消息删除
        sqlx::query(
            r#"
            DELETE FROM files
            WHERE instance_id = ?
              AND message_id IN (SELECT id FROM messages WHERE chat_id = ? AND instance_id = ?)
            "#,
        )
        .bind(instance_id)
        .bind(chat_id)
        .bind(instance_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM messages WHERE chat_id = ? AND instance_id = ?")
            .bind(chat_id)
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0u64;
        for message in messages {
            let content_length = message.content.chars().count() as i64;
            let has_files = !message.files.is_empty();
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO messages (
                    id, chat_id, instance_id, parent_id, role, content,
                    content_length, created_at, sync_datetime, has_files
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&message.id)
            .bind(chat_id)
            .bind(instance_id)
            .bind(&message.parent_id)
            .bind(&message.role)
            .bind(&message.content)
            .bind(content_length)
            .bind(message.created_at_utc())
            .bind(sync_time)
            .bind(if has_files { 1 } else { 0 })
            .execute(&mut *tx)
            .await?;
            inserted += 1;

            for file_entry in &message.files {
                let Some(file_info) = &file_entry.file else {
                    continue;
                };
                if file_info.id.is_empty() {
                    continue;
                }
                sqlx::query(
                    r#"
                    INSERT OR REPLACE INTO files (
                        id, message_id, instance_id, filename, file_type,
                        size_bytes, hash, sync_datetime
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&file_info.id)
                .bind(&message.id)
                .bind(instance_id)
                .bind(&file_info.filename)
                .bind(&file_entry.file_type)
                .bind(file_info.size)
                .bind(&file_info.hash)
                .bind(sync_time)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            UPDATE chats SET content_synced_at = ?, sync_datetime = ?
            WHERE id = ? AND instance_id = ?
            "#,
        )
        .bind(sync_time)
        .bind(sync_time)
        .bind(chat_id)
        .bind(instance_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.context("提交会话内容事务失败")?;
        debug!(
            "[ChatDAO] 会话 {} 内容已替换: {} 个模型关联, {} 条消息",
            chat_id,
            models.len(),
            inserted
        );
        Ok(inserted)
    }

    /// 会话使用的模型 ID 列表
    pub async fn chat_model_ids(&self, chat_id: &str, instance_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT model_id FROM chat_models WHERE chat_id = ? AND instance_id = ? ORDER BY model_id",
        )
        .bind(chat_id)
        .bind(instance_id)
        .fetch_all(&self.db)
        .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("model_id")?);
        }
        Ok(ids)
    }

    /// 实例下未删除会话数（status 视图）
    pub async fn count_active(&self, instance_id: i64) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS cnt FROM chats WHERE instance_id = ? AND is_deleted = 0")
                .bind(instance_id)
                .fetch_one(&self.db)
                .await?;
        Ok(row.try_get("cnt")?)
    }
}
