//! 消息数据访问层（DAO）
//!
//! messages / files 表的建表与读查询。消息的写入走
//! `ChatDao::replace_chat_content` 的事务整体替换，生命周期跟随
//! 所属会话的内容刷新，不参与 staleness sweep。

use anyhow::{Context, Result};
use sqlx::{Pool, Row, Sqlite};

use crate::sync::entities::LocalMessage;

/// 消息 DAO（基于 sqlx）
pub struct MessageDao {
    db: Pool<Sqlite>,
}

impl MessageDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化 messages / files 表（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                instance_id INTEGER NOT NULL,
                parent_id TEXT,
                role TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL DEFAULT '',
                content_length INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME,
                sync_datetime DATETIME NOT NULL,
                has_files INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id, instance_id)
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建消息表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, instance_id)")
            .execute(db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_role ON messages(role)")
            .execute(db)
            .await?;

        let sql = r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                instance_id INTEGER NOT NULL,
                filename TEXT NOT NULL DEFAULT '',
                file_type TEXT NOT NULL DEFAULT '',
                size_bytes INTEGER NOT NULL DEFAULT 0,
                hash TEXT NOT NULL DEFAULT '',
                sync_datetime DATETIME NOT NULL,
                PRIMARY KEY (id, instance_id)
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建附件表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_message ON files(message_id, instance_id)")
            .execute(db)
            .await?;
        Ok(())
    }

    /// 会话下的全部消息（按创建时间排序）
    pub async fn messages_for_chat(
        &self,
        chat_id: &str,
        instance_id: i64,
    ) -> Result<Vec<LocalMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM messages
            WHERE chat_id = ? AND instance_id = ?
            ORDER BY created_at, id
            "#,
        )
        .bind(chat_id)
        .bind(instance_id)
        .fetch_all(&self.db)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(LocalMessage {
                id: row.try_get("id")?,
                chat_id: row.try_get("chat_id")?,
                instance_id: row.try_get("instance_id")?,
                parent_id: row.try_get("parent_id")?,
                role: row.try_get("role")?,
                content: row.try_get("content")?,
                content_length: row.try_get("content_length")?,
                created_at: row.try_get("created_at")?,
                sync_datetime: row.try_get("sync_datetime")?,
                has_files: row.try_get::<i64, _>("has_files")? != 0,
            });
        }
        Ok(messages)
    }

    /// 会话下的消息数
    pub async fn count_for_chat(&self, chat_id: &str, instance_id: i64) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM messages WHERE chat_id = ? AND instance_id = ?",
        )
        .bind(chat_id)
        .bind(instance_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row.try_get("cnt")?)
    }

    /// 实例下的消息总数（status 视图）
    pub async fn count_for_instance(&self, instance_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM messages WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_one(&self.db)
            .await?;
        Ok(row.try_get("cnt")?)
    }

    /// 实例下的附件数
    pub async fn file_count_for_instance(&self, instance_id: i64) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM files WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_one(&self.db)
            .await?;
        Ok(row.try_get("cnt")?)
    }
}
