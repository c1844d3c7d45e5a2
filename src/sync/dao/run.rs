//! 同步流水账（Run Ledger）数据访问层
//!
//! sync_runs 表只记同步通道的生命周期元数据（开始/结束/状态/计数），
//! 不存任何实体内容。finalize 过的行不再改写。

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

use crate::sync::entities::{SyncRun, SyncType};

/// 同步流水账 DAO（基于 sqlx）
pub struct SyncRunDao {
    db: Pool<Sqlite>,
}

impl SyncRunDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化 sync_runs 表（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS sync_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_name TEXT NOT NULL,
                sync_type TEXT NOT NULL,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                users_synced INTEGER NOT NULL DEFAULT 0,
                chats_synced INTEGER NOT NULL DEFAULT 0,
                messages_synced INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                error_message TEXT
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建同步流水账表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_runs_instance ON sync_runs(instance_name)")
            .execute(db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at)")
            .execute(db)
            .await?;
        Ok(())
    }

    /// 通道开始时落一条 in_progress 记录，返回 run ID
    pub async fn start_run(&self, instance_name: &str, sync_type: SyncType) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_runs (instance_name, sync_type, started_at, status)
            VALUES (?, ?, ?, 'in_progress')
            "#,
        )
        .bind(instance_name)
        .bind(sync_type.as_str())
        .bind(Utc::now())
        .execute(&self.db)
        .await
        .context("记录同步开始失败")?;
        Ok(result.last_insert_rowid())
    }

    /// 通道成功：落计数与完成时间
    pub async fn complete_run(
        &self,
        run_id: i64,
        users_synced: i64,
        chats_synced: i64,
        messages_synced: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'success',
                completed_at = ?,
                users_synced = ?,
                chats_synced = ?,
                messages_synced = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(users_synced)
        .bind(chats_synced)
        .bind(messages_synced)
        .bind(run_id)
        .execute(&self.db)
        .await
        .context("记录同步成功失败")?;
        Ok(())
    }

    /// 通道失败：落错误信息
    pub async fn fail_run(&self, run_id: i64, error_message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_runs
            SET status = 'failed',
                completed_at = ?,
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(error_message)
        .bind(run_id)
        .execute(&self.db)
        .await
        .context("记录同步失败失败")?;
        Ok(())
    }

    /// 按 ID 查询一条流水
    pub async fn get_run(&self, run_id: i64) -> Result<Option<SyncRun>> {
        let row = sqlx::query("SELECT * FROM sync_runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(match row {
            Some(row) => Some(Self::map_run(&row)?),
            None => None,
        })
    }

    /// 最近的流水记录（全部实例，时间倒序）
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query("SELECT * FROM sync_runs ORDER BY started_at DESC, id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.db)
            .await?;
        rows.iter().map(Self::map_run).collect()
    }

    /// 某实例最近的流水记录
    pub async fn recent_runs_for_instance(
        &self,
        instance_name: &str,
        limit: i64,
    ) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sync_runs
            WHERE instance_name = ?
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(instance_name)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(Self::map_run).collect()
    }

    fn map_run(row: &sqlx::sqlite::SqliteRow) -> Result<SyncRun> {
        Ok(SyncRun {
            id: row.try_get("id")?,
            instance_name: row.try_get("instance_name")?,
            sync_type: row.try_get("sync_type")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            users_synced: row.try_get("users_synced")?,
            chats_synced: row.try_get("chats_synced")?,
            messages_synced: row.try_get("messages_synced")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
        })
    }
}
