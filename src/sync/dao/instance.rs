//! 实例数据访问层（DAO）
//!
//! instances 表记录每个被镜像的远端实例，以及它最近一次
//! 成功同步的时间（全量/增量判定的基线）。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use tracing::info;

use crate::sync::entities::LocalInstance;

/// 实例 DAO（基于 sqlx）
pub struct InstanceDao {
    db: Pool<Sqlite>,
}

impl InstanceDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化 instances 表（静态方法，供统一建表入口调用）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS instances (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_sync_at DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建实例表失败")?;
        Ok(())
    }

    /// 插入或更新实例，返回实例 ID
    pub async fn upsert_instance(
        &self,
        name: &str,
        url: &str,
        api_key: &str,
        is_active: bool,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO instances (name, url, api_key, is_active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                url = excluded.url,
                api_key = excluded.api_key,
                is_active = excluded.is_active
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(api_key)
        .bind(if is_active { 1 } else { 0 })
        .execute(&self.db)
        .await
        .context("写入实例失败")?;

        let row = sqlx::query("SELECT id FROM instances WHERE name = ?")
            .bind(name)
            .fetch_one(&self.db)
            .await
            .context("查询实例 ID 失败")?;
        Ok(row.try_get("id")?)
    }

    /// 按名称查询实例 ID
    pub async fn get_instance_id(&self, name: &str) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT id FROM instances WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.db)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("id")?),
            None => None,
        })
    }

    /// 查询实例信息
    pub async fn get_instance(&self, name: &str) -> Result<Option<LocalInstance>> {
        let row = sqlx::query(
            "SELECT id, name, url, is_active, last_sync_at FROM instances WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await?;
        Ok(match row {
            Some(row) => Some(LocalInstance {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                url: row.try_get("url")?,
                is_active: row.try_get::<i64, _>("is_active")? != 0,
                last_sync_at: row.try_get("last_sync_at")?,
            }),
            None => None,
        })
    }

    /// 同步成功后更新实例的 last_sync_at（以通道开始时间为准）
    pub async fn update_last_sync(&self, instance_id: i64, sync_time: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE instances SET last_sync_at = ? WHERE id = ?")
            .bind(sync_time)
            .bind(instance_id)
            .execute(&self.db)
            .await
            .context("更新实例 last_sync_at 失败")?;
        info!("[InstanceDAO] 实例 {} 的 last_sync_at 已更新", instance_id);
        Ok(())
    }

    /// 最近一次成功同步的时间；None 表示从未同步过（触发全量）
    pub async fn last_sync_time(&self, instance_id: i64) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT last_sync_at FROM instances WHERE id = ?")
            .bind(instance_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(match row {
            Some(row) => row.try_get("last_sync_at")?,
            None => None,
        })
    }
}
