//! 模型 / 知识库数据访问层（DAO）
//!
//! 两者基数都很小，每轮同步全量 upsert，原始 JSON 整体入库，
//! 报表侧需要什么字段自己从 JSON 里取。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

use crate::sync::entities::{LocalKnowledgeBase, LocalModel};
use crate::sync::types::{RemoteKnowledgeBase, RemoteModel};

/// 模型 / 知识库 DAO（基于 sqlx）
pub struct CatalogDao {
    db: Pool<Sqlite>,
}

impl CatalogDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化 models / knowledge_bases 表（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS models (
                id TEXT NOT NULL,
                instance_id INTEGER NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                info TEXT NOT NULL DEFAULT '{}',
                sync_datetime DATETIME NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id, instance_id)
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建模型表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_models_instance ON models(instance_id)")
            .execute(db)
            .await?;

        let sql = r#"
            CREATE TABLE IF NOT EXISTS knowledge_bases (
                id TEXT NOT NULL,
                instance_id INTEGER NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                data TEXT NOT NULL DEFAULT '{}',
                created_at DATETIME,
                updated_at DATETIME,
                sync_datetime DATETIME NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id, instance_id)
            )
        "#;
        sqlx::query(sql)
            .execute(db)
            .await
            .context("创建知识库表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kb_instance ON knowledge_bases(instance_id)")
            .execute(db)
            .await?;
        Ok(())
    }

    /// 插入或更新模型（幂等）
    pub async fn upsert_model(
        &self,
        model: &RemoteModel,
        instance_id: i64,
        sync_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO models (id, instance_id, name, info, sync_datetime, is_deleted)
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(id, instance_id) DO UPDATE SET
                name = excluded.name,
                info = excluded.info,
                sync_datetime = excluded.sync_datetime,
                is_deleted = 0
            "#,
        )
        .bind(&model.id)
        .bind(instance_id)
        .bind(&model.name)
        .bind(model.raw.to_string())
        .bind(sync_time)
        .execute(&self.db)
        .await
        .context(format!("写入模型 {} 失败", model.id))?;
        Ok(())
    }

    /// 插入或更新知识库（幂等）
    pub async fn upsert_knowledge_base(
        &self,
        kb: &RemoteKnowledgeBase,
        instance_id: i64,
        sync_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (
                id, instance_id, name, description, data, created_at,
                updated_at, sync_datetime, is_deleted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(id, instance_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                data = excluded.data,
                updated_at = excluded.updated_at,
                sync_datetime = excluded.sync_datetime,
                is_deleted = 0
            "#,
        )
        .bind(&kb.id)
        .bind(instance_id)
        .bind(&kb.name)
        .bind(&kb.description)
        .bind(kb.raw.to_string())
        .bind(kb.created_at_utc())
        .bind(kb.updated_at_utc())
        .bind(sync_time)
        .execute(&self.db)
        .await
        .context(format!("写入知识库 {} 失败", kb.id))?;
        Ok(())
    }

    /// 实例下的全部模型
    pub async fn models_for_instance(&self, instance_id: i64) -> Result<Vec<LocalModel>> {
        let rows = sqlx::query("SELECT * FROM models WHERE instance_id = ? ORDER BY id")
            .bind(instance_id)
            .fetch_all(&self.db)
            .await?;
        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            models.push(LocalModel {
                id: row.try_get("id")?,
                instance_id: row.try_get("instance_id")?,
                name: row.try_get("name")?,
                info: row.try_get("info")?,
                sync_datetime: row.try_get("sync_datetime")?,
                is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
            });
        }
        Ok(models)
    }

    /// 实例下的全部知识库
    pub async fn knowledge_bases_for_instance(
        &self,
        instance_id: i64,
    ) -> Result<Vec<LocalKnowledgeBase>> {
        let rows = sqlx::query("SELECT * FROM knowledge_bases WHERE instance_id = ? ORDER BY id")
            .bind(instance_id)
            .fetch_all(&self.db)
            .await?;
        let mut kbs = Vec::with_capacity(rows.len());
        for row in rows {
            kbs.push(LocalKnowledgeBase {
                id: row.try_get("id")?,
                instance_id: row.try_get("instance_id")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                data: row.try_get("data")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
                sync_datetime: row.try_get("sync_datetime")?,
                is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
            });
        }
        Ok(kbs)
    }
}
