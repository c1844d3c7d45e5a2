//! 用户数据访问层（DAO）
//!
//! users 表按 (id, instance_id) 复合键存储；远端消失的用户打软删除
//! 墓碑（is_deleted = 1），行本身永不物理删除。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use tracing::info;

use crate::sync::entities::LocalUser;
use crate::sync::types::RemoteUser;

/// 用户 DAO（基于 sqlx）
pub struct UserDao {
    db: Pool<Sqlite>,
}

impl UserDao {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 初始化 users 表（静态方法）
    pub async fn init_db_with_connection(db: &Pool<Sqlite>) -> Result<()> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT NOT NULL,
                instance_id INTEGER NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT '',
                profile_image_url TEXT NOT NULL DEFAULT '',
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
            .context("创建用户表失败")?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_instance ON users(instance_id)")
            .execute(db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)")
            .execute(db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_deleted ON users(is_deleted)")
            .execute(db)
            .await?;
        Ok(())
    }

    /// 插入或更新用户（幂等）
    ///
    /// 冲突更新不触碰 created_at：首次入库时记下的创建时间不会被
    /// 后续通道覆盖或置空。重新出现的用户自动摘除墓碑。
    pub async fn upsert_user(
        &self,
        user: &RemoteUser,
        instance_id: i64,
        sync_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                id, instance_id, name, email, role, profile_image_url,
                created_at, updated_at, sync_datetime, is_deleted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(id, instance_id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                role = excluded.role,
                profile_image_url = excluded.profile_image_url,
                updated_at = excluded.updated_at,
                sync_datetime = excluded.sync_datetime,
                is_deleted = 0
            "#,
        )
        .bind(&user.id)
        .bind(instance_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.role)
        .bind(&user.profile_image_url)
        .bind(user.created_at_utc())
        .bind(user.updated_at_utc())
        .bind(sync_time)
        .execute(&self.db)
        .await
        .context(format!("写入用户 {} 失败", user.id))?;
        Ok(())
    }

    /// 实例下所有未删除用户的 ID 集合（增量同步的本地基线）
    pub async fn active_user_ids(&self, instance_id: i64) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT id FROM users WHERE instance_id = ? AND is_deleted = 0")
            .bind(instance_id)
            .fetch_all(&self.db)
            .await?;
        let mut ids = HashSet::with_capacity(rows.len());
        for row in rows {
            ids.insert(row.try_get("id")?);
        }
        Ok(ids)
    }

    /// 批量打用户墓碑
    pub async fn mark_users_deleted(&self, user_ids: &[String], instance_id: i64) -> Result<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; user_ids.len()].join(",");
        let sql = format!(
            "UPDATE users SET is_deleted = 1 WHERE id IN ({}) AND instance_id = ?",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in user_ids {
            query = query.bind(id);
        }
        let result = query
            .bind(instance_id)
            .execute(&self.db)
            .await
            .context("标记用户删除失败")?;
        info!(
            "[UserDAO] 实例 {} 标记 {} 个用户为已删除",
            instance_id,
            result.rows_affected()
        );
        Ok(result.rows_affected())
    }

    /// 按复合键查询用户
    pub async fn get_user(&self, user_id: &str, instance_id: i64) -> Result<Option<LocalUser>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ? AND instance_id = ?")
            .bind(user_id)
            .bind(instance_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(match row {
            Some(row) => Some(LocalUser {
                id: row.try_get("id")?,
                instance_id: row.try_get("instance_id")?,
                name: row.try_get("name")?,
                email: row.try_get("email")?,
                role: row.try_get("role")?,
                profile_image_url: row.try_get("profile_image_url")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
                sync_datetime: row.try_get("sync_datetime")?,
                is_deleted: row.try_get::<i64, _>("is_deleted")? != 0,
            }),
            None => None,
        })
    }

    /// 实例下未删除用户数（status 视图）
    pub async fn count_active(&self, instance_id: i64) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS cnt FROM users WHERE instance_id = ? AND is_deleted = 0")
                .bind(instance_id)
                .fetch_one(&self.db)
                .await?;
        Ok(row.try_get("cnt")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::db::create_sqlite_pool_with_schema;
    use tempfile::TempDir;

    fn remote_user(id: &str, name: &str) -> RemoteUser {
        RemoteUser {
            id: id.to_string(),
            name: name.to_string(),
            email: format!("{}@example.com", id),
            role: "user".to_string(),
            profile_image_url: String::new(),
            created_at: 1700000000,
            updated_at: 1700000000,
        }
    }

    async fn test_pool(dir: &TempDir) -> Pool<Sqlite> {
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        create_sqlite_pool_with_schema(&url).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_preserves_created_at_and_clears_tombstone() {
        let dir = TempDir::new().unwrap();
        let dao = UserDao::new(test_pool(&dir).await);
        let t1 = Utc::now();

        let user = remote_user("u1", "Alice");
        dao.upsert_user(&user, 1, t1).await.unwrap();
        let stored = dao.get_user("u1", 1).await.unwrap().unwrap();
        let original_created = stored.created_at.unwrap();

        dao.mark_users_deleted(&["u1".to_string()], 1).await.unwrap();
        assert!(dao.get_user("u1", 1).await.unwrap().unwrap().is_deleted);

        // 再次出现：资料更新、墓碑摘除、created_at 不变
        let mut user = remote_user("u1", "Alice Chen");
        user.created_at = 0;
        let t2 = Utc::now();
        dao.upsert_user(&user, 1, t2).await.unwrap();

        let stored = dao.get_user("u1", 1).await.unwrap().unwrap();
        assert!(!stored.is_deleted);
        assert_eq!(stored.name, "Alice Chen");
        assert_eq!(stored.created_at.unwrap(), original_created);
    }

    #[tokio::test]
    async fn active_ids_scoped_by_instance() {
        let dir = TempDir::new().unwrap();
        let dao = UserDao::new(test_pool(&dir).await);
        let t = Utc::now();

        // 同一个远端 ID 出现在两个实例中，不应互相覆盖
        dao.upsert_user(&remote_user("u1", "A"), 1, t).await.unwrap();
        dao.upsert_user(&remote_user("u1", "B"), 2, t).await.unwrap();
        dao.upsert_user(&remote_user("u2", "C"), 1, t).await.unwrap();

        let ids = dao.active_user_ids(1).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(dao.active_user_ids(2).await.unwrap().len(), 1);
        assert_eq!(dao.count_active(1).await.unwrap(), 2);

        dao.mark_users_deleted(&["u2".to_string()], 1).await.unwrap();
        assert_eq!(dao.active_user_ids(1).await.unwrap().len(), 1);
        assert!(ids.contains("u2"));
    }
}
