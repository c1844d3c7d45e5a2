//! SQLite 数据库工具：统一创建连接池并初始化表结构
//!
//! 各实体的表由对应 DAO 的 `init_db_with_connection` 创建，
//! 这里只负责把它们串起来。

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use crate::sync::dao::{
    catalog::CatalogDao, chat::ChatDao, instance::InstanceDao, message::MessageDao,
    run::SyncRunDao, user::UserDao,
};

/// 创建 SQLite 连接池
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;
    Ok(pool)
}

/// 初始化全部表结构（幂等，CREATE TABLE IF NOT EXISTS）
pub async fn init_schema(db: &Pool<Sqlite>) -> Result<()> {
    InstanceDao::init_db_with_connection(db).await?;
    SyncRunDao::init_db_with_connection(db).await?;
    UserDao::init_db_with_connection(db).await?;
    ChatDao::init_db_with_connection(db).await?;
    MessageDao::init_db_with_connection(db).await?;
    CatalogDao::init_db_with_connection(db).await?;
    Ok(())
}

/// 创建连接池并初始化表结构
pub async fn create_sqlite_pool_with_schema(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = create_sqlite_pool(db_url).await?;
    init_schema(&pool).await?;
    Ok(pool)
}
