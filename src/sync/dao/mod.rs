//! 本地镜像存储（Local Store）
//!
//! 每个实体族一个 DAO，各自持有连接池并负责建表。
//! 所有 upsert 都以 (id, instance_id) 复合键幂等。

pub mod catalog;
pub mod chat;
pub mod instance;
pub mod message;
pub mod run;
pub mod user;

pub use catalog::CatalogDao;
pub use chat::ChatDao;
pub use instance::InstanceDao;
pub use message::MessageDao;
pub use run::SyncRunDao;
pub use user::UserDao;
