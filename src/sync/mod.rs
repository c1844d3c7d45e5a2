pub mod api;
pub mod config;
pub mod dao;
pub mod db;
pub mod engine;
pub mod entities;
pub mod listener;
pub mod scheduler;
pub mod types;

// 重新导出同步引擎相关类型和函数
pub use config::{InstanceConfig, SyncConfig, SyncSettings};
pub use engine::SyncEngine;
pub use entities::{InstanceStatus, SyncOutcome, SyncRun, SyncType};
pub use listener::{EmptySyncListener, SyncListener};
pub use scheduler::run_scheduler;
