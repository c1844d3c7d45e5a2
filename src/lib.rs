pub mod sync;

// 重新导出常用类型和函数，方便外部使用
pub use sync::{
    config::{InstanceConfig, SyncConfig, SyncSettings},
    engine::SyncEngine,
    entities::{InstanceStatus, SyncOutcome, SyncType},
    listener::SyncListener,
    run_scheduler,
};
