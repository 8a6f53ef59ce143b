// ==========================================
// 数据迁移导入引擎 - 配置层
// ==========================================
// 职责: 引擎参数默认值 + config_kv 覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod engine_config;

pub use config_manager::{config_keys, ConfigManager};
pub use engine_config::EngineConfig;
