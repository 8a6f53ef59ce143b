// ==========================================
// 数据迁移导入引擎 - 核心库
// ==========================================
// 流程: 上传 -> 映射 -> 校验 -> 执行 -> (回滚)
// 技术栈: Rust + SQLite + tokio
// 隔离: 所有数据按 organization_id 划分
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 映射 / 校验 / 执行 / 回滚
pub mod engine;

// 导入层 - 源文件解析
pub mod importer;

// 配置层 - 引擎参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 对外接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ConflictPolicy, ConflictType, ExecutionMode, JobStatus, LogLevel, LogOperation, Resolution,
    Severity, SourceFormat, WriteOperation,
};

// 领域实体
pub use domain::{
    ConflictRecord, FieldMapping, MigrationJob, MigrationLogEntry, NewJob, RecordRef,
    RollbackOptions, RollbackReport, SourceSchema, TargetDataType, TargetEntity,
};

// 引擎
pub use engine::{
    ExecutionHandle, JobOrchestrator, JobScheduler, MigrationError, MigrationResult,
    RollbackManager,
};

// API
pub use api::{ApiError, ApiResult, ErrorResponse, MigrationApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "数据迁移导入引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
        assert!(!APP_NAME.is_empty());
    }
}
