// ==========================================
// 数据迁移导入引擎 - API 层
// ==========================================
// 职责: 对外请求 / 响应结构与稳定错误码
// ==========================================

pub mod error;
pub mod migration_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use migration_api::{
    ExecuteResponse, JobStatusResponse, LogListRequest, MappingsResponse, MigrationApi,
    PageRequest, ResolveConflictRequest, UploadRequest,
};
