// ==========================================
// 数据迁移导入引擎 - API层错误类型
// ==========================================
// 职责: 将引擎错误转换为带稳定错误码的对外错误
// 对外形态: ErrorResponse { code, message, details }
// ==========================================

use crate::engine::error::MigrationError;
use crate::repository::error::RepositoryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API层错误类型
/// 每个错误都携带稳定的 SCREAMING_SNAKE 错误码
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 请求错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    // ==========================================
    // 导入 / 映射错误（作业状态不变，可重试）
    // ==========================================
    #[error("文件导入失败: {message}")]
    ImportError { code: &'static str, message: String },

    #[error("映射配置错误: {0}")]
    ConfigurationError(String),

    #[error("映射已失效，源字段不存在: {}", missing.join(", "))]
    MappingStale { missing: Vec<String> },

    #[error("数据验证失败: {invalid_count} 条记录无效")]
    ValidationError { invalid_count: usize },

    #[error("存在未处理的重复匹配: {}", record_refs.join(", "))]
    ConflictRequiresResolution { record_refs: Vec<String> },

    // ==========================================
    // 执行 / 回滚错误
    // ==========================================
    #[error("作业执行中止: {message}")]
    ExecutionAborted { code: &'static str, message: String },

    #[error("并发配额已满: {0}")]
    QuotaExceeded(String),

    #[error("回滚被阻断: {} 条写入已被后续作业依赖", blocked.len())]
    RollbackBlocked { blocked: Vec<String> },

    #[error("不满足回滚条件: {0}")]
    RollbackNotEligible(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ApiError {
    /// 稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_REQUEST",
            ApiError::NotFound(_) => "JOB_NOT_FOUND",
            ApiError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            ApiError::ImportError { code, .. } => *code,
            ApiError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            ApiError::MappingStale { .. } => "MAPPING_STALE",
            ApiError::ValidationError { .. } => "VALIDATION_FAILED",
            ApiError::ConflictRequiresResolution { .. } => "CONFLICT_REQUIRES_RESOLUTION",
            ApiError::ExecutionAborted { code, .. } => *code,
            ApiError::QuotaExceeded(_) => "CONCURRENCY_QUOTA_EXCEEDED",
            ApiError::RollbackBlocked { .. } => "CONFLICT_DURING_ROLLBACK",
            ApiError::RollbackNotEligible(_) => "ROLLBACK_NOT_ELIGIBLE",
            ApiError::DatabaseError(_) => "REPOSITORY_ERROR",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// 附加明细（涉及的记录 / 字段）
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::MappingStale { missing } => Some(serde_json::json!({ "missing": missing })),
            ApiError::ConflictRequiresResolution { record_refs } => {
                Some(serde_json::json!({ "record_refs": record_refs }))
            }
            ApiError::RollbackBlocked { blocked } => Some(serde_json::json!({ "blocked": blocked })),
            ApiError::ValidationError { invalid_count } => {
                Some(serde_json::json!({ "invalid_count": invalid_count }))
            }
            _ => None,
        }
    }
}

// ==========================================
// 从 MigrationError 转换
// ==========================================
impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        let code = err.code();
        match err {
            MigrationError::Format(e) => ApiError::ImportError {
                code,
                message: e.to_string(),
            },
            MigrationError::Configuration(msg) => ApiError::ConfigurationError(msg),
            MigrationError::MappingStale { missing } => ApiError::MappingStale { missing },
            MigrationError::ValidationFailed { invalid_count } => {
                ApiError::ValidationError { invalid_count }
            }
            MigrationError::ConflictRequiresResolution { record_refs } => {
                ApiError::ConflictRequiresResolution { record_refs }
            }
            e @ (MigrationError::FatalExecution(_) | MigrationError::Timeout { .. }) => {
                ApiError::ExecutionAborted {
                    code,
                    message: e.to_string(),
                }
            }
            e @ MigrationError::ConcurrencyQuotaExceeded { .. } => {
                ApiError::QuotaExceeded(e.to_string())
            }
            MigrationError::ConflictDuringRollback { blocked } => ApiError::RollbackBlocked { blocked },
            MigrationError::RollbackNotEligible(msg) => ApiError::RollbackNotEligible(msg),
            MigrationError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            MigrationError::JobNotFound(id) => ApiError::NotFound(format!("作业(id={})不存在", id)),
            MigrationError::InvalidRequest(msg) => ApiError::InvalidInput(msg),
            MigrationError::Repository(e) => ApiError::from(e),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::InvalidStateTransition { from, to } => {
                ApiError::InvalidStateTransition { from, to }
            }
            e if e.is_fatal() => ApiError::ExecutionAborted {
                code: "FATAL_EXECUTION",
                message: e.to_string(),
            },
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

// ==========================================
// ErrorResponse - 对外错误结构
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: err.details(),
        }
    }
}

impl From<ApiError> for ErrorResponse {
    fn from(err: ApiError) -> Self {
        ErrorResponse::from(&err)
    }
}
