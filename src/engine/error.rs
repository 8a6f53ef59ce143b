// ==========================================
// 数据迁移导入引擎 - 引擎层错误类型
// ==========================================
// 职责: 迁移错误分类，每个变体对应稳定的错误代码
// 约定: 行级问题（ValidationIssue）不抛出，只记录
// ==========================================

use crate::domain::types::JobStatus;
use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    // ==========================================
    // 接入 / 映射阶段
    // ==========================================
    #[error("文件格式错误: {0}")]
    Format(#[from] ImportError),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("映射已失效，源字段不存在: {}", missing.join(", "))]
    MappingStale { missing: Vec<String> },

    #[error("校验未通过: {invalid_count} 条记录存在错误，且未启用尽力导入")]
    ValidationFailed { invalid_count: usize },

    // ==========================================
    // 冲突 / 执行阶段
    // ==========================================
    #[error("存在未处理的重复匹配: {}", record_refs.join(", "))]
    ConflictRequiresResolution { record_refs: Vec<String> },

    #[error("执行致命错误: {0}")]
    FatalExecution(String),

    #[error("执行超时: 已运行 {elapsed_secs} 秒，预算 {budget_secs} 秒")]
    Timeout { elapsed_secs: u64, budget_secs: u64 },

    #[error("组织并发配额已满: organization={organization_id}, quota={quota}")]
    ConcurrencyQuotaExceeded {
        organization_id: String,
        quota: usize,
    },

    // ==========================================
    // 回滚阶段
    // ==========================================
    #[error("回滚被后续数据阻断: {}", blocked.join(", "))]
    ConflictDuringRollback { blocked: Vec<String> },

    #[error("不满足回滚条件: {0}")]
    RollbackNotEligible(String),

    // ==========================================
    // 通用
    // ==========================================
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("作业不存在: {0}")]
    JobNotFound(String),

    #[error("请求参数错误: {0}")]
    InvalidRequest(String),

    #[error("存储错误: {0}")]
    Repository(RepositoryError),
}

impl MigrationError {
    /// 状态不允许某操作
    pub fn transition(from: JobStatus, to: JobStatus) -> Self {
        MigrationError::InvalidStateTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    /// 稳定的错误代码
    pub fn code(&self) -> &'static str {
        match self {
            MigrationError::Format(err) => err.code(),
            MigrationError::Configuration(_) => "CONFIGURATION_ERROR",
            MigrationError::MappingStale { .. } => "MAPPING_STALE",
            MigrationError::ValidationFailed { .. } => "VALIDATION_FAILED",
            MigrationError::ConflictRequiresResolution { .. } => "CONFLICT_REQUIRES_RESOLUTION",
            MigrationError::FatalExecution(_) => "FATAL_EXECUTION",
            MigrationError::Timeout { .. } => "TIMEOUT",
            MigrationError::ConcurrencyQuotaExceeded { .. } => "CONCURRENCY_QUOTA_EXCEEDED",
            MigrationError::ConflictDuringRollback { .. } => "CONFLICT_DURING_ROLLBACK",
            MigrationError::RollbackNotEligible(_) => "ROLLBACK_NOT_ELIGIBLE",
            MigrationError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            MigrationError::JobNotFound(_) => "JOB_NOT_FOUND",
            MigrationError::InvalidRequest(_) => "INVALID_REQUEST",
            MigrationError::Repository(err) if err.is_fatal() => "FATAL_EXECUTION",
            MigrationError::Repository(_) => "REPOSITORY_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
// compare-and-set 失败 → 状态转换错误；NotFound → 作业不存在
impl From<RepositoryError> for MigrationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::InvalidStateTransition { from, to } => {
                MigrationError::InvalidStateTransition { from, to }
            }
            RepositoryError::NotFound { entity, id } if entity == "MigrationJob" => {
                MigrationError::JobNotFound(id)
            }
            other => MigrationError::Repository(other),
        }
    }
}

pub type MigrationResult<T> = Result<T, MigrationError>;
