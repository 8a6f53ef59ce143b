// ==========================================
// 数据迁移导入引擎 - 领域层
// ==========================================
// 职责: 实体与类型定义，不含存储与流程逻辑
// ==========================================

pub mod conflict;
pub mod job;
pub mod mapping;
pub mod migration_log;
pub mod rollback;
pub mod source;
pub mod target;
pub mod types;
pub mod validation;

// 重导出核心类型
pub use conflict::{ConflictDecision, ConflictOverride, ConflictRecord};
pub use job::{JobCounters, JobProgress, MigrationJob, NewJob};
pub use mapping::{FieldMapping, MappingSuggestion, RuleKind, ValidationRule};
pub use migration_log::{LogQuery, MigrationLogEntry};
pub use rollback::{RollbackOptions, RollbackRecord, RollbackReport};
pub use source::{ColumnInfo, RawRecord, SourceSchema};
pub use target::{TargetDataType, TargetEntity, TargetFieldSpec};
pub use types::{
    ConflictPolicy, ConflictType, ExecutionMode, FieldType, JobStatus, LogLevel, LogOperation,
    Resolution, Severity, SourceFormat, WriteOperation,
};
pub use validation::{RecordRef, ValidatedRecord, ValidationIssue, ValidationSummary};
