// ==========================================
// 数据迁移导入引擎 - 领域类型定义
// ==========================================
// 职责: 状态机 / 冲突策略 / 严重级别等闭合枚举
// 存储格式: snake_case 字符串（与数据库一致）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 作业状态 (Job Status)
// ==========================================
// 生命周期: draft → uploaded → mapped → validated → running
//           → {completed | failed | cancelled} → rolled_back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Draft,      // 已创建
    Uploaded,   // 已上传
    Mapped,     // 已映射
    Validated,  // 已校验
    Running,    // 执行中
    Completed,  // 已完成
    Failed,     // 失败
    Cancelled,  // 已取消
    RolledBack, // 已回滚（终态）
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Draft => "draft",
            JobStatus::Uploaded => "uploaded",
            JobStatus::Mapped => "mapped",
            JobStatus::Validated => "validated",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::RolledBack => "rolled_back",
        }
    }

    /// 终态: 不再接受任何迁移（completed 仅接受回滚）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Cancelled | JobStatus::RolledBack
        )
    }

    /// 状态转换表
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        // 任意非终态（含执行前各阶段与 running）都可取消
        if next == Cancelled {
            return !self.is_terminal() && *self != Completed;
        }

        matches!(
            (self, next),
            (Draft, Uploaded)
                | (Uploaded, Uploaded)
                | (Uploaded, Mapped)
                | (Mapped, Uploaded)
                | (Mapped, Mapped)
                | (Mapped, Validated)
                | (Validated, Mapped)
                | (Validated, Validated)
                | (Validated, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Completed, RolledBack)
        )
    }

    /// 是否允许上传（一旦开始校验，schema 冻结）
    pub fn accepts_upload(&self) -> bool {
        matches!(self, JobStatus::Draft | JobStatus::Uploaded | JobStatus::Mapped)
    }

    /// 是否允许修改映射（进入 running 后冻结）
    pub fn accepts_mapping_edit(&self) -> bool {
        matches!(
            self,
            JobStatus::Uploaded | JobStatus::Mapped | JobStatus::Validated
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(JobStatus::Draft),
            "uploaded" => Ok(JobStatus::Uploaded),
            "mapped" => Ok(JobStatus::Mapped),
            "validated" => Ok(JobStatus::Validated),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "rolled_back" => Ok(JobStatus::RolledBack),
            other => Err(format!("未知作业状态: {}", other)),
        }
    }
}

// ==========================================
// 源文件格式 (Source Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,  // 分隔文本
    Xlsx, // 电子表格
    Json, // 结构化对象
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Xlsx => "xlsx",
            SourceFormat::Json => "json",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Ok(SourceFormat::Csv),
            "xlsx" | "xls" | "excel" => Ok(SourceFormat::Xlsx),
            "json" | "jsonl" | "ndjson" => Ok(SourceFormat::Json),
            other => Err(format!("不支持的文件格式: {}", other)),
        }
    }
}

// ==========================================
// 冲突策略 / 冲突处理结果 (Resolution)
// ==========================================
// 作业级默认策略与单条记录覆写共用同一闭合枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Skip,      // 保留已有数据
    Update,    // 覆盖已有数据
    CreateNew, // 另建新记录
}

/// 作业级冲突策略
pub type ConflictPolicy = Resolution;

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Skip => "skip",
            Resolution::Update => "update",
            Resolution::CreateNew => "create_new",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Resolution::Skip),
            "update" => Ok(Resolution::Update),
            "create_new" => Ok(Resolution::CreateNew),
            other => Err(format!("未知冲突处理方式: {}", other)),
        }
    }
}

// ==========================================
// 执行模式 (Execution Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Unattended,  // 无人值守: 重复匹配直接记失败
    Interactive, // 交互式: 执行前必须逐条处理重复匹配
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Unattended => "unattended",
            ExecutionMode::Interactive => "interactive",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unattended" => Ok(ExecutionMode::Unattended),
            "interactive" => Ok(ExecutionMode::Interactive),
            other => Err(format!("未知执行模式: {}", other)),
        }
    }
}

// ==========================================
// 校验问题严重级别 (Severity)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning, // 警告（不阻断）
    #[default]
    Error,   // 错误（阻断该记录）
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            other => Err(format!("未知严重级别: {}", other)),
        }
    }
}

// ==========================================
// 迁移日志级别 (Log Level)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("未知日志级别: {}", other)),
        }
    }
}

// ==========================================
// 日志所属操作 (Log Operation)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOperation {
    Create,
    Upload,
    Mapping,
    Validate,
    Conflict,
    Execute,
    Cancel,
    Rollback,
}

impl LogOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOperation::Create => "create",
            LogOperation::Upload => "upload",
            LogOperation::Mapping => "mapping",
            LogOperation::Validate => "validate",
            LogOperation::Conflict => "conflict",
            LogOperation::Execute => "execute",
            LogOperation::Cancel => "cancel",
            LogOperation::Rollback => "rollback",
        }
    }
}

impl FromStr for LogOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(LogOperation::Create),
            "upload" => Ok(LogOperation::Upload),
            "mapping" => Ok(LogOperation::Mapping),
            "validate" => Ok(LogOperation::Validate),
            "conflict" => Ok(LogOperation::Conflict),
            "execute" => Ok(LogOperation::Execute),
            "cancel" => Ok(LogOperation::Cancel),
            "rollback" => Ok(LogOperation::Rollback),
            other => Err(format!("未知操作类型: {}", other)),
        }
    }
}

// ==========================================
// 冲突类型 (Conflict Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Duplicate,       // 多条已有记录匹配同一自然键
    Mismatch,        // 单条匹配但字段不同
    ValidationError, // 尽力导入模式下无法导入的记录
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Duplicate => "duplicate",
            ConflictType::Mismatch => "mismatch",
            ConflictType::ValidationError => "validation_error",
        }
    }
}

impl FromStr for ConflictType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "duplicate" => Ok(ConflictType::Duplicate),
            "mismatch" => Ok(ConflictType::Mismatch),
            "validation_error" => Ok(ConflictType::ValidationError),
            other => Err(format!("未知冲突类型: {}", other)),
        }
    }
}

// ==========================================
// 回滚记录操作类型 (Write Operation)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOperation {
    Create,
    Update,
}

impl WriteOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOperation::Create => "create",
            WriteOperation::Update => "update",
        }
    }
}

impl FromStr for WriteOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(WriteOperation::Create),
            "update" => Ok(WriteOperation::Update),
            other => Err(format!("未知写入类型: {}", other)),
        }
    }
}

// ==========================================
// 字段类型 (Field Type)
// ==========================================
// 用于源列类型推断与目标字段类型声明
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
        }
    }

    /// 源列类型 → 目标字段类型 的兼容度（0.0 ~ 1.0）
    pub fn compatibility_with(&self, target: FieldType) -> f64 {
        use FieldType::*;
        match (self, target) {
            (a, b) if *a == b => 1.0,
            (_, Text) => 1.0,
            (Integer, Decimal) => 1.0,
            (Integer, Boolean) => 0.5,
            (Text, _) => 0.5,
            _ => 0.0,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(FieldType::Text),
            "integer" => Ok(FieldType::Integer),
            "decimal" => Ok(FieldType::Decimal),
            "date" => Ok(FieldType::Date),
            "boolean" => Ok(FieldType::Boolean),
            other => Err(format!("未知字段类型: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_happy_path() {
        assert!(JobStatus::Draft.can_transition_to(JobStatus::Uploaded));
        assert!(JobStatus::Uploaded.can_transition_to(JobStatus::Mapped));
        assert!(JobStatus::Mapped.can_transition_to(JobStatus::Validated));
        assert!(JobStatus::Validated.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Completed.can_transition_to(JobStatus::RolledBack));
    }

    #[test]
    fn test_job_status_rejects_skips() {
        assert!(!JobStatus::Draft.can_transition_to(JobStatus::Mapped));
        assert!(!JobStatus::Uploaded.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::RolledBack));
        assert!(!JobStatus::RolledBack.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_cancel_only_from_non_terminal() {
        assert!(JobStatus::Draft.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            JobStatus::Draft,
            JobStatus::Running,
            JobStatus::RolledBack,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("unknown".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_field_type_compatibility() {
        assert_eq!(FieldType::Integer.compatibility_with(FieldType::Decimal), 1.0);
        assert_eq!(FieldType::Text.compatibility_with(FieldType::Date), 0.5);
        assert_eq!(FieldType::Date.compatibility_with(FieldType::Integer), 0.0);
        assert_eq!(FieldType::Date.compatibility_with(FieldType::Text), 1.0);
    }
}
