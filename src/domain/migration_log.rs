// ==========================================
// 数据迁移导入引擎 - 迁移日志领域模型
// ==========================================
// 红线: 作业的所有写入都必须留痕（只追加）
// ==========================================

use crate::domain::types::{LogLevel, LogOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// MigrationLogEntry - 迁移日志
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationLogEntry {
    pub log_id: Option<i64>,      // 自增序号（写入后回填）
    pub organization_id: String,
    pub job_id: String,
    pub level: LogLevel,
    pub message: String,
    pub record_ref: Option<String>,
    pub error_code: Option<String>,
    pub operation: LogOperation,
    pub created_at: DateTime<Utc>,
}

impl MigrationLogEntry {
    pub fn new(
        organization_id: &str,
        job_id: &str,
        level: LogLevel,
        operation: LogOperation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            log_id: None,
            organization_id: organization_id.to_string(),
            job_id: job_id.to_string(),
            level,
            message: message.into(),
            record_ref: None,
            error_code: None,
            operation,
            created_at: Utc::now(),
        }
    }

    pub fn with_record(mut self, record_ref: impl ToString) -> Self {
        self.record_ref = Some(record_ref.to_string());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }
}

// ==========================================
// LogQuery - 日志查询条件
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogQuery {
    pub level: Option<LogLevel>,
    pub operation: Option<LogOperation>,
    pub limit: usize,
    pub offset: usize,
}
