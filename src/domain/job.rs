// ==========================================
// 数据迁移导入引擎 - 迁移作业领域模型
// ==========================================
// 职责: MigrationJob / 计数器 / 进度
// 红线: 仅 status 与计数器原地更新，其余子表只追加
// ==========================================

use crate::domain::target::TargetDataType;
use crate::domain::types::{ConflictPolicy, ExecutionMode, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ==========================================
// JobCounters - 执行计数器
// ==========================================
// 不变式: 作业结束时 processed = succeeded + failed + skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: i64,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl JobCounters {
    pub fn is_balanced(&self) -> bool {
        self.processed == self.succeeded + self.failed + self.skipped
    }

    /// 叠加一个批次的增量
    pub fn absorb(&mut self, delta: &JobCounters) {
        self.processed += delta.processed;
        self.succeeded += delta.succeeded;
        self.failed += delta.failed;
        self.skipped += delta.skipped;
    }
}

// ==========================================
// MigrationJob - 迁移作业
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    pub job_id: String,
    pub organization_id: String,
    pub name: String,
    pub source_type: String,
    pub target_data_types: BTreeSet<TargetDataType>,
    pub status: JobStatus,
    pub conflict_policy: ConflictPolicy,
    pub execution_mode: ExecutionMode,
    pub best_effort: bool,
    /// 自然键覆写（未设置的数据类型使用目录默认值）
    pub match_fields: BTreeMap<TargetDataType, Vec<String>>,
    pub counters: JobCounters,
    pub cancel_requested: bool,
    pub validation_run: i64,
    pub eligibility_window_end: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    /// 指定数据类型的匹配字段
    pub fn match_fields_for(&self, data_type: TargetDataType) -> Vec<String> {
        match self.match_fields.get(&data_type) {
            Some(fields) if !fields.is_empty() => fields.clone(),
            _ => data_type
                .default_match_fields()
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}

// ==========================================
// NewJob - 创建作业参数
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub source_type: String,
    pub target_data_types: BTreeSet<TargetDataType>,
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub best_effort: bool,
    #[serde(default)]
    pub match_fields: BTreeMap<TargetDataType, Vec<String>>,
}

// ==========================================
// JobProgress - 执行进度
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: f64,
    pub total: i64,
    pub processed: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub skipped: i64,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl JobProgress {
    /// 由作业快照计算进度
    pub fn from_job(job: &MigrationJob, now: DateTime<Utc>) -> Self {
        let c = job.counters;
        let percent = if c.total > 0 {
            (c.processed as f64 / c.total as f64 * 100.0).min(100.0)
        } else if job.status == JobStatus::Completed {
            100.0
        } else {
            0.0
        };

        // 仅执行中且已有批次提交时才估算
        let estimated_completion = match (job.status, job.started_at) {
            (JobStatus::Running, Some(started)) if c.processed > 0 => {
                let elapsed_ms = (now - started).num_milliseconds().max(0);
                let projected_ms = elapsed_ms as f64 * c.total as f64 / c.processed as f64;
                Some(started + chrono::Duration::milliseconds(projected_ms as i64))
            }
            _ => None,
        };

        Self {
            job_id: job.job_id.clone(),
            status: job.status,
            percent,
            total: c.total,
            processed: c.processed,
            succeeded: c.succeeded,
            failed: c.failed,
            skipped: c.skipped,
            estimated_completion,
        }
    }
}
