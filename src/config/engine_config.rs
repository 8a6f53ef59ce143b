// ==========================================
// 数据迁移导入引擎 - 引擎配置
// ==========================================
// 职责: 所有可调参数及其默认值
// 覆写: config_kv 表（见 ConfigManager）
// ==========================================

use crate::importer::SourceLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 每批次处理的执行单元数
    pub batch_size: usize,
    /// 源文件最大列数
    pub max_columns: usize,
    /// 上传大小上限（字节）
    pub max_upload_bytes: usize,
    /// 单组织同时执行的作业数上限
    pub org_concurrency_quota: usize,
    /// 单个作业的执行时长预算（秒）
    pub execution_budget_secs: u64,
    /// 完成后可回滚的时间窗口（小时）
    pub rollback_window_hours: i64,
    /// 映射建议置信度阈值
    pub suggestion_threshold: f64,
    /// 类型推断采样行数
    pub inference_sample_rows: usize,
    /// 上传预览行数
    pub preview_row_count: usize,
    /// 日志 / 冲突分页默认大小
    pub log_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_columns: 256,
            max_upload_bytes: 50 * 1024 * 1024,
            org_concurrency_quota: 2,
            execution_budget_secs: 3600,
            rollback_window_hours: 168,
            suggestion_threshold: 0.6,
            inference_sample_rows: 50,
            preview_row_count: 5,
            log_page_size: 50,
        }
    }
}

impl EngineConfig {
    pub fn source_limits(&self) -> SourceLimits {
        SourceLimits {
            max_columns: self.max_columns,
            max_upload_bytes: self.max_upload_bytes,
            inference_sample_rows: self.inference_sample_rows,
        }
    }

    pub fn execution_budget(&self) -> Duration {
        Duration::from_secs(self.execution_budget_secs)
    }

    pub fn rollback_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.rollback_window_hours)
    }
}
