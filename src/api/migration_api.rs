// ==========================================
// 数据迁移导入引擎 - 迁移作业 API
// ==========================================
// 职责: 对外接口的请求 / 响应结构，错误统一转为 ApiError
// 约定: 所有方法显式携带 (organization_id, job_id)
// 分页: limit 限制在 1..=200，缺省取配置 log_page_size
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, EngineConfig};
use crate::db::open_and_init;
use crate::domain::conflict::{ConflictOverride, ConflictRecord};
use crate::domain::job::{JobProgress, NewJob};
use crate::domain::mapping::{FieldMapping, MappingSuggestion};
use crate::domain::migration_log::{LogQuery, MigrationLogEntry};
use crate::domain::rollback::{RollbackOptions, RollbackReport};
use crate::domain::types::{JobStatus, LogLevel, LogOperation, Resolution, SourceFormat};
use crate::domain::validation::RecordRef;
use crate::engine::executor::ExecutionSummary;
use crate::engine::orchestrator::{JobDetail, JobOrchestrator, Page, UploadResult, ValidationReport};
use crate::engine::scheduler::ExecutionHandle;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const MAX_PAGE_SIZE: usize = 200;

// ==========================================
// 请求 / 响应结构
// ==========================================

/// 作业状态响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
}

/// 上传请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub bytes: Vec<u8>,
    /// csv / xlsx / json；为空时按内容识别
    #[serde(default)]
    pub declared_format: Option<String>,
}

/// 映射响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingsResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub mappings: Vec<FieldMapping>,
}

/// 执行启动响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub total: i64,
}

/// 分页参数
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// 冲突处理请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    /// 形如 `contact#3`
    pub record_ref: String,
    pub resolution: Resolution,
    #[serde(default)]
    pub existing_target_id: Option<String>,
}

/// 日志查询请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogListRequest {
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub operation: Option<LogOperation>,
    #[serde(flatten)]
    pub page: PageRequest,
}

// ==========================================
// MigrationApi - 迁移作业 API
// ==========================================

/// 迁移作业API
///
/// 职责：
/// 1. 作业创建 / 上传 / 映射 / 校验
/// 2. 后台执行与进度查询
/// 3. 交互模式冲突处理
/// 4. 取消 / 回滚 / 日志
pub struct MigrationApi {
    orchestrator: Arc<JobOrchestrator>,
    /// 执行中作业的完成句柄
    handles: Mutex<HashMap<String, ExecutionHandle>>,
}

impl MigrationApi {
    pub fn new(orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            orchestrator,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// 由数据库路径创建（加载 config_kv 覆写）
    pub fn from_db_path(db_path: &str) -> ApiResult<Self> {
        let conn = open_and_init(db_path).map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        let conn = Arc::new(Mutex::new(conn));
        let config = ConfigManager::new(conn.clone()).load_engine_config()?;
        Ok(Self::with_connection(conn, config))
    }

    pub fn with_connection(conn: Arc<Mutex<Connection>>, config: EngineConfig) -> Self {
        Self::new(Arc::new(JobOrchestrator::new(conn, config)))
    }

    pub fn orchestrator(&self) -> &Arc<JobOrchestrator> {
        &self.orchestrator
    }

    // ==========================================
    // 作业生命周期
    // ==========================================

    pub fn create_job(&self, organization_id: &str, request: NewJob) -> ApiResult<JobStatusResponse> {
        let job = self.orchestrator.create_job(organization_id, request)?;
        Ok(JobStatusResponse {
            job_id: job.job_id,
            status: job.status,
        })
    }

    pub async fn upload(
        &self,
        organization_id: &str,
        job_id: &str,
        request: UploadRequest,
    ) -> ApiResult<UploadResult> {
        let declared = match request.declared_format.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<SourceFormat>()
                    .map_err(|e| ApiError::InvalidInput(format!("无法识别的文件格式: {}", e)))?,
            ),
        };
        Ok(self
            .orchestrator
            .upload(organization_id, job_id, request.bytes, declared)
            .await?)
    }

    pub fn get_mappings(&self, organization_id: &str, job_id: &str) -> ApiResult<Vec<FieldMapping>> {
        Ok(self.orchestrator.get_mappings(organization_id, job_id)?)
    }

    pub fn suggest_mappings(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> ApiResult<Vec<MappingSuggestion>> {
        Ok(self.orchestrator.suggest_mappings(organization_id, job_id)?)
    }

    pub async fn put_mappings(
        &self,
        organization_id: &str,
        job_id: &str,
        mappings: Vec<FieldMapping>,
    ) -> ApiResult<MappingsResponse> {
        let mappings = self
            .orchestrator
            .put_mappings(organization_id, job_id, mappings)
            .await?;
        Ok(MappingsResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Mapped,
            mappings,
        })
    }

    pub async fn validate(&self, organization_id: &str, job_id: &str) -> ApiResult<ValidationReport> {
        Ok(self.orchestrator.validate(organization_id, job_id).await?)
    }

    /// 启动执行（后台运行，立即返回）
    pub async fn execute(&self, organization_id: &str, job_id: &str) -> ApiResult<ExecuteResponse> {
        let handle = self.orchestrator.execute(organization_id, job_id).await?;
        let progress = self.orchestrator.get_progress(organization_id, job_id)?;
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.to_string(), handle);
        debug!(job_id, total = progress.total, "执行已启动");
        Ok(ExecuteResponse {
            job_id: job_id.to_string(),
            status: progress.status,
            total: progress.total,
        })
    }

    /// 等待执行结束（完成信号）
    pub async fn wait_for_completion(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> ApiResult<ExecutionSummary> {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
        match handle {
            Some(handle) => Ok(handle.wait().await?),
            None => {
                // 无句柄: 返回当前快照
                let detail = self.orchestrator.get_job_detail(organization_id, job_id)?;
                if !matches!(
                    detail.job.status,
                    JobStatus::Completed
                        | JobStatus::Failed
                        | JobStatus::Cancelled
                        | JobStatus::RolledBack
                ) {
                    warn!(job_id, status = %detail.job.status, "作业没有进行中的执行");
                    return Err(ApiError::InvalidInput(format!(
                        "作业 {} 没有进行中的执行",
                        job_id
                    )));
                }
                Ok(ExecutionSummary {
                    job_id: detail.job.job_id,
                    status: detail.job.status,
                    counters: detail.job.counters,
                    error_code: detail.job.last_error_code,
                    error_message: detail.job.last_error_message,
                })
            }
        }
    }

    pub fn get_progress(&self, organization_id: &str, job_id: &str) -> ApiResult<JobProgress> {
        Ok(self.orchestrator.get_progress(organization_id, job_id)?)
    }

    // ==========================================
    // 冲突
    // ==========================================

    pub async fn preview_conflicts(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> ApiResult<Vec<ConflictRecord>> {
        Ok(self
            .orchestrator
            .preview_conflicts(organization_id, job_id)
            .await?)
    }

    pub fn list_conflicts(
        &self,
        organization_id: &str,
        job_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<ConflictRecord>> {
        let (limit, offset) = self.page_bounds(page);
        Ok(self
            .orchestrator
            .list_conflicts(organization_id, job_id, limit, offset)?)
    }

    pub async fn resolve_conflict(
        &self,
        organization_id: &str,
        job_id: &str,
        request: ResolveConflictRequest,
    ) -> ApiResult<ConflictRecord> {
        let record_ref: RecordRef = request
            .record_ref
            .parse()
            .map_err(ApiError::InvalidInput)?;
        Ok(self
            .orchestrator
            .resolve_conflict(
                organization_id,
                job_id,
                record_ref,
                ConflictOverride {
                    resolution: request.resolution,
                    existing_target_id: request.existing_target_id,
                },
            )
            .await?)
    }

    // ==========================================
    // 取消 / 回滚 / 查询
    // ==========================================

    pub async fn cancel(&self, organization_id: &str, job_id: &str) -> ApiResult<JobStatusResponse> {
        let job = self.orchestrator.cancel(organization_id, job_id).await?;
        Ok(JobStatusResponse {
            job_id: job.job_id,
            status: job.status,
        })
    }

    pub async fn rollback(
        &self,
        organization_id: &str,
        job_id: &str,
        options: RollbackOptions,
    ) -> ApiResult<RollbackReport> {
        Ok(self
            .orchestrator
            .rollback(organization_id, job_id, options)
            .await?)
    }

    pub fn list_logs(
        &self,
        organization_id: &str,
        job_id: &str,
        request: LogListRequest,
    ) -> ApiResult<Page<MigrationLogEntry>> {
        let (limit, offset) = self.page_bounds(request.page);
        let query = LogQuery {
            level: request.level,
            operation: request.operation,
            limit,
            offset,
        };
        Ok(self.orchestrator.list_logs(organization_id, job_id, &query)?)
    }

    pub fn get_job_detail(&self, organization_id: &str, job_id: &str) -> ApiResult<JobDetail> {
        Ok(self.orchestrator.get_job_detail(organization_id, job_id)?)
    }

    fn page_bounds(&self, page: PageRequest) -> (usize, usize) {
        let default = self.orchestrator.config().log_page_size;
        (
            clamp_page_size(page.limit, default),
            page.offset.unwrap_or(0),
        )
    }
}

/// 分页大小限制在 1..=200
pub fn clamp_page_size(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
}
