// ==========================================
// 数据迁移导入引擎 - 作业编排器
// ==========================================
// 职责: 持有作业状态机，对外暴露全部作业操作
// 状态: draft → uploaded → mapped → validated → running
//       → {completed | failed | cancelled} → rolled_back
// 红线: 每个操作显式携带 (organization_id, job_id)，不存在“当前作业”
// 红线: 上传 / 映射错误只中止当前操作，作业状态不变且可重试
// ==========================================

use crate::config::EngineConfig;
use crate::domain::conflict::{ConflictOverride, ConflictRecord};
use crate::domain::job::{JobCounters, JobProgress, MigrationJob, NewJob};
use crate::domain::mapping::{FieldMapping, MappingSuggestion};
use crate::domain::migration_log::{LogQuery, MigrationLogEntry};
use crate::domain::rollback::{RollbackOptions, RollbackReport};
use crate::domain::source::{RawRecord, SourceSchema};
use crate::domain::target::TargetDataType;
use crate::domain::types::{
    ConflictType, ExecutionMode, JobStatus, LogLevel, LogOperation, Resolution, SourceFormat,
};
use crate::domain::validation::{RecordRef, ValidationIssue};
use crate::engine::conflict_resolver::ConflictResolver;
use crate::engine::error::{MigrationError, MigrationResult};
use crate::engine::executor::{ExecutionContext, MigrationExecutor};
use crate::engine::mapping::MappingEngine;
use crate::engine::rollback::RollbackManager;
use crate::engine::scheduler::{ExecutionHandle, JobScheduler};
use crate::engine::validator::{CompiledMappings, Validator};
use crate::importer::source_adapter::{RecordSource, SourceAdapter};
use crate::repository::conflict_repo::ConflictRecordRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::issue_repo::ValidationIssueRepository;
use crate::repository::job_repo::MigrationJobRepository;
use crate::repository::log_repo::MigrationLogRepository;
use crate::repository::mapping_repo::MappingRepository;
use crate::repository::schema_repo::SourceSchemaRepository;
use crate::repository::source_blob_repo::{SourceBlobStore, SqliteSourceBlobStore};
use crate::repository::target_repo::{SqliteTargetStore, TargetStore};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 操作结果
// ==========================================

/// 上传结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    pub schema: SourceSchema,
    pub preview_rows: Vec<RawRecord>,
    pub suggested_data_types: Vec<TargetDataType>,
}

/// 一轮校验的报告
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub job_id: String,
    pub run: i64,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub warning_count: usize,
    pub issues_by_code: BTreeMap<String, usize>,
    pub issues: Vec<ValidationIssue>,
}

/// 作业详情（自助诊断视图）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    pub job: MigrationJob,
    pub progress: JobProgress,
    /// 最近一轮校验的问题计数（按 code）
    pub issue_counts: BTreeMap<String, usize>,
    pub recent_logs: Vec<MigrationLogEntry>,
}

/// 分页结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

const DETAIL_LOG_COUNT: usize = 10;

// ==========================================
// JobOrchestrator - 作业编排器
// ==========================================
pub struct JobOrchestrator {
    conn: Arc<Mutex<Connection>>,
    config: EngineConfig,
    store: Arc<dyn TargetStore>,
    blobs: Arc<dyn SourceBlobStore>,
    scheduler: Arc<JobScheduler>,
    adapter: SourceAdapter,
    mapping_engine: MappingEngine,
    job_repo: MigrationJobRepository,
    schema_repo: SourceSchemaRepository,
    mapping_repo: MappingRepository,
    issue_repo: ValidationIssueRepository,
    conflict_repo: ConflictRecordRepository,
    log_repo: MigrationLogRepository,
}

impl JobOrchestrator {
    /// 使用 SQLite 目标存储与源文件存储
    pub fn new(conn: Arc<Mutex<Connection>>, config: EngineConfig) -> Self {
        let blobs = Arc::new(SqliteSourceBlobStore::new(conn.clone()));
        Self::with_stores(conn, config, Arc::new(SqliteTargetStore), blobs)
    }

    /// 注入目标存储与源文件存储
    pub fn with_stores(
        conn: Arc<Mutex<Connection>>,
        config: EngineConfig,
        store: Arc<dyn TargetStore>,
        blobs: Arc<dyn SourceBlobStore>,
    ) -> Self {
        Self {
            scheduler: Arc::new(JobScheduler::new(config.org_concurrency_quota)),
            adapter: SourceAdapter::new(config.source_limits()),
            mapping_engine: MappingEngine::new(config.suggestion_threshold),
            job_repo: MigrationJobRepository::new(conn.clone()),
            schema_repo: SourceSchemaRepository::new(conn.clone()),
            mapping_repo: MappingRepository::new(conn.clone()),
            issue_repo: ValidationIssueRepository::new(conn.clone()),
            conflict_repo: ConflictRecordRepository::new(conn.clone()),
            log_repo: MigrationLogRepository::new(conn.clone()),
            conn,
            config,
            store,
            blobs,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 创建
    // ==========================================

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub fn create_job(&self, organization_id: &str, request: NewJob) -> MigrationResult<MigrationJob> {
        if organization_id.trim().is_empty() {
            return Err(MigrationError::InvalidRequest("organization_id 不能为空".to_string()));
        }
        let name = request.name.trim();
        if name.is_empty() {
            return Err(MigrationError::InvalidRequest("作业名称不能为空".to_string()));
        }
        if request.source_type.trim().is_empty() {
            return Err(MigrationError::InvalidRequest("source_type 不能为空".to_string()));
        }
        if request.target_data_types.is_empty() {
            return Err(MigrationError::InvalidRequest("至少选择一个目标数据类型".to_string()));
        }
        for (data_type, fields) in &request.match_fields {
            if !request.target_data_types.contains(data_type) {
                return Err(MigrationError::Configuration(format!(
                    "匹配字段指定了未选择的数据类型: {}",
                    data_type
                )));
            }
            if let Some(unknown) = fields.iter().find(|f| data_type.field(f).is_none()) {
                return Err(MigrationError::Configuration(format!(
                    "匹配字段不存在: {}.{}",
                    data_type, unknown
                )));
            }
        }

        let now = Utc::now();
        let job = MigrationJob {
            job_id: Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            name: name.to_string(),
            source_type: request.source_type.trim().to_string(),
            target_data_types: request.target_data_types,
            status: JobStatus::Draft,
            conflict_policy: request.conflict_policy,
            execution_mode: request.execution_mode,
            best_effort: request.best_effort,
            match_fields: request.match_fields,
            counters: JobCounters::default(),
            cancel_requested: false,
            validation_run: 0,
            eligibility_window_end: None,
            last_error_code: None,
            last_error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.job_repo.insert(&job)?;
        self.log(&job, LogLevel::Info, LogOperation::Create, format!("作业已创建: {}", job.name))?;
        info!(job_id = %job.job_id, "作业已创建");
        Ok(job)
    }

    // ==========================================
    // 上传
    // ==========================================

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(
        &self,
        organization_id: &str,
        job_id: &str,
        bytes: Vec<u8>,
        declared_format: Option<SourceFormat>,
    ) -> MigrationResult<UploadResult> {
        let lock = self.scheduler.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = self.load_job(organization_id, job_id)?;
        if !job.status.accepts_upload() {
            return Err(MigrationError::transition(job.status, JobStatus::Uploaded));
        }

        let parsed = match self.adapter.parse(bytes, declared_format) {
            Ok(parsed) => parsed,
            Err(e) => {
                let err = MigrationError::from(e);
                warn!(error = %err, "源文件解析失败");
                self.log_error(&job, LogOperation::Upload, &err)?;
                return Err(err);
            }
        };

        self.blobs
            .put(organization_id, job_id, parsed.records.format(), parsed.records.bytes())
            .await?;
        self.schema_repo.upsert(organization_id, job_id, &parsed.schema)?;
        self.job_repo
            .transition(organization_id, job_id, job.status, JobStatus::Uploaded)?;

        let preview_rows = parsed.records.preview(self.config.preview_row_count)?;
        let suggested_data_types = MappingEngine::suggest_data_types(&parsed.schema);
        self.log(
            &job,
            LogLevel::Info,
            LogOperation::Upload,
            format!(
                "源文件已上传: 格式 {}，{} 列，{} 行",
                parsed.schema.format,
                parsed.schema.columns.len(),
                parsed.schema.record_count
            ),
        )?;

        Ok(UploadResult {
            schema: parsed.schema,
            preview_rows,
            suggested_data_types,
        })
    }

    // ==========================================
    // 映射
    // ==========================================

    pub fn get_mappings(&self, organization_id: &str, job_id: &str) -> MigrationResult<Vec<FieldMapping>> {
        self.load_job(organization_id, job_id)?;
        Ok(self.mapping_repo.find_latest(organization_id, job_id)?)
    }

    /// 自动建议（结合本组织同来源系统的历史映射）
    pub fn suggest_mappings(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> MigrationResult<Vec<MappingSuggestion>> {
        let job = self.load_job(organization_id, job_id)?;
        let schema = self.load_schema(&job)?;

        let mut suggestions = Vec::new();
        for data_type in &job.target_data_types {
            let history = self
                .mapping_repo
                .find_history(organization_id, &job.source_type, *data_type)?;
            suggestions.extend(self.mapping_engine.suggest(&schema, *data_type, &history));
        }
        Ok(suggestions)
    }

    /// 提交映射集（整体替换，生成新版本）
    #[instrument(skip(self, mappings), fields(count = mappings.len()))]
    pub async fn put_mappings(
        &self,
        organization_id: &str,
        job_id: &str,
        mappings: Vec<FieldMapping>,
    ) -> MigrationResult<Vec<FieldMapping>> {
        let lock = self.scheduler.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = self.load_job(organization_id, job_id)?;
        if !job.status.accepts_mapping_edit() {
            return Err(MigrationError::transition(job.status, JobStatus::Mapped));
        }
        let schema = self.load_schema(&job)?;

        let normalized = match self.mapping_engine.apply_overrides(&job, &schema, mappings) {
            Ok(normalized) => normalized,
            Err(err) => {
                warn!(error = %err, "映射校验未通过");
                self.log_error(&job, LogOperation::Mapping, &err)?;
                return Err(err);
            }
        };

        let version = self
            .mapping_repo
            .save_version(organization_id, job_id, &normalized)?;
        self.job_repo
            .transition(organization_id, job_id, job.status, JobStatus::Mapped)?;
        self.log(
            &job,
            LogLevel::Info,
            LogOperation::Mapping,
            format!("映射已保存: 版本 {}，{} 个字段", version, normalized.len()),
        )?;
        Ok(normalized)
    }

    // ==========================================
    // 校验
    // ==========================================

    /// 全量校验（相同映射与源数据重复调用结果一致）
    #[instrument(skip(self))]
    pub async fn validate(&self, organization_id: &str, job_id: &str) -> MigrationResult<ValidationReport> {
        let lock = self.scheduler.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = self.load_job(organization_id, job_id)?;
        if !job.status.can_transition_to(JobStatus::Validated) {
            return Err(MigrationError::transition(job.status, JobStatus::Validated));
        }
        let schema = self.load_schema(&job)?;
        let mappings = self.mapping_repo.find_latest(organization_id, job_id)?;
        if mappings.is_empty() {
            return Err(MigrationError::Configuration("作业尚未配置映射".to_string()));
        }
        if let Err(err) = MappingEngine::check_stale(&schema, &mappings) {
            self.log_error(&job, LogOperation::Validate, &err)?;
            return Err(err);
        }
        let compiled = CompiledMappings::compile(&mappings)?;
        let source = self.load_source(&job).await?;

        // 全量遍历在阻塞线程池中执行
        let validation_job_id = job.job_id.clone();
        let data_types = job.target_data_types.clone();
        let outcome = tokio::task::spawn_blocking(move || -> MigrationResult<_> {
            let records = source
                .records()?
                .collect::<Result<Vec<RawRecord>, _>>()?;
            Ok(Validator::validate_records(
                &validation_job_id,
                records,
                &data_types,
                &compiled,
            ))
        })
        .await
        .map_err(|e| MigrationError::FatalExecution(format!("校验任务异常: {}", e)))??;

        let run = self.job_repo.next_validation_run(organization_id, job_id)?;
        self.issue_repo.insert_run(organization_id, run, &outcome.issues)?;
        self.job_repo
            .transition(organization_id, job_id, job.status, JobStatus::Validated)?;

        let summary = outcome.summary;
        self.log(
            &job,
            if summary.invalid_count > 0 { LogLevel::Warn } else { LogLevel::Info },
            LogOperation::Validate,
            format!(
                "第 {} 轮校验: 有效 {}，无效 {}，警告 {}",
                run, summary.valid_count, summary.invalid_count, summary.warning_count
            ),
        )?;
        info!(run, valid = summary.valid_count, invalid = summary.invalid_count, "校验完成");

        Ok(ValidationReport {
            job_id: job.job_id,
            run,
            valid_count: summary.valid_count,
            invalid_count: summary.invalid_count,
            warning_count: summary.warning_count,
            issues_by_code: summary.issues_by_code,
            issues: outcome.issues,
        })
    }

    // ==========================================
    // 执行
    // ==========================================

    /// 启动后台执行；返回句柄，wait() 即完成信号
    #[instrument(skip(self))]
    pub async fn execute(&self, organization_id: &str, job_id: &str) -> MigrationResult<ExecutionHandle> {
        let lock = self.scheduler.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = self.load_job(organization_id, job_id)?;
        if job.status != JobStatus::Validated {
            return Err(MigrationError::transition(job.status, JobStatus::Running));
        }

        let invalid_count =
            self.issue_repo
                .count_invalid_units(organization_id, job_id, job.validation_run)?;
        if invalid_count > 0 && !job.best_effort {
            let err = MigrationError::ValidationFailed { invalid_count };
            self.log_error(&job, LogOperation::Execute, &err)?;
            return Err(err);
        }

        let schema = self.load_schema(&job)?;
        let mappings = self.mapping_repo.find_latest(organization_id, job_id)?;
        MappingEngine::check_stale(&schema, &mappings)?;
        let compiled = CompiledMappings::compile(&mappings)?;
        let overrides = self.conflict_repo.find_overrides(organization_id, job_id)?;
        let source = self.load_source(&job).await?;

        // 交互模式: 执行前所有重复匹配必须已处理
        if job.execution_mode == ExecutionMode::Interactive {
            let rows = self.compute_preview(&job, &compiled, &source, &overrides)?;
            let unresolved: Vec<String> = rows
                .iter()
                .filter(|r| r.conflict_type == ConflictType::Duplicate && !r.is_resolved())
                .map(|r| r.record_ref.to_string())
                .collect();
            if !unresolved.is_empty() {
                self.conflict_repo.insert_batch(organization_id, &rows)?;
                let err = MigrationError::ConflictRequiresResolution {
                    record_refs: unresolved,
                };
                self.log_error(&job, LogOperation::Execute, &err)?;
                return Err(err);
            }
        }

        let permit = self.scheduler.try_admit(organization_id)?;

        let total = (schema.record_count * job.target_data_types.len()) as i64;
        self.job_repo
            .mark_running(organization_id, job_id, total, Utc::now())?;
        self.log(
            &job,
            LogLevel::Info,
            LogOperation::Execute,
            format!("开始执行: {} 个执行单元，批次大小 {}", total, self.config.batch_size),
        )?;

        let job = self.load_job(organization_id, job_id)?;
        let ctx = Arc::new(ExecutionContext {
            job,
            mappings,
            compiled,
            overrides,
            source,
        });
        let executor = Arc::new(MigrationExecutor::new(
            self.conn.clone(),
            self.store.clone(),
            &self.config,
        ));
        let task_lock = lock.clone();
        let handle = tokio::spawn(async move {
            let outcome = executor.clone().run(ctx.clone()).await;
            let summary = {
                let _guard = task_lock.lock().await;
                executor.finish(&ctx, outcome)
            };
            drop(permit);
            summary
        });

        Ok(ExecutionHandle::new(job_id.to_string(), handle))
    }

    pub fn get_progress(&self, organization_id: &str, job_id: &str) -> MigrationResult<JobProgress> {
        let job = self.load_job(organization_id, job_id)?;
        Ok(JobProgress::from_job(&job, Utc::now()))
    }

    // ==========================================
    // 冲突（交互模式）
    // ==========================================

    /// 只读判定全部有效记录，并把需要关注的冲突写入冲突表
    #[instrument(skip(self))]
    pub async fn preview_conflicts(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> MigrationResult<Vec<ConflictRecord>> {
        let job = self.load_job(organization_id, job_id)?;
        if job.status != JobStatus::Validated {
            return Err(MigrationError::InvalidRequest(format!(
                "仅 validated 作业可预览冲突，当前状态 {}",
                job.status
            )));
        }
        let mappings = self.mapping_repo.find_latest(organization_id, job_id)?;
        let compiled = CompiledMappings::compile(&mappings)?;
        let overrides = self.conflict_repo.find_overrides(organization_id, job_id)?;
        let source = self.load_source(&job).await?;

        let rows = self.compute_preview(&job, &compiled, &source, &overrides)?;
        self.conflict_repo.insert_batch(organization_id, &rows)?;
        self.log(
            &job,
            LogLevel::Info,
            LogOperation::Conflict,
            format!("冲突预览: {} 条记录需要关注", rows.len()),
        )?;
        Ok(rows)
    }

    pub fn list_conflicts(
        &self,
        organization_id: &str,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> MigrationResult<Page<ConflictRecord>> {
        self.load_job(organization_id, job_id)?;
        Ok(Page {
            items: self
                .conflict_repo
                .list_latest(organization_id, job_id, limit, offset)?,
            total: self.conflict_repo.count_latest(organization_id, job_id)?,
            limit,
            offset,
        })
    }

    /// 逐条处理冲突（追加一行，最新一行生效）
    #[instrument(skip(self, decision), fields(record = %record_ref))]
    pub async fn resolve_conflict(
        &self,
        organization_id: &str,
        job_id: &str,
        record_ref: RecordRef,
        decision: ConflictOverride,
    ) -> MigrationResult<ConflictRecord> {
        let lock = self.scheduler.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = self.load_job(organization_id, job_id)?;
        if job.status != JobStatus::Validated {
            return Err(MigrationError::InvalidRequest(format!(
                "仅 validated 作业可处理冲突，当前状态 {}",
                job.status
            )));
        }
        let latest = self
            .conflict_repo
            .find_all_latest(organization_id, job_id)?
            .into_iter()
            .find(|r| r.record_ref == record_ref)
            .ok_or_else(|| {
                MigrationError::InvalidRequest(format!("记录 {} 没有冲突可处理", record_ref))
            })?;

        let existing_target_id = match decision.resolution {
            Resolution::Update if latest.candidate_ids.len() > 1 => {
                let chosen = decision
                    .existing_target_id
                    .clone()
                    .filter(|id| latest.candidate_ids.contains(id))
                    .ok_or_else(|| {
                        MigrationError::InvalidRequest(format!(
                            "记录 {} 匹配到多条已有记录，覆盖时必须指定其中一条",
                            record_ref
                        ))
                    })?;
                Some(chosen)
            }
            _ => decision
                .existing_target_id
                .clone()
                .or_else(|| latest.existing_target_id.clone()),
        };

        let record = ConflictRecord {
            conflict_id: Uuid::new_v4().to_string(),
            existing_target_id,
            applied_resolution: Some(decision.resolution),
            created_at: Utc::now(),
            ..latest
        };
        self.conflict_repo.insert(organization_id, &record)?;
        self.log_repo.insert(
            &MigrationLogEntry::new(
                organization_id,
                job_id,
                LogLevel::Info,
                LogOperation::Conflict,
                format!("冲突已处理: {}", decision.resolution),
            )
            .with_record(record_ref),
        )?;
        Ok(record)
    }

    // ==========================================
    // 取消 / 回滚
    // ==========================================

    /// 执行中: 设置取消标记，下一个批次边界生效；其他非终态: 直接取消
    #[instrument(skip(self))]
    pub async fn cancel(&self, organization_id: &str, job_id: &str) -> MigrationResult<MigrationJob> {
        let lock = self.scheduler.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = self.load_job(organization_id, job_id)?;
        if !job.status.can_transition_to(JobStatus::Cancelled) {
            return Err(MigrationError::transition(job.status, JobStatus::Cancelled));
        }

        if job.status == JobStatus::Running {
            if !self.job_repo.request_cancel(organization_id, job_id)? {
                let current = self.load_job(organization_id, job_id)?;
                return Err(MigrationError::transition(current.status, JobStatus::Cancelled));
            }
            self.log(&job, LogLevel::Info, LogOperation::Cancel, "已请求取消，将在批次边界停止")?;
        } else {
            self.job_repo
                .transition(organization_id, job_id, job.status, JobStatus::Cancelled)?;
            self.log(&job, LogLevel::Info, LogOperation::Cancel, "作业已取消")?;
        }
        self.load_job(organization_id, job_id)
    }

    #[instrument(skip(self))]
    pub async fn rollback(
        &self,
        organization_id: &str,
        job_id: &str,
        options: RollbackOptions,
    ) -> MigrationResult<RollbackReport> {
        let lock = self.scheduler.job_lock(job_id);
        let _guard = lock.lock().await;

        let job = self.load_job(organization_id, job_id)?;
        RollbackManager::new(self.conn.clone(), self.store.clone()).rollback(&job, options, Utc::now())
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 日志分页（新到旧）
    pub fn list_logs(
        &self,
        organization_id: &str,
        job_id: &str,
        query: &LogQuery,
    ) -> MigrationResult<Page<MigrationLogEntry>> {
        self.load_job(organization_id, job_id)?;
        Ok(Page {
            items: self.log_repo.query(organization_id, job_id, query)?,
            total: self.log_repo.count(organization_id, job_id, query)?,
            limit: query.limit,
            offset: query.offset,
        })
    }

    pub fn get_job_detail(&self, organization_id: &str, job_id: &str) -> MigrationResult<JobDetail> {
        let job = self.load_job(organization_id, job_id)?;
        let issue_counts = self
            .issue_repo
            .count_by_code(organization_id, job_id, job.validation_run)?;
        let recent_logs = self
            .log_repo
            .recent(organization_id, job_id, DETAIL_LOG_COUNT)?;
        Ok(JobDetail {
            progress: JobProgress::from_job(&job, Utc::now()),
            job,
            issue_counts,
            recent_logs,
        })
    }

    // ==========================================
    // 内部方法
    // ==========================================

    fn load_job(&self, organization_id: &str, job_id: &str) -> MigrationResult<MigrationJob> {
        self.job_repo
            .find_by_id(organization_id, job_id)?
            .ok_or_else(|| MigrationError::JobNotFound(job_id.to_string()))
    }

    fn load_schema(&self, job: &MigrationJob) -> MigrationResult<SourceSchema> {
        self.schema_repo
            .find(&job.organization_id, &job.job_id)?
            .ok_or_else(|| MigrationError::InvalidRequest("作业尚未上传源文件".to_string()))
    }

    async fn load_source(&self, job: &MigrationJob) -> MigrationResult<RecordSource> {
        let stored = self
            .blobs
            .get(&job.organization_id, &job.job_id)
            .await?
            .ok_or_else(|| MigrationError::InvalidRequest("作业尚未上传源文件".to_string()))?;
        Ok(RecordSource::new(stored.format, Arc::new(stored.bytes)))
    }

    /// 只读判定全部可导入的执行单元
    fn compute_preview(
        &self,
        job: &MigrationJob,
        compiled: &CompiledMappings,
        source: &RecordSource,
        overrides: &HashMap<RecordRef, ConflictRecord>,
    ) -> MigrationResult<Vec<ConflictRecord>> {
        let conn = self.get_conn()?;
        let resolver = ConflictResolver::new(self.store.as_ref());
        let mut rows = Vec::new();

        for record in source.records()? {
            let record = record?;
            for data_type in &job.target_data_types {
                let validated = Validator::validate_unit(&job.job_id, &record, *data_type, compiled);
                let blocked = validated.has_errors()
                    && (!job.best_effort
                        || validated
                            .error_fields()
                            .iter()
                            .any(|f| compiled.is_required(*data_type, f)));
                if blocked {
                    continue;
                }
                if let Some(row) =
                    resolver.preview(&conn, job, &validated, overrides.get(&validated.record_ref))?
                {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    fn log(
        &self,
        job: &MigrationJob,
        level: LogLevel,
        operation: LogOperation,
        message: impl Into<String>,
    ) -> MigrationResult<()> {
        self.log_repo.insert(&MigrationLogEntry::new(
            &job.organization_id,
            &job.job_id,
            level,
            operation,
            message,
        ))?;
        Ok(())
    }

    /// 记录中止当前操作的错误（作业状态不变）
    fn log_error(&self, job: &MigrationJob, operation: LogOperation, err: &MigrationError) -> MigrationResult<()> {
        self.log_repo.insert(
            &MigrationLogEntry::new(
                &job.organization_id,
                &job.job_id,
                LogLevel::Error,
                operation,
                err.to_string(),
            )
            .with_code(err.code()),
        )?;
        self.job_repo
            .record_error(&job.organization_id, &job.job_id, err.code(), &err.to_string())?;
        Ok(())
    }
}
