// ==========================================
// 数据迁移导入引擎 - 迁移执行器
// ==========================================
// 职责: 按固定批次写入目标数据
// 批次: 一个 SQLite 事务；每个执行单元一个 SAVEPOINT
//       写入 + 补偿记录 + 冲突记录 + 日志 + 计数器 同事务提交
// 红线: 行级错误隔离（回滚到保存点，计失败，继续）
// 红线: 致命错误中止作业，已提交批次不自动回退
// 取消 / 超时: 只在批次边界检查
// ==========================================

use crate::config::EngineConfig;
use crate::domain::conflict::{ConflictDecision, ConflictRecord};
use crate::domain::job::{JobCounters, MigrationJob};
use crate::domain::mapping::FieldMapping;
use crate::domain::migration_log::MigrationLogEntry;
use crate::domain::rollback::RollbackRecord;
use crate::domain::source::RawRecord;
use crate::domain::target::{TargetDataType, TargetEntity};
use crate::domain::types::{ConflictType, JobStatus, LogLevel, LogOperation, WriteOperation};
use crate::domain::validation::{RecordRef, ValidatedRecord};
use crate::engine::conflict_resolver::{find_reference, ConflictResolver};
use crate::engine::error::{MigrationError, MigrationResult};
use crate::engine::validator::{CompiledMappings, Validator};
use crate::importer::error::ImportResult;
use crate::importer::file_parser::RecordIter;
use crate::importer::source_adapter::RecordSource;
use crate::repository::conflict_repo::ConflictRecordRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::job_repo::{JobFinalization, MigrationJobRepository};
use crate::repository::log_repo::MigrationLogRepository;
use crate::repository::mapping_repo::MappingRepository;
use crate::repository::rollback_repo::RollbackRecordRepository;
use crate::repository::savepoint;
use crate::repository::target_repo::TargetStore;
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const UNIT_SAVEPOINT: &str = "migration_unit";

// ==========================================
// ExecutionContext - 一次执行的冻结输入
// ==========================================
pub struct ExecutionContext {
    pub job: MigrationJob,
    /// 执行期间冻结的映射集
    pub mappings: Vec<FieldMapping>,
    pub compiled: CompiledMappings,
    /// 每条记录生效的人工处理
    pub overrides: HashMap<RecordRef, ConflictRecord>,
    pub source: RecordSource,
}

/// 执行结束方式
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed,
    Cancelled,
    Failed(MigrationError),
}

/// 执行完成信号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub counters: JobCounters,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// 单元处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitOutcome {
    Succeeded,
    Skipped,
    Failed,
}

/// 执行单元 = (源记录, 目标数据类型)
#[derive(Debug, Clone)]
struct Unit {
    record: RawRecord,
    data_type: TargetDataType,
}

// ==========================================
// MigrationExecutor
// ==========================================
#[derive(Clone)]
pub struct MigrationExecutor {
    conn: Arc<Mutex<Connection>>,
    store: Arc<dyn TargetStore>,
    batch_size: usize,
    budget: Duration,
    rollback_window: chrono::Duration,
}

impl MigrationExecutor {
    pub fn new(conn: Arc<Mutex<Connection>>, store: Arc<dyn TargetStore>, config: &EngineConfig) -> Self {
        Self {
            conn,
            store,
            batch_size: config.batch_size.max(1),
            budget: config.execution_budget(),
            rollback_window: config.rollback_window(),
        }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 批次循环
    // ==========================================

    /// 顺序执行全部批次，直到完成 / 取消 / 失败
    #[instrument(skip(self, ctx), fields(job_id = %ctx.job.job_id))]
    pub async fn run(self: Arc<Self>, ctx: Arc<ExecutionContext>) -> ExecutionOutcome {
        let started = Instant::now();
        let job_repo = MigrationJobRepository::new(self.conn.clone());
        let org = ctx.job.organization_id.clone();
        let job_id = ctx.job.job_id.clone();
        let data_types: Vec<TargetDataType> = ctx.job.target_data_types.iter().copied().collect();

        let mut records = match ctx.source.records() {
            Ok(records) => records,
            Err(e) => return ExecutionOutcome::Failed(MigrationError::FatalExecution(e.to_string())),
        };
        let mut pending: VecDeque<Unit> = VecDeque::new();
        let mut committed = JobCounters::default();
        let mut batch_no = 0usize;

        loop {
            // 批次边界: 取消检查
            match job_repo.is_cancel_requested(&org, &job_id) {
                Ok(true) => {
                    info!(processed = committed.processed, "收到取消请求，停止于批次边界");
                    return ExecutionOutcome::Cancelled;
                }
                Ok(false) => {}
                Err(e) => return ExecutionOutcome::Failed(MigrationError::FatalExecution(e.to_string())),
            }

            let batch = match next_batch(&mut records, &data_types, &mut pending, self.batch_size) {
                Ok(batch) => batch,
                Err(e) => {
                    return ExecutionOutcome::Failed(MigrationError::FatalExecution(format!(
                        "读取源数据失败: {}",
                        e
                    )))
                }
            };
            if batch.is_empty() {
                info!(
                    batches = batch_no,
                    processed = committed.processed,
                    succeeded = committed.succeeded,
                    failed = committed.failed,
                    skipped = committed.skipped,
                    "全部批次执行完成"
                );
                return ExecutionOutcome::Completed;
            }
            batch_no += 1;

            // 批次写入在阻塞线程池中执行
            let executor = self.clone();
            let batch_ctx = ctx.clone();
            let result = tokio::task::spawn_blocking(move || {
                executor.process_batch(&batch_ctx, &batch, batch_no)
            })
            .await;

            match result {
                Ok(Ok(delta)) => committed.absorb(&delta),
                Ok(Err(e)) => {
                    error!(batch_no, error = %e, "批次遇到致命错误，本批次已回滚");
                    return ExecutionOutcome::Failed(MigrationError::FatalExecution(e.to_string()));
                }
                Err(e) => {
                    error!(batch_no, error = %e, "批次任务异常终止");
                    return ExecutionOutcome::Failed(MigrationError::FatalExecution(e.to_string()));
                }
            }

            // 批次边界: 墙钟预算检查
            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                warn!(elapsed_secs = elapsed.as_secs(), "超出执行预算");
                return ExecutionOutcome::Failed(MigrationError::Timeout {
                    elapsed_secs: elapsed.as_secs(),
                    budget_secs: self.budget.as_secs(),
                });
            }
        }
    }

    /// 处理一个批次（单事务），返回计数增量
    fn process_batch(
        &self,
        ctx: &ExecutionContext,
        batch: &[Unit],
        batch_no: usize,
    ) -> RepositoryResult<JobCounters> {
        let org = &ctx.job.organization_id;
        let job_id = &ctx.job.job_id;

        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut delta = JobCounters::default();
        for unit in batch {
            savepoint::begin(&tx, UNIT_SAVEPOINT)?;
            let outcome = match self.apply_unit(&tx, ctx, unit) {
                Ok(outcome) => {
                    savepoint::release(&tx, UNIT_SAVEPOINT)?;
                    outcome
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    savepoint::rollback_to(&tx, UNIT_SAVEPOINT)?;
                    let record_ref = RecordRef::new(unit.data_type, unit.record.row_number);
                    warn!(record = %record_ref, error = %e, "单条记录写入失败，已隔离");
                    MigrationLogRepository::insert_tx(
                        &tx,
                        &MigrationLogEntry::new(
                            org,
                            job_id,
                            LogLevel::Error,
                            LogOperation::Execute,
                            format!("写入失败: {}", e),
                        )
                        .with_record(record_ref)
                        .with_code("WRITE_FAILED"),
                    )?;
                    UnitOutcome::Failed
                }
            };

            delta.processed += 1;
            match outcome {
                UnitOutcome::Succeeded => delta.succeeded += 1,
                UnitOutcome::Skipped => delta.skipped += 1,
                UnitOutcome::Failed => delta.failed += 1,
            }
        }

        MigrationJobRepository::add_counters_tx(&tx, org, job_id, &delta)?;
        MigrationLogRepository::insert_tx(
            &tx,
            &MigrationLogEntry::new(
                org,
                job_id,
                LogLevel::Info,
                LogOperation::Execute,
                format!(
                    "批次 {} 完成: 处理 {}，成功 {}，失败 {}，跳过 {}",
                    batch_no, delta.processed, delta.succeeded, delta.failed, delta.skipped
                ),
            ),
        )?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        debug!(batch_no, processed = delta.processed, "批次已提交");
        Ok(delta)
    }

    // ==========================================
    // 单元处理
    // ==========================================

    fn apply_unit(
        &self,
        conn: &Connection,
        ctx: &ExecutionContext,
        unit: &Unit,
    ) -> RepositoryResult<UnitOutcome> {
        let job = &ctx.job;
        let validated = Validator::validate_unit(&job.job_id, &unit.record, unit.data_type, &ctx.compiled);

        // 校验错误: 非尽力导入，或错误落在必填 / 自然键字段 → 无法导入
        if validated.has_errors() {
            let blocking: Vec<&str> = validated
                .error_fields()
                .into_iter()
                .filter(|field| !job.best_effort || ctx.compiled.is_required(unit.data_type, field))
                .collect();
            if !blocking.is_empty() {
                let reason = format!("字段校验失败: {}", blocking.join(", "));
                self.record_validation_failure(conn, job, &validated, &reason)?;
                return Ok(UnitOutcome::Failed);
            }
        }

        let resolver = ConflictResolver::new(self.store.as_ref());
        let classification =
            resolver.classify(conn, job, &validated, ctx.overrides.get(&validated.record_ref))?;
        if let Some(record) = classification.to_conflict_record(job, &validated) {
            ConflictRecordRepository::insert_tx(conn, &job.organization_id, &record)?;
        }

        let outcome = match &classification.decision {
            ConflictDecision::Create => {
                let key = classification.natural_key.clone().unwrap_or_default();
                self.create_entity(conn, job, &validated, key)?;
                UnitOutcome::Succeeded
            }
            ConflictDecision::CreateNew { .. } => {
                let key = classification.natural_key.clone().unwrap_or_default();
                self.create_entity(conn, job, &validated, key)?;
                self.log_conflict(conn, job, &validated, "另建新记录")?;
                UnitOutcome::Succeeded
            }
            ConflictDecision::Update { existing_id, .. } => {
                self.update_entity(conn, job, &validated, existing_id)?;
                self.log_conflict(conn, job, &validated, "覆盖已有记录")?;
                UnitOutcome::Succeeded
            }
            ConflictDecision::Skip { .. } => {
                self.log_conflict(conn, job, &validated, "保留已有记录")?;
                UnitOutcome::Skipped
            }
            ConflictDecision::Unchanged { .. } => UnitOutcome::Skipped,
            ConflictDecision::Fail { code, reason } => {
                MigrationLogRepository::insert_tx(
                    conn,
                    &MigrationLogEntry::new(
                        &job.organization_id,
                        &job.job_id,
                        LogLevel::Error,
                        LogOperation::Conflict,
                        reason.clone(),
                    )
                    .with_record(validated.record_ref)
                    .with_code(*code),
                )?;
                UnitOutcome::Failed
            }
        };
        Ok(outcome)
    }

    fn create_entity(
        &self,
        conn: &Connection,
        job: &MigrationJob,
        validated: &ValidatedRecord,
        natural_key: String,
    ) -> RepositoryResult<()> {
        let now = Utc::now();
        let data_type = validated.record_ref.data_type;
        let parent_entity_id = find_reference(
            self.store.as_ref(),
            conn,
            &job.organization_id,
            data_type,
            &validated.values,
        )?;

        let entity = TargetEntity {
            entity_id: Uuid::new_v4().to_string(),
            organization_id: job.organization_id.clone(),
            entity_type: data_type,
            natural_key,
            fields: validated.values.clone(),
            parent_entity_id,
            created_by_job: Some(job.job_id.clone()),
            last_written_by_job: Some(job.job_id.clone()),
            created_at: now,
            updated_at: now,
        };
        self.store.insert(conn, &entity)?;

        RollbackRecordRepository::insert_tx(
            conn,
            &RollbackRecord {
                sequence: None,
                organization_id: job.organization_id.clone(),
                job_id: job.job_id.clone(),
                entity_type: data_type,
                entity_id: entity.entity_id,
                operation_type: WriteOperation::Create,
                pre_image: None,
                created_at: now,
            },
        )?;
        Ok(())
    }

    fn update_entity(
        &self,
        conn: &Connection,
        job: &MigrationJob,
        validated: &ValidatedRecord,
        existing_id: &str,
    ) -> RepositoryResult<()> {
        let now = Utc::now();
        let existing = self
            .store
            .find_by_id(conn, &job.organization_id, existing_id)?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "TargetEntity".to_string(),
                id: existing_id.to_string(),
            })?;

        // 更新前镜像: 完整实体快照
        let pre_image = match serde_json::to_value(&existing)? {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };

        let mut fields = existing.fields.clone();
        for (name, value) in &validated.values {
            fields.insert(name.clone(), value.clone());
        }
        self.store
            .update_fields(conn, &job.organization_id, existing_id, &fields, &job.job_id, now)?;

        RollbackRecordRepository::insert_tx(
            conn,
            &RollbackRecord {
                sequence: None,
                organization_id: job.organization_id.clone(),
                job_id: job.job_id.clone(),
                entity_type: existing.entity_type,
                entity_id: existing.entity_id.clone(),
                operation_type: WriteOperation::Update,
                pre_image: Some(pre_image),
                created_at: now,
            },
        )?;
        Ok(())
    }

    fn record_validation_failure(
        &self,
        conn: &Connection,
        job: &MigrationJob,
        validated: &ValidatedRecord,
        reason: &str,
    ) -> RepositoryResult<()> {
        ConflictRecordRepository::insert_tx(
            conn,
            &job.organization_id,
            &ConflictRecord {
                conflict_id: Uuid::new_v4().to_string(),
                job_id: job.job_id.clone(),
                record_ref: validated.record_ref,
                conflict_type: ConflictType::ValidationError,
                existing_target_id: None,
                candidate_ids: Vec::new(),
                suggested_resolution: None,
                applied_resolution: None,
                reason: reason.to_string(),
                created_at: Utc::now(),
            },
        )?;
        MigrationLogRepository::insert_tx(
            conn,
            &MigrationLogEntry::new(
                &job.organization_id,
                &job.job_id,
                LogLevel::Error,
                LogOperation::Execute,
                reason,
            )
            .with_record(validated.record_ref)
            .with_code("VALIDATION_FAILED"),
        )?;
        Ok(())
    }

    fn log_conflict(
        &self,
        conn: &Connection,
        job: &MigrationJob,
        validated: &ValidatedRecord,
        action: &str,
    ) -> RepositoryResult<()> {
        MigrationLogRepository::insert_tx(
            conn,
            &MigrationLogEntry::new(
                &job.organization_id,
                &job.job_id,
                LogLevel::Info,
                LogOperation::Conflict,
                format!("匹配到已有记录，{}", action),
            )
            .with_record(validated.record_ref),
        )?;
        Ok(())
    }

    // ==========================================
    // 收尾
    // ==========================================

    /// 写入终态（调用方持有作业锁）
    #[instrument(skip(self, ctx, outcome), fields(job_id = %ctx.job.job_id))]
    pub fn finish(
        &self,
        ctx: &ExecutionContext,
        outcome: ExecutionOutcome,
    ) -> MigrationResult<ExecutionSummary> {
        let org = &ctx.job.organization_id;
        let job_id = &ctx.job.job_id;
        let now = Utc::now();

        let (status, error) = match outcome {
            ExecutionOutcome::Completed => (JobStatus::Completed, None),
            ExecutionOutcome::Cancelled => (JobStatus::Cancelled, None),
            ExecutionOutcome::Failed(e) => (JobStatus::Failed, Some(e)),
        };
        let error_code = error.as_ref().map(|e| e.code().to_string());
        let error_message = error.as_ref().map(|e| e.to_string());

        let conn = self.get_conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        MigrationJobRepository::finalize_tx(
            &tx,
            org,
            job_id,
            &JobFinalization {
                status,
                completed_at: now,
                eligibility_window_end: (status == JobStatus::Completed)
                    .then(|| now + self.rollback_window),
                error_code: error_code.clone(),
                error_message: error_message.clone(),
            },
        )?;

        let entry = match (&status, &error) {
            (JobStatus::Completed, _) => {
                MappingRepository::record_history_tx(&tx, org, &ctx.job.source_type, &ctx.mappings)?;
                MigrationLogEntry::new(org, job_id, LogLevel::Info, LogOperation::Execute, "作业执行完成")
            }
            (_, Some(e)) => MigrationLogEntry::new(
                org,
                job_id,
                LogLevel::Error,
                LogOperation::Execute,
                format!("作业中止，已提交批次保留: {}", e),
            )
            .with_code(e.code()),
            _ => MigrationLogEntry::new(
                org,
                job_id,
                LogLevel::Warn,
                LogOperation::Cancel,
                "作业已在批次边界取消，已提交批次保留",
            ),
        };
        MigrationLogRepository::insert_tx(&tx, &entry)?;
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let job = MigrationJobRepository::find_by_id_tx(&conn, org, job_id)?
            .ok_or_else(|| MigrationError::JobNotFound(job_id.clone()))?;
        info!(
            status = %job.status,
            processed = job.counters.processed,
            succeeded = job.counters.succeeded,
            failed = job.counters.failed,
            skipped = job.counters.skipped,
            "作业收尾完成"
        );

        Ok(ExecutionSummary {
            job_id: job.job_id,
            status: job.status,
            counters: job.counters,
            error_code,
            error_message,
        })
    }
}

/// 从源记录流中取出下一批执行单元
fn next_batch(
    records: &mut RecordIter<'_>,
    data_types: &[TargetDataType],
    pending: &mut VecDeque<Unit>,
    size: usize,
) -> ImportResult<Vec<Unit>> {
    let mut batch = Vec::with_capacity(size);
    while batch.len() < size {
        if let Some(unit) = pending.pop_front() {
            batch.push(unit);
            continue;
        }
        match records.next() {
            None => break,
            Some(record) => {
                let record = record?;
                for data_type in data_types {
                    pending.push_back(Unit {
                        record: record.clone(),
                        data_type: *data_type,
                    });
                }
            }
        }
    }
    Ok(batch)
}
