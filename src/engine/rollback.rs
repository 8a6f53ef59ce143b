// ==========================================
// 数据迁移导入引擎 - 回滚管理器
// ==========================================
// 职责: 逆序回放补偿记录，撤销已完成作业的写入
// 前置: status == completed 且 now <= eligibility_window_end
// 预扫描: 任何改动前检查阻断记录
//   - 新建: 存在其他作业创建的依赖实体，或已被其他作业改写
//   - 更新: 实体最后写入作业不是本作业（已恢复为前镜像的视为已撤销）
// 回放: 单事务，每条补偿记录一个 SAVEPOINT
// 红线: 存在失败时作业保持 completed（可安全重试）
// ==========================================

use crate::domain::job::MigrationJob;
use crate::domain::migration_log::MigrationLogEntry;
use crate::domain::rollback::{RollbackOptions, RollbackRecord, RollbackReport};
use crate::domain::target::TargetEntity;
use crate::domain::types::{JobStatus, LogLevel, LogOperation, WriteOperation};
use crate::engine::error::{MigrationError, MigrationResult};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::job_repo::MigrationJobRepository;
use crate::repository::log_repo::MigrationLogRepository;
use crate::repository::rollback_repo::RollbackRecordRepository;
use crate::repository::savepoint;
use crate::repository::target_repo::TargetStore;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};

const RECORD_SAVEPOINT: &str = "rollback_record";

/// 单条补偿结果
enum Compensation {
    Reverted,
    AlreadyMissing,
}

// ==========================================
// RollbackManager
// ==========================================
pub struct RollbackManager {
    conn: Arc<Mutex<Connection>>,
    store: Arc<dyn TargetStore>,
}

impl RollbackManager {
    pub fn new(conn: Arc<Mutex<Connection>>, store: Arc<dyn TargetStore>) -> Self {
        Self { conn, store }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 撤销作业写入（调用方持有作业锁）
    #[instrument(skip(self, job), fields(job_id = %job.job_id, skip_blocked = options.skip_blocked))]
    pub fn rollback(
        &self,
        job: &MigrationJob,
        options: RollbackOptions,
        now: DateTime<Utc>,
    ) -> MigrationResult<RollbackReport> {
        check_eligibility(job, now)?;

        let org = &job.organization_id;
        let job_id = &job.job_id;
        let conn = self.get_conn()?;

        let records = RollbackRecordRepository::find_by_job_desc(&conn, org, job_id)?;
        let blocked = self.scan_blocked(&conn, job, &records)?;

        if !blocked.is_empty() && !options.skip_blocked {
            let refs: Vec<String> = records
                .iter()
                .filter(|r| r.sequence.map_or(false, |s| blocked.contains(&s)))
                .map(describe)
                .collect();
            warn!(blocked = refs.len(), "存在后续作业依赖，回滚被拒绝");
            MigrationLogRepository::insert_tx(
                &conn,
                &MigrationLogEntry::new(
                    org,
                    job_id,
                    LogLevel::Error,
                    LogOperation::Rollback,
                    format!("回滚被阻断，{} 条写入已被后续作业依赖或改写", refs.len()),
                )
                .with_code("CONFLICT_DURING_ROLLBACK"),
            )?;
            return Err(MigrationError::ConflictDuringRollback { blocked: refs });
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let mut report = RollbackReport::default();
        for record in &records {
            if record.sequence.map_or(false, |s| blocked.contains(&s)) {
                report.skipped += 1;
                MigrationLogRepository::insert_tx(
                    &tx,
                    &MigrationLogEntry::new(
                        org,
                        job_id,
                        LogLevel::Warn,
                        LogOperation::Rollback,
                        format!("跳过被依赖的写入: {}", describe(record)),
                    ),
                )?;
                continue;
            }

            savepoint::begin(&tx, RECORD_SAVEPOINT)?;
            match self.compensate(&tx, record) {
                Ok(result) => {
                    savepoint::release(&tx, RECORD_SAVEPOINT)?;
                    report.reverted += 1;
                    if let Compensation::AlreadyMissing = result {
                        MigrationLogRepository::insert_tx(
                            &tx,
                            &MigrationLogEntry::new(
                                org,
                                job_id,
                                LogLevel::Warn,
                                LogOperation::Rollback,
                                format!("实体已不存在，视为已撤销: {}", describe(record)),
                            ),
                        )?;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    savepoint::rollback_to(&tx, RECORD_SAVEPOINT)?;
                    report.failed += 1;
                    warn!(entity_id = %record.entity_id, error = %e, "补偿失败");
                    MigrationLogRepository::insert_tx(
                        &tx,
                        &MigrationLogEntry::new(
                            org,
                            job_id,
                            LogLevel::Error,
                            LogOperation::Rollback,
                            format!("补偿失败 {}: {}", describe(record), e),
                        )
                        .with_code("ROLLBACK_FAILED"),
                    )?;
                }
            }
        }

        let summary = format!(
            "回滚结束: 撤销 {}，跳过 {}，失败 {}",
            report.reverted, report.skipped, report.failed
        );
        if report.failed == 0 {
            MigrationJobRepository::transition_tx(
                &tx,
                org,
                job_id,
                JobStatus::Completed,
                JobStatus::RolledBack,
            )?;
            MigrationLogRepository::insert_tx(
                &tx,
                &MigrationLogEntry::new(org, job_id, LogLevel::Info, LogOperation::Rollback, summary),
            )?;
        } else {
            MigrationLogRepository::insert_tx(
                &tx,
                &MigrationLogEntry::new(
                    org,
                    job_id,
                    LogLevel::Warn,
                    LogOperation::Rollback,
                    format!("{}，作业保持 completed，可重试", summary),
                ),
            )?;
        }
        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        info!(
            reverted = report.reverted,
            skipped = report.skipped,
            failed = report.failed,
            "回滚完成"
        );
        Ok(report)
    }

    /// 预扫描: 返回被阻断的补偿记录序号
    fn scan_blocked(
        &self,
        conn: &Connection,
        job: &MigrationJob,
        records: &[RollbackRecord],
    ) -> RepositoryResult<HashSet<i64>> {
        let mut blocked = HashSet::new();
        for record in records {
            let Some(sequence) = record.sequence else {
                continue;
            };
            let Some(current) =
                self.store
                    .find_by_id(conn, &job.organization_id, &record.entity_id)?
            else {
                continue;
            };
            if record.operation_type == WriteOperation::Update && matches_pre_image(record, &current) {
                continue;
            }

            let rewritten = current.last_written_by_job.as_deref() != Some(job.job_id.as_str());
            let has_dependents = record.operation_type == WriteOperation::Create
                && !self
                    .store
                    .find_dependents(conn, &job.organization_id, &record.entity_id, &job.job_id)?
                    .is_empty();

            if rewritten || has_dependents {
                blocked.insert(sequence);
            }
        }
        Ok(blocked)
    }

    /// 执行一条补偿
    fn compensate(&self, conn: &Connection, record: &RollbackRecord) -> RepositoryResult<Compensation> {
        match record.operation_type {
            WriteOperation::Create => {
                let existed = self
                    .store
                    .delete(conn, &record.organization_id, &record.entity_id)?;
                Ok(if existed {
                    Compensation::Reverted
                } else {
                    Compensation::AlreadyMissing
                })
            }
            WriteOperation::Update => {
                let image = record.pre_image.clone().ok_or_else(|| {
                    RepositoryError::InternalError(format!(
                        "更新记录缺少前镜像: {}",
                        record.entity_id
                    ))
                })?;
                let entity: TargetEntity = serde_json::from_value(JsonValue::Object(image))?;
                match self
                    .store
                    .find_by_id(conn, &record.organization_id, &record.entity_id)?
                {
                    Some(_) => self.store.restore(conn, &entity)?,
                    None => self.store.insert(conn, &entity)?,
                }
                Ok(Compensation::Reverted)
            }
        }
    }
}

/// 回滚资格检查
pub fn check_eligibility(job: &MigrationJob, now: DateTime<Utc>) -> MigrationResult<()> {
    if job.status != JobStatus::Completed {
        return Err(MigrationError::RollbackNotEligible(format!(
            "作业状态为 {}，仅 completed 作业可回滚",
            job.status
        )));
    }
    match job.eligibility_window_end {
        Some(end) if now <= end => Ok(()),
        Some(end) => Err(MigrationError::RollbackNotEligible(format!(
            "回滚窗口已于 {} 关闭",
            end.to_rfc3339()
        ))),
        None => Err(MigrationError::RollbackNotEligible(
            "作业没有回滚窗口".to_string(),
        )),
    }
}

/// 实体已是前镜像状态（上一次部分失败的回滚已恢复过）
fn matches_pre_image(record: &RollbackRecord, current: &TargetEntity) -> bool {
    let Some(image) = record.pre_image.clone() else {
        return false;
    };
    match serde_json::from_value::<TargetEntity>(JsonValue::Object(image)) {
        Ok(pre) => {
            pre.fields == current.fields
                && pre.last_written_by_job == current.last_written_by_job
                && pre.parent_entity_id == current.parent_entity_id
        }
        Err(_) => false,
    }
}

fn describe(record: &RollbackRecord) -> String {
    format!(
        "{}:{}:{}",
        record.operation_type.as_str(),
        record.entity_type.as_str(),
        record.entity_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobCounters;
    use crate::domain::target::TargetDataType;
    use crate::domain::types::{ExecutionMode, Resolution};
    use crate::repository::target_repo::SqliteTargetStore;
    use serde_json::{json, Map};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn completed_job(window_end: Option<DateTime<Utc>>) -> MigrationJob {
        let now = Utc::now();
        MigrationJob {
            job_id: "job-1".to_string(),
            organization_id: "org-1".to_string(),
            name: "rollback".to_string(),
            source_type: "legacy_erp".to_string(),
            target_data_types: [TargetDataType::Contact].into_iter().collect(),
            status: JobStatus::Completed,
            conflict_policy: Resolution::Update,
            execution_mode: ExecutionMode::Unattended,
            best_effort: false,
            match_fields: BTreeMap::new(),
            counters: JobCounters::default(),
            cancel_requested: false,
            validation_run: 1,
            eligibility_window_end: window_end,
            last_error_code: None,
            last_error_message: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: Some(now),
        }
    }

    fn contact(id: &str, phone: &str, job: &str) -> TargetEntity {
        let mut fields = Map::new();
        fields.insert("code".to_string(), json!(id));
        fields.insert("phone".to_string(), json!(phone));
        TargetEntity {
            entity_id: id.to_string(),
            organization_id: "org-1".to_string(),
            entity_type: TargetDataType::Contact,
            natural_key: id.to_lowercase(),
            fields,
            parent_entity_id: None,
            created_by_job: Some(job.to_string()),
            last_written_by_job: Some(job.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn setup(job: &MigrationJob) -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        MigrationJobRepository::new(conn.clone()).insert(job).unwrap();
        conn
    }

    fn write_log(conn: &Connection, op: WriteOperation, entity: &TargetEntity, pre: Option<&TargetEntity>) {
        RollbackRecordRepository::insert_tx(
            conn,
            &RollbackRecord {
                sequence: None,
                organization_id: "org-1".to_string(),
                job_id: "job-1".to_string(),
                entity_type: entity.entity_type,
                entity_id: entity.entity_id.clone(),
                operation_type: op,
                pre_image: pre.map(|e| match serde_json::to_value(e).unwrap() {
                    JsonValue::Object(map) => map,
                    _ => unreachable!(),
                }),
                created_at: Utc::now(),
            },
        )
        .unwrap();
    }

    #[test]
    fn test_eligibility_guards() {
        let now = Utc::now();
        assert!(check_eligibility(&completed_job(Some(now + chrono::Duration::hours(1))), now).is_ok());

        let expired = check_eligibility(&completed_job(Some(now - chrono::Duration::hours(1))), now);
        assert_eq!(expired.unwrap_err().code(), "ROLLBACK_NOT_ELIGIBLE");

        let mut running = completed_job(Some(now + chrono::Duration::hours(1)));
        running.status = JobStatus::Running;
        assert_eq!(
            check_eligibility(&running, now).unwrap_err().code(),
            "ROLLBACK_NOT_ELIGIBLE"
        );
    }

    #[test]
    fn test_rollback_restores_and_deletes() {
        let job = completed_job(Some(Utc::now() + chrono::Duration::hours(1)));
        let conn = setup(&job);
        let store = SqliteTargetStore;
        {
            let c = conn.lock().unwrap();
            let created = contact("A", "111", "job-1");
            store.insert(&c, &created).unwrap();
            write_log(&c, WriteOperation::Create, &created, None);

            let before = contact("C", "old", "job-0");
            let mut after = before.clone();
            after.fields.insert("phone".to_string(), json!("new"));
            after.last_written_by_job = Some("job-1".to_string());
            store.insert(&c, &after).unwrap();
            write_log(&c, WriteOperation::Update, &after, Some(&before));
        }

        let manager = RollbackManager::new(conn.clone(), Arc::new(SqliteTargetStore));
        let report = manager
            .rollback(&job, RollbackOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(report, RollbackReport { reverted: 2, skipped: 0, failed: 0 });

        let c = conn.lock().unwrap();
        assert!(store.find_by_id(&c, "org-1", "A").unwrap().is_none());
        let restored = store.find_by_id(&c, "org-1", "C").unwrap().unwrap();
        assert_eq!(restored.field_str("phone"), Some("old"));
        let job = MigrationJobRepository::find_by_id_tx(&c, "org-1", "job-1")
            .unwrap()
            .unwrap();
        assert_eq!(job.status, JobStatus::RolledBack);
    }

    #[test]
    fn test_rollback_missing_entity_is_tolerated() {
        let job = completed_job(Some(Utc::now() + chrono::Duration::hours(1)));
        let conn = setup(&job);
        {
            let c = conn.lock().unwrap();
            write_log(&c, WriteOperation::Create, &contact("GONE", "1", "job-1"), None);
        }

        let manager = RollbackManager::new(conn, Arc::new(SqliteTargetStore));
        let report = manager
            .rollback(&job, RollbackOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(report.reverted, 1);
        assert_eq!(report.failed, 0);
    }

    #[test]
    fn test_rollback_blocked_by_dependent() {
        let job = completed_job(Some(Utc::now() + chrono::Duration::hours(1)));
        let conn = setup(&job);
        let store = SqliteTargetStore;
        {
            let c = conn.lock().unwrap();
            let parent = contact("P", "1", "job-1");
            store.insert(&c, &parent).unwrap();
            write_log(&c, WriteOperation::Create, &parent, None);

            let mut child = contact("K", "2", "job-2");
            child.parent_entity_id = Some("P".to_string());
            store.insert(&c, &child).unwrap();
        }

        let manager = RollbackManager::new(conn.clone(), Arc::new(SqliteTargetStore));
        let err = manager
            .rollback(&job, RollbackOptions::default(), Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICT_DURING_ROLLBACK");
        {
            let c = conn.lock().unwrap();
            assert!(store.find_by_id(&c, "org-1", "P").unwrap().is_some());
        }

        let report = manager
            .rollback(&job, RollbackOptions { skip_blocked: true }, Utc::now())
            .unwrap();
        assert_eq!(report, RollbackReport { reverted: 0, skipped: 1, failed: 0 });
        let c = conn.lock().unwrap();
        assert!(store.find_by_id(&c, "org-1", "P").unwrap().is_some());
    }

    /// 首次删除失败，之后正常
    struct FlakyDeleteStore {
        inner: SqliteTargetStore,
        failed_once: AtomicBool,
    }

    impl TargetStore for FlakyDeleteStore {
        fn find_by_natural_key(
            &self,
            conn: &Connection,
            organization_id: &str,
            entity_type: TargetDataType,
            natural_key: &str,
        ) -> RepositoryResult<Vec<TargetEntity>> {
            self.inner
                .find_by_natural_key(conn, organization_id, entity_type, natural_key)
        }

        fn find_by_id(
            &self,
            conn: &Connection,
            organization_id: &str,
            entity_id: &str,
        ) -> RepositoryResult<Option<TargetEntity>> {
            self.inner.find_by_id(conn, organization_id, entity_id)
        }

        fn insert(&self, conn: &Connection, entity: &TargetEntity) -> RepositoryResult<()> {
            self.inner.insert(conn, entity)
        }

        fn update_fields(
            &self,
            conn: &Connection,
            organization_id: &str,
            entity_id: &str,
            fields: &Map<String, JsonValue>,
            job_id: &str,
            updated_at: DateTime<Utc>,
        ) -> RepositoryResult<()> {
            self.inner
                .update_fields(conn, organization_id, entity_id, fields, job_id, updated_at)
        }

        fn restore(&self, conn: &Connection, entity: &TargetEntity) -> RepositoryResult<()> {
            self.inner.restore(conn, entity)
        }

        fn delete(
            &self,
            conn: &Connection,
            organization_id: &str,
            entity_id: &str,
        ) -> RepositoryResult<bool> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(RepositoryError::DatabaseQueryError("delete rejected".to_string()));
            }
            self.inner.delete(conn, organization_id, entity_id)
        }

        fn find_dependents(
            &self,
            conn: &Connection,
            organization_id: &str,
            entity_id: &str,
            exclude_job_id: &str,
        ) -> RepositoryResult<Vec<TargetEntity>> {
            self.inner
                .find_dependents(conn, organization_id, entity_id, exclude_job_id)
        }
    }

    #[test]
    fn test_rollback_retry_after_partial_failure() {
        let job = completed_job(Some(Utc::now() + chrono::Duration::hours(1)));
        let conn = setup(&job);
        let store = SqliteTargetStore;
        {
            let c = conn.lock().unwrap();
            let created = contact("A", "111", "job-1");
            store.insert(&c, &created).unwrap();
            write_log(&c, WriteOperation::Create, &created, None);

            let before = contact("C", "old", "job-0");
            let mut after = before.clone();
            after.fields.insert("phone".to_string(), json!("new"));
            after.last_written_by_job = Some("job-1".to_string());
            store.insert(&c, &after).unwrap();
            write_log(&c, WriteOperation::Update, &after, Some(&before));
        }

        let manager = RollbackManager::new(
            conn.clone(),
            Arc::new(FlakyDeleteStore {
                inner: SqliteTargetStore,
                failed_once: AtomicBool::new(false),
            }),
        );
        let first = manager
            .rollback(&job, RollbackOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(first, RollbackReport { reverted: 1, skipped: 0, failed: 1 });
        {
            let c = conn.lock().unwrap();
            let current = MigrationJobRepository::find_by_id_tx(&c, "org-1", "job-1")
                .unwrap()
                .unwrap();
            assert_eq!(current.status, JobStatus::Completed);
            let restored = store.find_by_id(&c, "org-1", "C").unwrap().unwrap();
            assert_eq!(restored.last_written_by_job.as_deref(), Some("job-0"));
        }

        // 已恢复的更新不再视为被改写
        let retry = manager
            .rollback(&job, RollbackOptions::default(), Utc::now())
            .unwrap();
        assert_eq!(retry.failed, 0);
        assert_eq!(retry.skipped, 0);

        let c = conn.lock().unwrap();
        assert!(store.find_by_id(&c, "org-1", "A").unwrap().is_none());
        assert_eq!(
            store.find_by_id(&c, "org-1", "C").unwrap().unwrap().field_str("phone"),
            Some("old")
        );
        let current = MigrationJobRepository::find_by_id_tx(&c, "org-1", "job-1")
            .unwrap()
            .unwrap();
        assert_eq!(current.status, JobStatus::RolledBack);
    }
}
