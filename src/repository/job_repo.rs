// ==========================================
// 数据迁移导入引擎 - 迁移作业仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
// 红线: 仅 status 与计数器原地更新
// 状态更新采用 compare-and-set（WHERE status = 期望状态）
// ==========================================

use crate::domain::job::{JobCounters, MigrationJob};
use crate::domain::types::JobStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{bool_to_sql, parse_enum_column, parse_json_column};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    job_id, organization_id, name, source_type, target_data_types, status,
    conflict_policy, execution_mode, best_effort, match_fields,
    total_count, processed_count, succeeded_count, failed_count, skipped_count,
    cancel_requested, validation_run, eligibility_window_end,
    last_error_code, last_error_message, created_at, updated_at, started_at, completed_at
"#;

/// 作业收尾参数
#[derive(Debug, Clone)]
pub struct JobFinalization {
    pub status: JobStatus,
    pub completed_at: DateTime<Utc>,
    pub eligibility_window_end: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

// ==========================================
// MigrationJobRepository - 迁移作业仓储
// ==========================================
pub struct MigrationJobRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MigrationJobRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入作业
    pub fn insert(&self, job: &MigrationJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            &format!(
                "INSERT INTO migration_job ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                SELECT_COLUMNS
            ),
            params![
                job.job_id,
                job.organization_id,
                job.name,
                job.source_type,
                serde_json::to_string(&job.target_data_types)?,
                job.status.as_str(),
                job.conflict_policy.as_str(),
                job.execution_mode.as_str(),
                bool_to_sql(job.best_effort),
                serde_json::to_string(&job.match_fields)?,
                job.counters.total,
                job.counters.processed,
                job.counters.succeeded,
                job.counters.failed,
                job.counters.skipped,
                bool_to_sql(job.cancel_requested),
                job.validation_run,
                job.eligibility_window_end,
                job.last_error_code,
                job.last_error_message,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    /// 状态迁移（compare-and-set）
    pub fn transition(
        &self,
        organization_id: &str,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::transition_tx(&conn, organization_id, job_id, from, to)
    }

    /// 状态迁移（调用方持有连接 / 事务）
    pub fn transition_tx(
        conn: &Connection,
        organization_id: &str,
        job_id: &str,
        from: JobStatus,
        to: JobStatus,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE migration_job SET status = ?1, updated_at = ?2
            WHERE organization_id = ?3 AND job_id = ?4 AND status = ?5
            "#,
            params![to.as_str(), Utc::now(), organization_id, job_id, from.as_str()],
        )?;
        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// 进入执行: validated → running，写入总数与开始时间
    pub fn mark_running(
        &self,
        organization_id: &str,
        job_id: &str,
        total: i64,
        started_at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE migration_job SET
                status = 'running', total_count = ?1, processed_count = 0,
                succeeded_count = 0, failed_count = 0, skipped_count = 0,
                cancel_requested = 0, started_at = ?2, updated_at = ?2
            WHERE organization_id = ?3 AND job_id = ?4 AND status = 'validated'
            "#,
            params![total, started_at, organization_id, job_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: JobStatus::Validated.as_str().to_string(),
                to: JobStatus::Running.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// 叠加批次计数（与批次写入同一事务）
    pub fn add_counters_tx(
        conn: &Connection,
        organization_id: &str,
        job_id: &str,
        delta: &JobCounters,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE migration_job SET
                processed_count = processed_count + ?1,
                succeeded_count = succeeded_count + ?2,
                failed_count = failed_count + ?3,
                skipped_count = skipped_count + ?4,
                updated_at = ?5
            WHERE organization_id = ?6 AND job_id = ?7
            "#,
            params![
                delta.processed,
                delta.succeeded,
                delta.failed,
                delta.skipped,
                Utc::now(),
                organization_id,
                job_id,
            ],
        )?;
        Ok(())
    }

    /// 结束执行: running → completed / failed / cancelled
    pub fn finalize(
        &self,
        organization_id: &str,
        job_id: &str,
        finalization: &JobFinalization,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::finalize_tx(&conn, organization_id, job_id, finalization)
    }

    pub fn finalize_tx(
        conn: &Connection,
        organization_id: &str,
        job_id: &str,
        finalization: &JobFinalization,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE migration_job SET
                status = ?1, completed_at = ?2, updated_at = ?2,
                eligibility_window_end = ?3, last_error_code = ?4, last_error_message = ?5
            WHERE organization_id = ?6 AND job_id = ?7 AND status = 'running'
            "#,
            params![
                finalization.status.as_str(),
                finalization.completed_at,
                finalization.eligibility_window_end,
                finalization.error_code,
                finalization.error_message,
                organization_id,
                job_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: JobStatus::Running.as_str().to_string(),
                to: finalization.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// 请求取消（执行中的作业在下一个批次边界生效）
    pub fn request_cancel(&self, organization_id: &str, job_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"
            UPDATE migration_job SET cancel_requested = 1, updated_at = ?1
            WHERE organization_id = ?2 AND job_id = ?3 AND status = 'running'
            "#,
            params![Utc::now(), organization_id, job_id],
        )?;
        Ok(rows > 0)
    }

    /// 读取取消标记
    pub fn is_cancel_requested(&self, organization_id: &str, job_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let flag: Option<i64> = conn
            .query_row(
                "SELECT cancel_requested FROM migration_job WHERE organization_id = ?1 AND job_id = ?2",
                params![organization_id, job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    /// 递增校验轮次，返回新轮次
    pub fn next_validation_run(&self, organization_id: &str, job_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            UPDATE migration_job SET validation_run = validation_run + 1, updated_at = ?1
            WHERE organization_id = ?2 AND job_id = ?3
            "#,
            params![Utc::now(), organization_id, job_id],
        )?;
        let run: i64 = conn.query_row(
            "SELECT validation_run FROM migration_job WHERE organization_id = ?1 AND job_id = ?2",
            params![organization_id, job_id],
            |row| row.get(0),
        )?;
        Ok(run)
    }

    /// 记录最近一次错误（不改变状态）
    pub fn record_error(
        &self,
        organization_id: &str,
        job_id: &str,
        code: &str,
        message: &str,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            UPDATE migration_job SET last_error_code = ?1, last_error_message = ?2, updated_at = ?3
            WHERE organization_id = ?4 AND job_id = ?5
            "#,
            params![code, message, Utc::now(), organization_id, job_id],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 (组织, 作业) 查询；其他组织的作业视为不存在
    pub fn find_by_id(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> RepositoryResult<Option<MigrationJob>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, organization_id, job_id)
    }

    pub fn find_by_id_tx(
        conn: &Connection,
        organization_id: &str,
        job_id: &str,
    ) -> RepositoryResult<Option<MigrationJob>> {
        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM migration_job WHERE organization_id = ?1 AND job_id = ?2",
                    SELECT_COLUMNS
                ),
                params![organization_id, job_id],
                map_job_row,
            )
            .optional()?;
        Ok(job)
    }

    /// 查询组织下指定状态的作业
    pub fn list_by_status(
        &self,
        organization_id: &str,
        status: JobStatus,
    ) -> RepositoryResult<Vec<MigrationJob>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM migration_job WHERE organization_id = ?1 AND status = ?2 \
             ORDER BY created_at",
            SELECT_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![organization_id, status.as_str()], map_job_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

fn map_job_row(row: &Row) -> rusqlite::Result<MigrationJob> {
    Ok(MigrationJob {
        job_id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        source_type: row.get(3)?,
        target_data_types: parse_json_column(4, &row.get::<_, String>(4)?)?,
        status: parse_enum_column(5, &row.get::<_, String>(5)?)?,
        conflict_policy: parse_enum_column(6, &row.get::<_, String>(6)?)?,
        execution_mode: parse_enum_column(7, &row.get::<_, String>(7)?)?,
        best_effort: row.get::<_, i64>(8)? != 0,
        match_fields: parse_json_column(9, &row.get::<_, String>(9)?)?,
        counters: JobCounters {
            total: row.get(10)?,
            processed: row.get(11)?,
            succeeded: row.get(12)?,
            failed: row.get(13)?,
            skipped: row.get(14)?,
        },
        cancel_requested: row.get::<_, i64>(15)? != 0,
        validation_run: row.get(16)?,
        eligibility_window_end: row.get(17)?,
        last_error_code: row.get(18)?,
        last_error_message: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
        started_at: row.get(22)?,
        completed_at: row.get(23)?,
    })
}

// ==========================================
// 测试辅助: 子表测试需要先写入父作业
// ==========================================
#[cfg(test)]
pub(crate) fn sample_job(job_id: &str, org: &str) -> MigrationJob {
    let now = Utc::now();
    let mut match_fields = std::collections::BTreeMap::new();
    match_fields.insert(crate::domain::target::TargetDataType::Contact, vec!["email".to_string()]);
    MigrationJob {
        job_id: job_id.to_string(),
        organization_id: org.to_string(),
        name: "客户迁移".to_string(),
        source_type: "legacy_crm".to_string(),
        target_data_types: [crate::domain::target::TargetDataType::Contact, crate::domain::target::TargetDataType::Ledger]
            .into_iter()
            .collect(),
        status: JobStatus::Draft,
        conflict_policy: crate::domain::types::Resolution::Update,
        execution_mode: crate::domain::types::ExecutionMode::Interactive,
        best_effort: true,
        match_fields,
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
    }
}

#[cfg(test)]
pub(crate) fn seed_job(conn: &Arc<Mutex<Connection>>, organization_id: &str, job_id: &str) {
    MigrationJobRepository::new(conn.clone())
        .insert(&sample_job(job_id, organization_id))
        .unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::target::TargetDataType;
    use crate::domain::types::{ExecutionMode, Resolution};
    use std::collections::BTreeMap;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_insert_and_find_scoped_by_org() {
        let repo = MigrationJobRepository::new(setup_test_db());
        repo.insert(&sample_job("job-1", "org-a")).unwrap();

        let found = repo.find_by_id("org-a", "job-1").unwrap().unwrap();
        assert_eq!(found.name, "客户迁移");
        assert_eq!(found.conflict_policy, Resolution::Update);
        assert_eq!(found.execution_mode, ExecutionMode::Interactive);
        assert!(found.best_effort);
        assert_eq!(found.target_data_types.len(), 2);
        assert_eq!(found.match_fields_for(TargetDataType::Contact), vec!["email"]);

        assert!(repo.find_by_id("org-b", "job-1").unwrap().is_none());
    }

    #[test]
    fn test_transition_is_compare_and_set() {
        let repo = MigrationJobRepository::new(setup_test_db());
        repo.insert(&sample_job("job-1", "org-a")).unwrap();

        repo.transition("org-a", "job-1", JobStatus::Draft, JobStatus::Uploaded)
            .unwrap();
        let err = repo
            .transition("org-a", "job-1", JobStatus::Draft, JobStatus::Uploaded)
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_counters_and_finalize() {
        let db = setup_test_db();
        let repo = MigrationJobRepository::new(db.clone());
        let mut job = sample_job("job-1", "org-a");
        job.status = JobStatus::Validated;
        repo.insert(&job).unwrap();

        repo.mark_running("org-a", "job-1", 3, Utc::now()).unwrap();
        {
            let conn = db.lock().unwrap();
            let delta = JobCounters {
                total: 0,
                processed: 3,
                succeeded: 2,
                failed: 0,
                skipped: 1,
            };
            MigrationJobRepository::add_counters_tx(&conn, "org-a", "job-1", &delta).unwrap();
        }
        assert!(repo.request_cancel("org-a", "job-1").unwrap());
        assert!(repo.is_cancel_requested("org-a", "job-1").unwrap());

        repo.finalize(
            "org-a",
            "job-1",
            &JobFinalization {
                status: JobStatus::Completed,
                completed_at: Utc::now(),
                eligibility_window_end: Some(Utc::now()),
                error_code: None,
                error_message: None,
            },
        )
        .unwrap();

        let found = repo.find_by_id("org-a", "job-1").unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.counters.total, 3);
        assert!(found.counters.is_balanced());
        assert!(found.eligibility_window_end.is_some());
        assert!(!repo.request_cancel("org-a", "job-1").unwrap());
    }

    #[test]
    fn test_next_validation_run() {
        let repo = MigrationJobRepository::new(setup_test_db());
        repo.insert(&sample_job("job-1", "org-a")).unwrap();
        assert_eq!(repo.next_validation_run("org-a", "job-1").unwrap(), 1);
        assert_eq!(repo.next_validation_run("org-a", "job-1").unwrap(), 2);
    }
}
