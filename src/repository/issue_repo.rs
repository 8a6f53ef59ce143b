// ==========================================
// 数据迁移导入引擎 - 校验问题仓储
// ==========================================
// 只追加: 每次校验写入新的 validation_run，读取最新一轮
// ==========================================

use crate::domain::validation::{RecordRef, ValidationIssue};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::parse_enum_column;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub struct ValidationIssueRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ValidationIssueRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 批量写入一轮校验问题
    pub fn insert_run(
        &self,
        organization_id: &str,
        run: i64,
        issues: &[ValidationIssue],
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        let now = Utc::now();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO validation_issue (
                    organization_id, job_id, validation_run, row_number, target_data_type,
                    field, severity, code, message, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )?;
            for issue in issues {
                stmt.execute(params![
                    organization_id,
                    issue.job_id,
                    run,
                    issue.record_ref.row_number as i64,
                    issue.record_ref.data_type.as_str(),
                    issue.field,
                    issue.severity.as_str(),
                    issue.code,
                    issue.message,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(issues.len())
    }

    /// 指定轮次的问题，按 (行, 数据类型, 字段, 代码) 排序
    pub fn find_by_run(
        &self,
        organization_id: &str,
        job_id: &str,
        run: i64,
    ) -> RepositoryResult<Vec<ValidationIssue>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT job_id, row_number, target_data_type, field, severity, message, code
            FROM validation_issue
            WHERE organization_id = ?1 AND job_id = ?2 AND validation_run = ?3
            ORDER BY row_number, target_data_type, field, code, id
            "#,
        )?;
        let issues = stmt
            .query_map(params![organization_id, job_id, run], |row| {
                Ok(ValidationIssue {
                    job_id: row.get(0)?,
                    record_ref: RecordRef {
                        row_number: row.get::<_, i64>(1)? as usize,
                        data_type: parse_enum_column(2, &row.get::<_, String>(2)?)?,
                    },
                    field: row.get(3)?,
                    severity: parse_enum_column(4, &row.get::<_, String>(4)?)?,
                    message: row.get(5)?,
                    code: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(issues)
    }

    /// 指定轮次中含错误级问题的执行单元数
    pub fn count_invalid_units(
        &self,
        organization_id: &str,
        job_id: &str,
        run: i64,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM (
                SELECT DISTINCT row_number, target_data_type FROM validation_issue
                WHERE organization_id = ?1 AND job_id = ?2 AND validation_run = ?3
                  AND severity = 'error'
            )
            "#,
            params![organization_id, job_id, run],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 指定轮次按问题代码计数
    pub fn count_by_code(
        &self,
        organization_id: &str,
        job_id: &str,
        run: i64,
    ) -> RepositoryResult<BTreeMap<String, usize>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT code, COUNT(*) FROM validation_issue
            WHERE organization_id = ?1 AND job_id = ?2 AND validation_run = ?3
            GROUP BY code
            "#,
        )?;
        let rows = stmt
            .query_map(params![organization_id, job_id, run], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().collect())
    }
}
