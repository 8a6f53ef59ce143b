// ==========================================
// 数据迁移导入引擎 - 迁移日志仓储
// ==========================================
// 红线: 所有写入必须记录（只追加）
// 查询: 按级别 / 操作过滤，最新在前，分页
// ==========================================

use crate::domain::migration_log::{LogQuery, MigrationLogEntry};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::parse_enum_column;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::sync::{Arc, Mutex};

pub struct MigrationLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MigrationLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 插入日志，返回 log_id
    pub fn insert(&self, entry: &MigrationLogEntry) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, entry)
    }

    pub fn insert_tx(conn: &Connection, entry: &MigrationLogEntry) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO migration_log (
                organization_id, job_id, level, operation, message,
                record_ref, error_code, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                entry.organization_id,
                entry.job_id,
                entry.level.as_str(),
                entry.operation.as_str(),
                entry.message,
                entry.record_ref,
                entry.error_code,
                entry.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 批量插入
    pub fn batch_insert(&self, entries: &[MigrationLogEntry]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        for entry in entries {
            Self::insert_tx(&tx, entry)?;
        }
        tx.commit()?;
        Ok(entries.len())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 条件查询（最新在前）
    pub fn query(
        &self,
        organization_id: &str,
        job_id: &str,
        query: &LogQuery,
    ) -> RepositoryResult<Vec<MigrationLogEntry>> {
        let conn = self.get_conn()?;
        let (where_clause, mut values) = build_filter(organization_id, job_id, query);
        values.push(SqlValue::Integer(query.limit as i64));
        values.push(SqlValue::Integer(query.offset as i64));

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT log_id, organization_id, job_id, level, operation, message,
                   record_ref, error_code, created_at
            FROM migration_log
            WHERE {}
            ORDER BY log_id DESC
            LIMIT ? OFFSET ?
            "#,
            where_clause
        ))?;
        let entries = stmt
            .query_map(params_from_iter(values), map_log_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// 条件计数
    pub fn count(
        &self,
        organization_id: &str,
        job_id: &str,
        query: &LogQuery,
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let (where_clause, values) = build_filter(organization_id, job_id, query);
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM migration_log WHERE {}", where_clause),
            params_from_iter(values),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 最近 n 条日志
    pub fn recent(
        &self,
        organization_id: &str,
        job_id: &str,
        n: usize,
    ) -> RepositoryResult<Vec<MigrationLogEntry>> {
        self.query(
            organization_id,
            job_id,
            &LogQuery {
                limit: n,
                ..LogQuery::default()
            },
        )
    }
}

fn build_filter(organization_id: &str, job_id: &str, query: &LogQuery) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["organization_id = ?", "job_id = ?"];
    let mut values = vec![
        SqlValue::Text(organization_id.to_string()),
        SqlValue::Text(job_id.to_string()),
    ];
    if let Some(level) = query.level {
        clauses.push("level = ?");
        values.push(SqlValue::Text(level.as_str().to_string()));
    }
    if let Some(operation) = query.operation {
        clauses.push("operation = ?");
        values.push(SqlValue::Text(operation.as_str().to_string()));
    }
    (clauses.join(" AND "), values)
}

fn map_log_row(row: &Row) -> rusqlite::Result<MigrationLogEntry> {
    Ok(MigrationLogEntry {
        log_id: Some(row.get(0)?),
        organization_id: row.get(1)?,
        job_id: row.get(2)?,
        level: parse_enum_column(3, &row.get::<_, String>(3)?)?,
        operation: parse_enum_column(4, &row.get::<_, String>(4)?)?,
        message: row.get(5)?,
        record_ref: row.get(6)?,
        error_code: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{LogLevel, LogOperation};

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        crate::repository::job_repo::seed_job(&conn, "org", "job");
        conn
    }

    fn entry(level: LogLevel, operation: LogOperation, message: &str) -> MigrationLogEntry {
        MigrationLogEntry::new("org", "job", level, operation, message)
    }

    #[test]
    fn test_insert_and_query_newest_first() {
        let repo = MigrationLogRepository::new(setup_test_db());
        repo.insert(&entry(LogLevel::Info, LogOperation::Create, "创建作业"))
            .unwrap();
        repo.batch_insert(&[
            entry(LogLevel::Error, LogOperation::Execute, "写入失败").with_code("TYPE_COERCION_FAILED"),
            entry(LogLevel::Info, LogOperation::Execute, "批次提交"),
        ])
        .unwrap();

        let all = repo.recent("org", "job", 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].message, "批次提交");
        assert!(all[0].log_id > all[1].log_id);
    }

    #[test]
    fn test_filter_and_pagination() {
        let repo = MigrationLogRepository::new(setup_test_db());
        for i in 0..5 {
            repo.insert(&entry(LogLevel::Info, LogOperation::Execute, &format!("批次 {}", i)))
                .unwrap();
        }
        repo.insert(&entry(LogLevel::Warn, LogOperation::Rollback, "跳过"))
            .unwrap();

        let query = LogQuery {
            level: Some(LogLevel::Info),
            operation: Some(LogOperation::Execute),
            limit: 2,
            offset: 2,
        };
        let page = repo.query("org", "job", &query).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message, "批次 2");
        assert_eq!(repo.count("org", "job", &query).unwrap(), 5);

        let other_job = repo.recent("org", "other", 10).unwrap();
        assert!(other_job.is_empty());
    }
}
