// ==========================================
// 数据迁移导入引擎 - 冲突记录仓储
// ==========================================
// 只追加: 同一记录可有多行
// - 最新一行: 当前冲突状态（预览 / 执行结果）
// - 最新一条 applied_resolution 非空的行: 生效的人工处理
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::validation::RecordRef;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{parse_enum_column, parse_json_column};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    conflict_id, job_id, record_ref, conflict_type, existing_target_id,
    candidate_ids_json, suggested_resolution, applied_resolution, reason, created_at
"#;

pub struct ConflictRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConflictRecordRepository {
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

    pub fn insert(&self, organization_id: &str, record: &ConflictRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, organization_id, record)
    }

    /// 批量写入（单事务）
    pub fn insert_batch(
        &self,
        organization_id: &str,
        records: &[ConflictRecord],
    ) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        for record in records {
            Self::insert_tx(&tx, organization_id, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn insert_tx(
        conn: &Connection,
        organization_id: &str,
        record: &ConflictRecord,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO conflict_record (
                conflict_id, organization_id, job_id, record_ref, conflict_type,
                existing_target_id, candidate_ids_json, suggested_resolution,
                applied_resolution, reason, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.conflict_id,
                organization_id,
                record.job_id,
                record.record_ref.to_string(),
                record.conflict_type.as_str(),
                record.existing_target_id,
                serde_json::to_string(&record.candidate_ids)?,
                record.suggested_resolution.map(|r| r.as_str()),
                record.applied_resolution.map(|r| r.as_str()),
                record.reason,
                record.created_at,
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 每条记录的最新冲突行（按首次出现顺序分页）
    pub fn list_latest(
        &self,
        organization_id: &str,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<ConflictRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM conflict_record c
            WHERE c.organization_id = ?1 AND c.job_id = ?2
              AND c.seq = (
                  SELECT MAX(c2.seq) FROM conflict_record c2
                  WHERE c2.organization_id = c.organization_id
                    AND c2.job_id = c.job_id
                    AND c2.record_ref = c.record_ref
              )
            ORDER BY c.seq
            LIMIT ?3 OFFSET ?4
            "#,
            SELECT_COLUMNS
        ))?;
        let records = stmt
            .query_map(
                params![organization_id, job_id, limit as i64, offset as i64],
                map_conflict_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// 有冲突记录的记录数
    pub fn count_latest(&self, organization_id: &str, job_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT record_ref) FROM conflict_record \
             WHERE organization_id = ?1 AND job_id = ?2",
            params![organization_id, job_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 全部记录的最新冲突行
    pub fn find_all_latest(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> RepositoryResult<Vec<ConflictRecord>> {
        self.list_latest(organization_id, job_id, i64::MAX as usize, 0)
    }

    /// 生效的人工处理（每条记录最新一条 applied_resolution 非空的行）
    pub fn find_overrides(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> RepositoryResult<HashMap<RecordRef, ConflictRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM conflict_record
            WHERE organization_id = ?1 AND job_id = ?2 AND applied_resolution IS NOT NULL
            ORDER BY seq
            "#,
            SELECT_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![organization_id, job_id], map_conflict_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // 按 seq 升序插入，后写覆盖先写
        Ok(records
            .into_iter()
            .map(|record| (record.record_ref, record))
            .collect())
    }
}

fn map_conflict_row(row: &Row) -> rusqlite::Result<ConflictRecord> {
    let record_ref: String = row.get(2)?;
    let suggested: Option<String> = row.get(6)?;
    let applied: Option<String> = row.get(7)?;
    Ok(ConflictRecord {
        conflict_id: row.get(0)?,
        job_id: row.get(1)?,
        record_ref: record_ref
            .parse::<RecordRef>()
            .map_err(|msg| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, msg.into()))?,
        conflict_type: parse_enum_column(3, &row.get::<_, String>(3)?)?,
        existing_target_id: row.get(4)?,
        candidate_ids: parse_json_column(5, &row.get::<_, String>(5)?)?,
        suggested_resolution: suggested
            .map(|s| parse_enum_column(6, &s))
            .transpose()?,
        applied_resolution: applied
            .map(|s| parse_enum_column(7, &s))
            .transpose()?,
        reason: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::target::TargetDataType;
    use crate::domain::types::{ConflictType, Resolution};
    use chrono::Utc;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        crate::repository::job_repo::seed_job(&conn, "org", "job");
        conn
    }

    fn record(row: usize, applied: Option<Resolution>) -> ConflictRecord {
        ConflictRecord {
            conflict_id: uuid::Uuid::new_v4().to_string(),
            job_id: "job".to_string(),
            record_ref: RecordRef::new(TargetDataType::Contact, row),
            conflict_type: ConflictType::Duplicate,
            existing_target_id: None,
            candidate_ids: vec!["e1".to_string(), "e2".to_string()],
            suggested_resolution: None,
            applied_resolution: applied,
            reason: "重复匹配".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_latest_row_per_record() {
        let repo = ConflictRecordRepository::new(setup_test_db());
        repo.insert_batch("org", &[record(1, None), record(2, None)])
            .unwrap();
        repo.insert("org", &record(1, Some(Resolution::Skip))).unwrap();

        let latest = repo.find_all_latest("org", "job").unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(repo.count_latest("org", "job").unwrap(), 2);

        let row1 = latest
            .iter()
            .find(|r| r.record_ref.row_number == 1)
            .unwrap();
        assert_eq!(row1.applied_resolution, Some(Resolution::Skip));
        assert_eq!(row1.candidate_ids.len(), 2);

        let page = repo.list_latest("org", "job", 1, 1).unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_override_survives_later_preview_row() {
        let repo = ConflictRecordRepository::new(setup_test_db());
        repo.insert("org", &record(1, Some(Resolution::CreateNew)))
            .unwrap();
        repo.insert("org", &record(1, None)).unwrap();

        let overrides = repo.find_overrides("org", "job").unwrap();
        let key = RecordRef::new(TargetDataType::Contact, 1);
        assert_eq!(
            overrides.get(&key).unwrap().applied_resolution,
            Some(Resolution::CreateNew)
        );
    }
}
