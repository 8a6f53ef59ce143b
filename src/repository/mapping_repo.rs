// ==========================================
// 数据迁移导入引擎 - 字段映射仓储
// ==========================================
// 存储: field_mapping（按 mapping_version 追加）+ mapping_history（历史成功映射）
// 读取: 始终返回最新版本
// ==========================================

use crate::domain::mapping::FieldMapping;
use crate::domain::target::TargetDataType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{bool_to_sql, parse_enum_column, parse_json_column};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

/// 历史映射记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingHistoryEntry {
    pub source_field: String,
    pub target_field: String,
    pub success_count: i64,
}

pub struct MappingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MappingRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 映射版本
    // ==========================================

    /// 保存新版本映射集，返回版本号
    pub fn save_version(
        &self,
        organization_id: &str,
        job_id: &str,
        mappings: &[FieldMapping],
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(mapping_version), 0) + 1 FROM field_mapping \
             WHERE organization_id = ?1 AND job_id = ?2",
            params![organization_id, job_id],
            |row| row.get(0),
        )?;

        let now = Utc::now();
        for mapping in mappings {
            let rule_json = match &mapping.validation_rule {
                Some(rule) => Some(serde_json::to_string(rule)?),
                None => None,
            };
            tx.execute(
                r#"
                INSERT INTO field_mapping (
                    organization_id, job_id, mapping_version, source_field, target_data_type,
                    target_field, target_type, transforms_json, validation_rule_json, required, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    organization_id,
                    job_id,
                    version,
                    mapping.source_field,
                    mapping.target_data_type.as_str(),
                    mapping.target_field,
                    mapping.target_type.as_str(),
                    serde_json::to_string(&mapping.transforms)?,
                    rule_json,
                    bool_to_sql(mapping.required),
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(version)
    }

    /// 最新版本映射（无映射时返回空集合）
    pub fn find_latest(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> RepositoryResult<Vec<FieldMapping>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT source_field, target_data_type, target_field, target_type,
                   transforms_json, validation_rule_json, required
            FROM field_mapping
            WHERE organization_id = ?1 AND job_id = ?2
              AND mapping_version = (
                  SELECT MAX(mapping_version) FROM field_mapping
                  WHERE organization_id = ?1 AND job_id = ?2
              )
            ORDER BY id
            "#,
        )?;

        let mappings = stmt
            .query_map(params![organization_id, job_id], |row| {
                let rule: Option<String> = row.get(5)?;
                Ok(FieldMapping {
                    source_field: row.get(0)?,
                    target_data_type: parse_enum_column(1, &row.get::<_, String>(1)?)?,
                    target_field: row.get(2)?,
                    target_type: parse_enum_column(3, &row.get::<_, String>(3)?)?,
                    transforms: parse_json_column(4, &row.get::<_, String>(4)?)?,
                    validation_rule: match rule {
                        Some(raw) => Some(parse_json_column(5, &raw)?),
                        None => None,
                    },
                    required: row.get::<_, i64>(6)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mappings)
    }

    /// 最新映射版本号（0 表示尚未映射）
    pub fn latest_version(&self, organization_id: &str, job_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(mapping_version), 0) FROM field_mapping \
             WHERE organization_id = ?1 AND job_id = ?2",
            params![organization_id, job_id],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    // ==========================================
    // 历史映射
    // ==========================================

    /// 作业完成后累计成功映射
    pub fn record_history_tx(
        conn: &Connection,
        organization_id: &str,
        source_type: &str,
        mappings: &[FieldMapping],
    ) -> RepositoryResult<()> {
        let now = Utc::now();
        for mapping in mappings {
            conn.execute(
                r#"
                INSERT INTO mapping_history (
                    organization_id, source_type, target_data_type, source_field,
                    target_field, success_count, last_used_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
                ON CONFLICT(organization_id, source_type, target_data_type, source_field, target_field)
                DO UPDATE SET
                    success_count = success_count + 1,
                    last_used_at = excluded.last_used_at
                "#,
                params![
                    organization_id,
                    source_type,
                    mapping.target_data_type.as_str(),
                    mapping.source_field,
                    mapping.target_field,
                    now,
                ],
            )?;
        }
        Ok(())
    }

    /// 查询同组织 / 同来源系统 / 同数据类型的历史映射
    pub fn find_history(
        &self,
        organization_id: &str,
        source_type: &str,
        data_type: TargetDataType,
    ) -> RepositoryResult<Vec<MappingHistoryEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT source_field, target_field, success_count
            FROM mapping_history
            WHERE organization_id = ?1 AND source_type = ?2 AND target_data_type = ?3
            ORDER BY success_count DESC, source_field, target_field
            "#,
        )?;
        let entries = stmt
            .query_map(
                params![organization_id, source_type, data_type.as_str()],
                |row| {
                    Ok(MappingHistoryEntry {
                        source_field: row.get(0)?,
                        target_field: row.get(1)?,
                        success_count: row.get(2)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::{RuleKind, ValidationRule};
    use crate::domain::types::FieldType;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        crate::repository::job_repo::seed_job(&conn, "org", "job");
        conn
    }

    fn mapping(source: &str, target: &str) -> FieldMapping {
        FieldMapping {
            source_field: source.to_string(),
            target_data_type: TargetDataType::Contact,
            target_field: target.to_string(),
            target_type: FieldType::Text,
            transforms: vec!["trim".to_string()],
            validation_rule: None,
            required: true,
        }
    }

    #[test]
    fn test_versions_append_and_latest_wins() {
        let repo = MappingRepository::new(setup_test_db());
        assert_eq!(repo.latest_version("org", "job").unwrap(), 0);
        assert!(repo.find_latest("org", "job").unwrap().is_empty());

        repo.save_version("org", "job", &[mapping("客户编码", "code")])
            .unwrap();
        let mut email = mapping("邮箱", "email");
        email.required = false;
        email.validation_rule = Some(ValidationRule::warning(RuleKind::Email));
        let version = repo
            .save_version("org", "job", &[mapping("客户编码", "code"), email.clone()])
            .unwrap();

        assert_eq!(version, 2);
        let latest = repo.find_latest("org", "job").unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[1], email);
    }

    #[test]
    fn test_history_accumulates() {
        let db = setup_test_db();
        let repo = MappingRepository::new(db.clone());
        {
            let conn = db.lock().unwrap();
            let mappings = [mapping("cust_no", "code")];
            MappingRepository::record_history_tx(&conn, "org", "legacy", &mappings).unwrap();
            MappingRepository::record_history_tx(&conn, "org", "legacy", &mappings).unwrap();
        }

        let history = repo
            .find_history("org", "legacy", TargetDataType::Contact)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].success_count, 2);
        assert!(repo
            .find_history("org", "other", TargetDataType::Contact)
            .unwrap()
            .is_empty());
    }
}
