// ==========================================
// 数据迁移导入引擎 - 源 schema 仓储
// ==========================================
// 每个作业保存最近一次上传检测到的 schema（重新上传时覆盖）
// ==========================================

use crate::domain::source::SourceSchema;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{parse_enum_column, parse_json_column};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct SourceSchemaRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SourceSchemaRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 保存 schema（覆盖旧值）
    pub fn upsert(
        &self,
        organization_id: &str,
        job_id: &str,
        schema: &SourceSchema,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO source_schema (organization_id, job_id, format, columns_json, record_count, detected_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(organization_id, job_id) DO UPDATE SET
                format = excluded.format,
                columns_json = excluded.columns_json,
                record_count = excluded.record_count,
                detected_at = excluded.detected_at
            "#,
            params![
                organization_id,
                job_id,
                schema.format.as_str(),
                serde_json::to_string(&schema.columns)?,
                schema.record_count as i64,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn find(&self, organization_id: &str, job_id: &str) -> RepositoryResult<Option<SourceSchema>> {
        let conn = self.get_conn()?;
        let schema = conn
            .query_row(
                r#"
                SELECT format, columns_json, record_count
                FROM source_schema
                WHERE organization_id = ?1 AND job_id = ?2
                "#,
                params![organization_id, job_id],
                |row| {
                    Ok(SourceSchema {
                        format: parse_enum_column(0, &row.get::<_, String>(0)?)?,
                        columns: parse_json_column(1, &row.get::<_, String>(1)?)?,
                        record_count: row.get::<_, i64>(2)? as usize,
                    })
                },
            )
            .optional()?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::source::ColumnInfo;
    use crate::domain::types::{FieldType, SourceFormat};

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        // 仅测试 schema 表，关闭外键
        crate::db::init_schema(&conn).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_upsert_overwrites() {
        let repo = SourceSchemaRepository::new(setup_test_db());
        let mut schema = SourceSchema {
            format: SourceFormat::Csv,
            columns: vec![ColumnInfo {
                name: "code".to_string(),
                position: 0,
                inferred_type: FieldType::Text,
                samples: vec!["A".to_string()],
                empty_count: 0,
            }],
            record_count: 3,
        };
        repo.upsert("org", "job", &schema).unwrap();

        schema.format = SourceFormat::Json;
        schema.record_count = 7;
        repo.upsert("org", "job", &schema).unwrap();

        let found = repo.find("org", "job").unwrap().unwrap();
        assert_eq!(found, schema);
        assert!(repo.find("other", "job").unwrap().is_none());
    }
}
