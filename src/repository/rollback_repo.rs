// ==========================================
// 数据迁移导入引擎 - 补偿记录仓储
// ==========================================
// 只追加: 每次成功写入一条；回滚时按 sequence 逆序回放
// ==========================================

use crate::domain::rollback::RollbackRecord;
use crate::repository::error::RepositoryResult;
use crate::repository::row_utils::{parse_enum_column, parse_json_column};
use rusqlite::{params, Connection};

pub struct RollbackRecordRepository;

impl RollbackRecordRepository {
    /// 写入补偿记录（与目标数据写入同一事务），返回 sequence
    pub fn insert_tx(conn: &Connection, record: &RollbackRecord) -> RepositoryResult<i64> {
        let pre_image = match &record.pre_image {
            Some(image) => Some(serde_json::to_string(image)?),
            None => None,
        };
        conn.execute(
            r#"
            INSERT INTO rollback_record (
                organization_id, job_id, entity_type, entity_id,
                operation_type, pre_image_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.organization_id,
                record.job_id,
                record.entity_type.as_str(),
                record.entity_id,
                record.operation_type.as_str(),
                pre_image,
                record.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 作业的补偿记录（sequence 逆序）
    pub fn find_by_job_desc(
        conn: &Connection,
        organization_id: &str,
        job_id: &str,
    ) -> RepositoryResult<Vec<RollbackRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT sequence, organization_id, job_id, entity_type, entity_id,
                   operation_type, pre_image_json, created_at
            FROM rollback_record
            WHERE organization_id = ?1 AND job_id = ?2
            ORDER BY sequence DESC
            "#,
        )?;
        let records = stmt
            .query_map(params![organization_id, job_id], |row| {
                let pre_image: Option<String> = row.get(6)?;
                Ok(RollbackRecord {
                    sequence: Some(row.get(0)?),
                    organization_id: row.get(1)?,
                    job_id: row.get(2)?,
                    entity_type: parse_enum_column(3, &row.get::<_, String>(3)?)?,
                    entity_id: row.get(4)?,
                    operation_type: parse_enum_column(5, &row.get::<_, String>(5)?)?,
                    pre_image: pre_image
                        .map(|raw| parse_json_column(6, &raw))
                        .transpose()?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::target::TargetDataType;
    use crate::domain::types::WriteOperation;
    use chrono::Utc;
    use serde_json::{json, Map};

    fn record(entity_id: &str, op: WriteOperation, pre: Option<Map<String, serde_json::Value>>) -> RollbackRecord {
        RollbackRecord {
            sequence: None,
            organization_id: "org".to_string(),
            job_id: "job".to_string(),
            entity_type: TargetDataType::Contact,
            entity_id: entity_id.to_string(),
            operation_type: op,
            pre_image: pre,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reverse_order_and_pre_image() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let conn = std::sync::Arc::new(std::sync::Mutex::new(conn));
        crate::repository::job_repo::seed_job(&conn, "org", "job");
        let conn = conn.lock().unwrap();

        let mut pre = Map::new();
        pre.insert("phone".to_string(), json!("111"));

        let s1 = RollbackRecordRepository::insert_tx(&conn, &record("a", WriteOperation::Create, None))
            .unwrap();
        let s2 = RollbackRecordRepository::insert_tx(
            &conn,
            &record("c", WriteOperation::Update, Some(pre.clone())),
        )
        .unwrap();
        assert!(s2 > s1);

        let records = RollbackRecordRepository::find_by_job_desc(&conn, "org", "job").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity_id, "c");
        assert_eq!(records[0].pre_image, Some(pre));
        assert_eq!(records[1].operation_type, WriteOperation::Create);
        assert!(records[1].pre_image.is_none());
    }
}
