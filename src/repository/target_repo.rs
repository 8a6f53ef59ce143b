// ==========================================
// 数据迁移导入引擎 - 目标数据仓储
// ==========================================
// 职责: 组织目标数据（总账科目/凭证/往来单位/存货）的读写
// 约束: 仅执行器与回滚管理器写入，且都在批次事务内
//       因此所有方法接收调用方持有的连接 / 事务
// ==========================================

use crate::domain::target::{TargetDataType, TargetEntity};
use crate::repository::error::RepositoryResult;
use crate::repository::row_utils::{parse_enum_column, parse_json_column};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value as JsonValue};

// ==========================================
// TargetStore Trait
// ==========================================
pub trait TargetStore: Send + Sync {
    /// 按自然键查找（可能多条）
    fn find_by_natural_key(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_type: TargetDataType,
        natural_key: &str,
    ) -> RepositoryResult<Vec<TargetEntity>>;

    fn find_by_id(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_id: &str,
    ) -> RepositoryResult<Option<TargetEntity>>;

    fn insert(&self, conn: &Connection, entity: &TargetEntity) -> RepositoryResult<()>;

    /// 覆盖字段并记录最后写入的作业
    fn update_fields(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_id: &str,
        fields: &Map<String, JsonValue>,
        job_id: &str,
        updated_at: DateTime<Utc>,
    ) -> RepositoryResult<()>;

    /// 以镜像整体恢复实体
    fn restore(&self, conn: &Connection, entity: &TargetEntity) -> RepositoryResult<()>;

    /// 删除实体，返回是否存在
    fn delete(&self, conn: &Connection, organization_id: &str, entity_id: &str)
        -> RepositoryResult<bool>;

    /// 依赖该实体、且由其他作业创建的实体
    fn find_dependents(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_id: &str,
        exclude_job_id: &str,
    ) -> RepositoryResult<Vec<TargetEntity>>;
}

const SELECT_COLUMNS: &str = r#"
    entity_id, organization_id, entity_type, natural_key, fields_json,
    parent_entity_id, created_by_job, last_written_by_job, created_at, updated_at
"#;

// ==========================================
// SqliteTargetStore
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteTargetStore;

impl SqliteTargetStore {
    /// 组织内某类目标数据的全部实体
    pub fn list_by_type(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_type: TargetDataType,
    ) -> RepositoryResult<Vec<TargetEntity>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM target_entity WHERE organization_id = ?1 AND entity_type = ?2 \
             ORDER BY created_at, entity_id",
            SELECT_COLUMNS
        ))?;
        let entities = stmt
            .query_map(params![organization_id, entity_type.as_str()], map_entity_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }
}

impl TargetStore for SqliteTargetStore {
    fn find_by_natural_key(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_type: TargetDataType,
        natural_key: &str,
    ) -> RepositoryResult<Vec<TargetEntity>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM target_entity \
             WHERE organization_id = ?1 AND entity_type = ?2 AND natural_key = ?3 \
             ORDER BY created_at, entity_id",
            SELECT_COLUMNS
        ))?;
        let entities = stmt
            .query_map(
                params![organization_id, entity_type.as_str(), natural_key],
                map_entity_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    fn find_by_id(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_id: &str,
    ) -> RepositoryResult<Option<TargetEntity>> {
        let entity = conn
            .query_row(
                &format!(
                    "SELECT {} FROM target_entity WHERE organization_id = ?1 AND entity_id = ?2",
                    SELECT_COLUMNS
                ),
                params![organization_id, entity_id],
                map_entity_row,
            )
            .optional()?;
        Ok(entity)
    }

    fn insert(&self, conn: &Connection, entity: &TargetEntity) -> RepositoryResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO target_entity ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                SELECT_COLUMNS
            ),
            params![
                entity.entity_id,
                entity.organization_id,
                entity.entity_type.as_str(),
                entity.natural_key,
                serde_json::to_string(&entity.fields)?,
                entity.parent_entity_id,
                entity.created_by_job,
                entity.last_written_by_job,
                entity.created_at,
                entity.updated_at,
            ],
        )?;
        Ok(())
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
        conn.execute(
            r#"
            UPDATE target_entity SET fields_json = ?1, last_written_by_job = ?2, updated_at = ?3
            WHERE organization_id = ?4 AND entity_id = ?5
            "#,
            params![
                serde_json::to_string(fields)?,
                job_id,
                updated_at,
                organization_id,
                entity_id
            ],
        )?;
        Ok(())
    }

    fn restore(&self, conn: &Connection, entity: &TargetEntity) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE target_entity SET
                natural_key = ?1, fields_json = ?2, parent_entity_id = ?3,
                created_by_job = ?4, last_written_by_job = ?5, updated_at = ?6
            WHERE organization_id = ?7 AND entity_id = ?8
            "#,
            params![
                entity.natural_key,
                serde_json::to_string(&entity.fields)?,
                entity.parent_entity_id,
                entity.created_by_job,
                entity.last_written_by_job,
                entity.updated_at,
                entity.organization_id,
                entity.entity_id,
            ],
        )?;
        Ok(())
    }

    fn delete(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_id: &str,
    ) -> RepositoryResult<bool> {
        let rows = conn.execute(
            "DELETE FROM target_entity WHERE organization_id = ?1 AND entity_id = ?2",
            params![organization_id, entity_id],
        )?;
        Ok(rows > 0)
    }

    fn find_dependents(
        &self,
        conn: &Connection,
        organization_id: &str,
        entity_id: &str,
        exclude_job_id: &str,
    ) -> RepositoryResult<Vec<TargetEntity>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM target_entity \
             WHERE organization_id = ?1 AND parent_entity_id = ?2 \
               AND COALESCE(created_by_job, '') <> ?3",
            SELECT_COLUMNS
        ))?;
        let entities = stmt
            .query_map(params![organization_id, entity_id, exclude_job_id], map_entity_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }
}

fn map_entity_row(row: &Row) -> rusqlite::Result<TargetEntity> {
    Ok(TargetEntity {
        entity_id: row.get(0)?,
        organization_id: row.get(1)?,
        entity_type: parse_enum_column(2, &row.get::<_, String>(2)?)?,
        natural_key: row.get(3)?,
        fields: parse_json_column(4, &row.get::<_, String>(4)?)?,
        parent_entity_id: row.get(5)?,
        created_by_job: row.get(6)?,
        last_written_by_job: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}
