// ==========================================
// 数据迁移导入引擎 - 源文件字节存储
// ==========================================
// 职责: 字节流提供方接口（文件存储机制由外部决定）
// 默认实现: SQLite BLOB，用于校验 / 执行阶段重新迭代记录
// ==========================================

use crate::domain::types::SourceFormat;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::parse_enum_column;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// 已保存的源文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSource {
    pub format: SourceFormat,
    pub bytes: Vec<u8>,
}

// ==========================================
// SourceBlobStore Trait
// ==========================================
#[async_trait]
pub trait SourceBlobStore: Send + Sync {
    /// 保存（覆盖）作业的源文件
    async fn put(
        &self,
        organization_id: &str,
        job_id: &str,
        format: SourceFormat,
        bytes: &[u8],
    ) -> RepositoryResult<()>;

    /// 读取作业的源文件
    async fn get(&self, organization_id: &str, job_id: &str)
        -> RepositoryResult<Option<StoredSource>>;
}

// ==========================================
// SqliteSourceBlobStore
// ==========================================
pub struct SqliteSourceBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSourceBlobStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

#[async_trait]
impl SourceBlobStore for SqliteSourceBlobStore {
    async fn put(
        &self,
        organization_id: &str,
        job_id: &str,
        format: SourceFormat,
        bytes: &[u8],
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO source_blob (organization_id, job_id, format, content, uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(organization_id, job_id) DO UPDATE SET
                format = excluded.format,
                content = excluded.content,
                uploaded_at = excluded.uploaded_at
            "#,
            params![organization_id, job_id, format.as_str(), bytes, Utc::now()],
        )?;
        Ok(())
    }

    async fn get(
        &self,
        organization_id: &str,
        job_id: &str,
    ) -> RepositoryResult<Option<StoredSource>> {
        let conn = self.get_conn()?;
        let stored = conn
            .query_row(
                "SELECT format, content FROM source_blob WHERE organization_id = ?1 AND job_id = ?2",
                params![organization_id, job_id],
                |row| {
                    Ok(StoredSource {
                        format: parse_enum_column(0, &row.get::<_, String>(0)?)?,
                        bytes: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        let store = SqliteSourceBlobStore::new(Arc::new(Mutex::new(conn)));

        store
            .put("org", "job", SourceFormat::Csv, b"a,b\n1,2\n")
            .await
            .unwrap();
        store
            .put("org", "job", SourceFormat::Json, b"[]")
            .await
            .unwrap();

        let stored = store.get("org", "job").await.unwrap().unwrap();
        assert_eq!(stored.format, SourceFormat::Json);
        assert_eq!(stored.bytes, b"[]".to_vec());
        assert!(store.get("org", "missing").await.unwrap().is_none());
    }
}
