// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、编排器构建、CSV 数据与映射构造、可注入故障的目标存储
// ==========================================

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use data_migration_engine::config::EngineConfig;
use data_migration_engine::db;
use data_migration_engine::domain::mapping::FieldMapping;
use data_migration_engine::domain::target::{TargetDataType, TargetEntity};
use data_migration_engine::domain::types::{ExecutionMode, FieldType, Resolution, SourceFormat};
use data_migration_engine::domain::NewJob;
use data_migration_engine::engine::JobOrchestrator;
use data_migration_engine::repository::error::{RepositoryError, RepositoryResult};
use data_migration_engine::repository::source_blob_repo::SqliteSourceBlobStore;
use data_migration_engine::repository::target_repo::{SqliteTargetStore, TargetStore};
use rusqlite::Connection;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;

pub const ORG: &str = "org-acme";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - Arc<Mutex<Connection>>: 共享连接
pub fn create_test_db() -> (NamedTempFile, Arc<Mutex<Connection>>) {
    let temp_file = NamedTempFile::new().expect("创建临时文件失败");
    let db_path = temp_file.path().to_str().unwrap().to_string();
    let conn = db::open_and_init(&db_path).expect("初始化数据库失败");
    (temp_file, Arc::new(Mutex::new(conn)))
}

/// 测试用配置（小批次，便于观察批次边界）
pub fn test_config() -> EngineConfig {
    EngineConfig {
        batch_size: 2,
        ..EngineConfig::default()
    }
}

pub fn create_orchestrator(conn: &Arc<Mutex<Connection>>, config: EngineConfig) -> JobOrchestrator {
    JobOrchestrator::new(conn.clone(), config)
}

pub fn create_orchestrator_with_store(
    conn: &Arc<Mutex<Connection>>,
    config: EngineConfig,
    store: Arc<dyn TargetStore>,
) -> JobOrchestrator {
    let blobs = Arc::new(SqliteSourceBlobStore::new(conn.clone()));
    JobOrchestrator::with_stores(conn.clone(), config, store, blobs)
}

// ==========================================
// 作业 / 数据构造
// ==========================================

pub fn new_job(data_types: &[TargetDataType], policy: Resolution) -> NewJob {
    NewJob {
        name: "legacy import".to_string(),
        source_type: "legacy_erp".to_string(),
        target_data_types: data_types.iter().copied().collect::<BTreeSet<_>>(),
        conflict_policy: policy,
        execution_mode: ExecutionMode::Unattended,
        best_effort: false,
        match_fields: Default::default(),
    }
}

/// CSV 字节（第一行表头）
pub fn csv_bytes(header: &str, rows: &[&str]) -> Vec<u8> {
    let mut text = String::from(header);
    for row in rows {
        text.push('\n');
        text.push_str(row);
    }
    text.push('\n');
    text.into_bytes()
}

/// 生成 n 条往来单位 CSV
pub fn contact_rows(n: usize) -> Vec<u8> {
    let rows: Vec<String> = (1..=n)
        .map(|i| format!("C{:04},Customer {},138{:08}", i, i, i))
        .collect();
    let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
    csv_bytes("code,name,phone", &refs)
}

pub fn mapping(data_type: TargetDataType, source: &str, target: &str) -> FieldMapping {
    FieldMapping {
        source_field: source.to_string(),
        target_data_type: data_type,
        target_field: target.to_string(),
        target_type: FieldType::Text,
        transforms: vec!["trim".to_string()],
        validation_rule: None,
        required: false,
    }
}

pub fn contact_mappings() -> Vec<FieldMapping> {
    vec![
        mapping(TargetDataType::Contact, "code", "code"),
        mapping(TargetDataType::Contact, "name", "name"),
        mapping(TargetDataType::Contact, "phone", "phone"),
    ]
}

/// 直接写入一条已有的往来单位
pub fn seed_contact(
    conn: &Arc<Mutex<Connection>>,
    entity_id: &str,
    code: &str,
    name: &str,
    phone: &str,
) -> TargetEntity {
    let mut fields = Map::new();
    fields.insert("code".to_string(), json!(code));
    fields.insert("name".to_string(), json!(name));
    fields.insert("phone".to_string(), json!(phone));
    let now = Utc::now();
    let entity = TargetEntity {
        entity_id: entity_id.to_string(),
        organization_id: ORG.to_string(),
        entity_type: TargetDataType::Contact,
        natural_key: code.trim().to_lowercase(),
        fields,
        parent_entity_id: None,
        created_by_job: None,
        last_written_by_job: None,
        created_at: now,
        updated_at: now,
    };
    let guard = conn.lock().unwrap();
    SqliteTargetStore.insert(&guard, &entity).unwrap();
    entity
}

pub fn list_entities(conn: &Arc<Mutex<Connection>>, data_type: TargetDataType) -> Vec<TargetEntity> {
    let guard = conn.lock().unwrap();
    SqliteTargetStore.list_by_type(&guard, ORG, data_type).unwrap()
}

/// 上传 → 映射 → 校验，返回作业 ID
pub async fn prepare_validated_job(
    orchestrator: &JobOrchestrator,
    request: NewJob,
    bytes: Vec<u8>,
    mappings: Vec<FieldMapping>,
) -> String {
    let job = orchestrator.create_job(ORG, request).unwrap();
    orchestrator
        .upload(ORG, &job.job_id, bytes, Some(SourceFormat::Csv))
        .await
        .unwrap();
    orchestrator
        .put_mappings(ORG, &job.job_id, mappings)
        .await
        .unwrap();
    orchestrator.validate(ORG, &job.job_id).await.unwrap();
    job.job_id
}

// ==========================================
// 可注入故障的目标存储
// ==========================================

/// 包装 SqliteTargetStore：第 fail_after 次之后的写入返回连接错误，可选写入延迟
pub struct FaultyTargetStore {
    inner: SqliteTargetStore,
    writes: AtomicUsize,
    fail_after: Option<usize>,
    delay: Duration,
}

impl FaultyTargetStore {
    pub fn failing_after(writes: usize) -> Self {
        Self {
            inner: SqliteTargetStore,
            writes: AtomicUsize::new(0),
            fail_after: Some(writes),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            inner: SqliteTargetStore,
            writes: AtomicUsize::new(0),
            fail_after: None,
            delay,
        }
    }

    fn before_write(&self) -> RepositoryResult<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let count = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fail_after {
            Some(limit) if count > limit => Err(RepositoryError::DatabaseConnectionError(
                "目标存储不可达".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

impl TargetStore for FaultyTargetStore {
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
        self.before_write()?;
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
        self.before_write()?;
        self.inner
            .update_fields(conn, organization_id, entity_id, fields, job_id, updated_at)
    }

    fn restore(&self, conn: &Connection, entity: &TargetEntity) -> RepositoryResult<()> {
        self.inner.restore(conn, entity)
    }

    fn delete(&self, conn: &Connection, organization_id: &str, entity_id: &str) -> RepositoryResult<bool> {
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
