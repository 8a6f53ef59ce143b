// ==========================================
// 数据迁移导入引擎 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键 / busy_timeout）
// - 统一建表脚本，所有子表按 (organization_id, job_id) 组织
// - 日志 / 校验问题 / 冲突 / 补偿记录 只追加
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "DATA_MIGRATION_DB_PATH";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表（幂等）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 打开数据库并确保表结构存在
pub fn open_and_init(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;

    if let Some(version) = read_schema_version(&conn)? {
        if version != CURRENT_SCHEMA_VERSION {
            tracing::warn!(
                db_version = version,
                expected = CURRENT_SCHEMA_VERSION,
                "数据库 schema_version 与当前代码不一致"
            );
        }
    }
    Ok(conn)
}

/// 默认数据库路径
///
/// 优先级: 环境变量 DATA_MIGRATION_DB_PATH → 用户数据目录 → 当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./data_migration.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("data-migration-engine");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("data_migration.db");
        }
    }
    path.to_string_lossy().to_string()
}

// ==========================================
// 建表脚本
// ==========================================
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS migration_job (
    job_id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    name TEXT NOT NULL,
    source_type TEXT NOT NULL,
    target_data_types TEXT NOT NULL,
    status TEXT NOT NULL,
    conflict_policy TEXT NOT NULL,
    execution_mode TEXT NOT NULL DEFAULT 'unattended',
    best_effort INTEGER NOT NULL DEFAULT 0,
    match_fields TEXT NOT NULL DEFAULT '{}',
    total_count INTEGER NOT NULL DEFAULT 0,
    processed_count INTEGER NOT NULL DEFAULT 0,
    succeeded_count INTEGER NOT NULL DEFAULT 0,
    failed_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    validation_run INTEGER NOT NULL DEFAULT 0,
    eligibility_window_end TEXT,
    last_error_code TEXT,
    last_error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_migration_job_org_status
    ON migration_job(organization_id, status);

CREATE TABLE IF NOT EXISTS source_blob (
    organization_id TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES migration_job(job_id),
    format TEXT NOT NULL,
    content BLOB NOT NULL,
    uploaded_at TEXT NOT NULL,
    PRIMARY KEY (organization_id, job_id)
);

CREATE TABLE IF NOT EXISTS source_schema (
    organization_id TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES migration_job(job_id),
    format TEXT NOT NULL,
    columns_json TEXT NOT NULL,
    record_count INTEGER NOT NULL,
    detected_at TEXT NOT NULL,
    PRIMARY KEY (organization_id, job_id)
);

CREATE TABLE IF NOT EXISTS field_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    organization_id TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES migration_job(job_id),
    mapping_version INTEGER NOT NULL,
    source_field TEXT NOT NULL,
    target_data_type TEXT NOT NULL,
    target_field TEXT NOT NULL,
    target_type TEXT NOT NULL,
    transforms_json TEXT NOT NULL DEFAULT '[]',
    validation_rule_json TEXT,
    required INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_field_mapping_job
    ON field_mapping(organization_id, job_id, mapping_version);

CREATE TABLE IF NOT EXISTS mapping_history (
    organization_id TEXT NOT NULL,
    source_type TEXT NOT NULL,
    target_data_type TEXT NOT NULL,
    source_field TEXT NOT NULL,
    target_field TEXT NOT NULL,
    success_count INTEGER NOT NULL DEFAULT 0,
    last_used_at TEXT NOT NULL,
    PRIMARY KEY (organization_id, source_type, target_data_type, source_field, target_field)
);

CREATE TABLE IF NOT EXISTS validation_issue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    organization_id TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES migration_job(job_id),
    validation_run INTEGER NOT NULL,
    row_number INTEGER NOT NULL,
    target_data_type TEXT NOT NULL,
    field TEXT NOT NULL,
    severity TEXT NOT NULL,
    code TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_validation_issue_run
    ON validation_issue(organization_id, job_id, validation_run);

CREATE TABLE IF NOT EXISTS conflict_record (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    conflict_id TEXT NOT NULL UNIQUE,
    organization_id TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES migration_job(job_id),
    record_ref TEXT NOT NULL,
    conflict_type TEXT NOT NULL,
    existing_target_id TEXT,
    candidate_ids_json TEXT NOT NULL DEFAULT '[]',
    suggested_resolution TEXT,
    applied_resolution TEXT,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conflict_record_job
    ON conflict_record(organization_id, job_id, record_ref);

CREATE TABLE IF NOT EXISTS migration_log (
    log_id INTEGER PRIMARY KEY AUTOINCREMENT,
    organization_id TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES migration_job(job_id),
    level TEXT NOT NULL,
    operation TEXT NOT NULL,
    message TEXT NOT NULL,
    record_ref TEXT,
    error_code TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_migration_log_job
    ON migration_log(organization_id, job_id, log_id);

CREATE TABLE IF NOT EXISTS rollback_record (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    organization_id TEXT NOT NULL,
    job_id TEXT NOT NULL REFERENCES migration_job(job_id),
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    operation_type TEXT NOT NULL,
    pre_image_json TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rollback_record_job
    ON rollback_record(organization_id, job_id, sequence);

CREATE TABLE IF NOT EXISTS target_entity (
    entity_id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    fields_json TEXT NOT NULL,
    parent_entity_id TEXT,
    created_by_job TEXT,
    last_written_by_job TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_target_entity_key
    ON target_entity(organization_id, entity_type, natural_key);
CREATE INDEX IF NOT EXISTS idx_target_entity_parent
    ON target_entity(organization_id, parent_entity_id);
"#;
