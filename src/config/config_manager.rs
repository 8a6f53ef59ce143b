// ==========================================
// 数据迁移导入引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::warn;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 配置
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置；格式错误时回退默认值并告警
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + std::fmt::Display,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(
                    config_key = key,
                    raw_value = %raw,
                    default = %default,
                    "配置值格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }

    /// 加载引擎配置（默认值 + config_kv 覆写）
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        let d = EngineConfig::default();
        let config = EngineConfig {
            batch_size: self.get_parsed_or_default(config_keys::BATCH_SIZE, d.batch_size)?,
            max_columns: self.get_parsed_or_default(config_keys::MAX_COLUMNS, d.max_columns)?,
            max_upload_bytes: self
                .get_parsed_or_default(config_keys::MAX_UPLOAD_BYTES, d.max_upload_bytes)?,
            org_concurrency_quota: self.get_parsed_or_default(
                config_keys::ORG_CONCURRENCY_QUOTA,
                d.org_concurrency_quota,
            )?,
            execution_budget_secs: self.get_parsed_or_default(
                config_keys::EXECUTION_BUDGET_SECS,
                d.execution_budget_secs,
            )?,
            rollback_window_hours: self.get_parsed_or_default(
                config_keys::ROLLBACK_WINDOW_HOURS,
                d.rollback_window_hours,
            )?,
            suggestion_threshold: self.get_parsed_or_default(
                config_keys::SUGGESTION_THRESHOLD,
                d.suggestion_threshold,
            )?,
            inference_sample_rows: self.get_parsed_or_default(
                config_keys::INFERENCE_SAMPLE_ROWS,
                d.inference_sample_rows,
            )?,
            preview_row_count: self
                .get_parsed_or_default(config_keys::PREVIEW_ROW_COUNT, d.preview_row_count)?,
            log_page_size: self
                .get_parsed_or_default(config_keys::LOG_PAGE_SIZE, d.log_page_size)?,
        };

        // 零值会让批次 / 配额失效
        Ok(EngineConfig {
            batch_size: config.batch_size.max(1),
            org_concurrency_quota: config.org_concurrency_quota.max(1),
            log_page_size: config.log_page_size.clamp(1, 200),
            ..config
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const BATCH_SIZE: &str = "migration/batch_size";
    pub const MAX_COLUMNS: &str = "migration/max_columns";
    pub const MAX_UPLOAD_BYTES: &str = "migration/max_upload_bytes";
    pub const ORG_CONCURRENCY_QUOTA: &str = "migration/org_concurrency_quota";
    pub const EXECUTION_BUDGET_SECS: &str = "migration/execution_budget_secs";
    pub const ROLLBACK_WINDOW_HOURS: &str = "migration/rollback_window_hours";
    pub const SUGGESTION_THRESHOLD: &str = "migration/suggestion_threshold";
    pub const INFERENCE_SAMPLE_ROWS: &str = "migration/inference_sample_rows";
    pub const PREVIEW_ROW_COUNT: &str = "migration/preview_row_count";
    pub const LOG_PAGE_SIZE: &str = "migration/log_page_size";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_load_defaults_when_empty() {
        let manager = setup();
        assert_eq!(manager.load_engine_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_overrides_and_fallback() {
        let manager = setup();
        manager
            .set_global_config_value(config_keys::BATCH_SIZE, "25")
            .unwrap();
        manager
            .set_global_config_value(config_keys::SUGGESTION_THRESHOLD, "abc")
            .unwrap();
        manager
            .set_global_config_value(config_keys::ORG_CONCURRENCY_QUOTA, "0")
            .unwrap();

        let config = manager.load_engine_config().unwrap();
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.suggestion_threshold, 0.6);
        assert_eq!(config.org_concurrency_quota, 1);
    }
}
