// ==========================================
// 数据迁移导入引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
// 约定: 所有子表按 (organization_id, job_id) 访问
// ==========================================

pub mod conflict_repo;
pub mod error;
pub mod issue_repo;
pub mod job_repo;
pub mod log_repo;
pub mod mapping_repo;
pub mod rollback_repo;
pub mod row_utils;
pub mod savepoint;
pub mod schema_repo;
pub mod source_blob_repo;
pub mod target_repo;

// 重导出核心类型
pub use conflict_repo::ConflictRecordRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use issue_repo::ValidationIssueRepository;
pub use job_repo::{JobFinalization, MigrationJobRepository};
pub use log_repo::MigrationLogRepository;
pub use mapping_repo::{MappingHistoryEntry, MappingRepository};
pub use rollback_repo::RollbackRecordRepository;
pub use schema_repo::SourceSchemaRepository;
pub use source_blob_repo::{SourceBlobStore, SqliteSourceBlobStore, StoredSource};
pub use target_repo::{SqliteTargetStore, TargetStore};
