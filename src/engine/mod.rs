// ==========================================
// 数据迁移导入引擎 - 引擎层
// ==========================================
// 职责: 映射 / 校验 / 冲突判定 / 批次执行 / 回滚 / 作业编排
// 红线: Engine 不拼 SQL，数据访问全部经由 repository
// ==========================================

pub mod conflict_resolver;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod orchestrator;
pub mod rollback;
pub mod scheduler;
pub mod transform;
pub mod validator;

// 重导出核心引擎
pub use conflict_resolver::{Classification, ConflictResolver};
pub use error::{MigrationError, MigrationResult};
pub use executor::{ExecutionContext, ExecutionOutcome, ExecutionSummary, MigrationExecutor};
pub use mapping::MappingEngine;
pub use orchestrator::{JobDetail, JobOrchestrator, Page, UploadResult, ValidationReport};
pub use rollback::RollbackManager;
pub use scheduler::{ExecutionHandle, JobScheduler};
pub use transform::{TransformPipeline, TransformStep};
pub use validator::{CompiledMappings, ValidationOutcome, Validator};
