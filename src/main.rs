// ==========================================
// 数据迁移导入引擎 - 命令行入口
// ==========================================
// 用法: data-migration-engine <organization_id> <data_type> <file>...
// 每个文件一个作业: 上传 -> 采纳映射建议 -> 校验 -> 执行
// 数据库路径: DATA_MIGRATION_DB_PATH 或用户数据目录
// ==========================================

use anyhow::{anyhow, bail, Context};
use data_migration_engine::api::{MigrationApi, UploadRequest};
use data_migration_engine::db::get_default_db_path;
use data_migration_engine::domain::types::Resolution;
use data_migration_engine::domain::{NewJob, TargetDataType};
use data_migration_engine::{logging, ErrorResponse};
use std::collections::BTreeSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    tracing::info!("==================================================");
    tracing::info!("{} - 版本: {}", data_migration_engine::APP_NAME, data_migration_engine::VERSION);
    tracing::info!("==================================================");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("用法: data-migration-engine <organization_id> <data_type> <file>...");
    }
    let organization_id = args[0].as_str();
    let data_type: TargetDataType = args[1].parse().map_err(|e: String| anyhow!(e))?;

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);
    let api = MigrationApi::from_db_path(&db_path).map_err(|e| anyhow!(e.to_string()))?;

    let mut job_ids = Vec::new();
    for path in &args[2..] {
        match start_job(&api, organization_id, data_type, path).await {
            Ok(job_id) => {
                let running = api
                    .orchestrator()
                    .scheduler()
                    .running_count(organization_id);
                tracing::info!(job_id = %job_id, running, file = %path, "作业已启动");
                job_ids.push(job_id);
            }
            Err(e) => {
                let response = ErrorResponse::from(&e);
                tracing::error!(file = %path, code = %response.code, "{}", response.message);
            }
        }
    }

    let mut failed = 0usize;
    for job_id in job_ids {
        match api.wait_for_completion(organization_id, &job_id).await {
            Ok(summary) => tracing::info!(
                job_id = %summary.job_id,
                status = %summary.status,
                succeeded = summary.counters.succeeded,
                skipped = summary.counters.skipped,
                failed = summary.counters.failed,
                "作业结束"
            ),
            Err(e) => {
                failed += 1;
                tracing::error!(job_id = %job_id, code = e.code(), "{}", e);
            }
        }
    }

    if failed > 0 {
        bail!("{} 个作业执行失败", failed);
    }
    Ok(())
}

async fn start_job(
    api: &MigrationApi,
    organization_id: &str,
    data_type: TargetDataType,
    path: &str,
) -> data_migration_engine::ApiResult<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("读取文件失败: {}", path))
        .map_err(|e| data_migration_engine::ApiError::InvalidInput(format!("{:#}", e)))?;

    let created = api.create_job(
        organization_id,
        NewJob {
            name: path.to_string(),
            source_type: "file".to_string(),
            target_data_types: BTreeSet::from([data_type]),
            conflict_policy: Resolution::Skip,
            execution_mode: Default::default(),
            best_effort: false,
            match_fields: Default::default(),
        },
    )?;
    let job_id = created.job_id;

    api.upload(
        organization_id,
        &job_id,
        UploadRequest {
            bytes,
            declared_format: None,
        },
    )
    .await?;

    let mappings = api
        .suggest_mappings(organization_id, &job_id)?
        .iter()
        .filter_map(|s| s.to_mapping())
        .collect();
    api.put_mappings(organization_id, &job_id, mappings).await?;

    let report = api.validate(organization_id, &job_id).await?;
    tracing::info!(
        job_id = %job_id,
        valid = report.valid_count,
        invalid = report.invalid_count,
        "校验完成"
    );

    api.execute(organization_id, &job_id).await?;
    Ok(job_id)
}
