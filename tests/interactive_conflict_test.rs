// ==========================================
// 交互模式冲突处理集成测试
// ==========================================
// 测试目标: 重复匹配必须逐条处理后才能执行
// ==========================================

mod test_helpers;

use data_migration_engine::domain::conflict::ConflictOverride;
use data_migration_engine::domain::target::TargetDataType;
use data_migration_engine::domain::types::{ConflictType, ExecutionMode, JobStatus, Resolution};
use data_migration_engine::domain::RecordRef;
use data_migration_engine::engine::MigrationError;
use data_migration_engine::logging;
use test_helpers::*;

#[tokio::test]
async fn test_duplicates_block_interactive_execution_until_resolved() {
    logging::init_test();
    let (_temp_file, conn) = create_test_db();
    let orchestrator = create_orchestrator(&conn, test_config());

    seed_contact(&conn, "dup-a", "C0002", "Bob", "222");
    seed_contact(&conn, "dup-b", "c0002 ", "Bobby", "223");

    let mut request = new_job(&[TargetDataType::Contact], Resolution::Update);
    request.execution_mode = ExecutionMode::Interactive;
    let job_id = prepare_validated_job(
        &orchestrator,
        request,
        csv_bytes("code,name,phone", &["C0001,Alice,111", "C0002,Bob,999"]),
        contact_mappings(),
    )
    .await;

    // 未处理的重复匹配 → 拒绝执行，作业保持 validated
    let err = orchestrator.execute(ORG, &job_id).await.unwrap_err();
    match &err {
        MigrationError::ConflictRequiresResolution { record_refs } => {
            assert_eq!(record_refs, &vec!["contact#2".to_string()])
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        orchestrator.get_progress(ORG, &job_id).unwrap().status,
        JobStatus::Validated
    );

    let page = orchestrator.list_conflicts(ORG, &job_id, 50, 0).unwrap();
    assert_eq!(page.total, 1);
    let conflict = &page.items[0];
    assert_eq!(conflict.conflict_type, ConflictType::Duplicate);
    assert_eq!(conflict.candidate_ids.len(), 2);
    assert!(conflict.suggested_resolution.is_none(), "重复匹配不给出建议");
    assert!(!conflict.is_resolved());

    let record_ref = RecordRef::new(TargetDataType::Contact, 2);

    // 多候选覆盖必须指明目标
    let err = orchestrator
        .resolve_conflict(
            ORG,
            &job_id,
            record_ref,
            ConflictOverride {
                resolution: Resolution::Update,
                existing_target_id: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    let resolved = orchestrator
        .resolve_conflict(
            ORG,
            &job_id,
            record_ref,
            ConflictOverride {
                resolution: Resolution::Update,
                existing_target_id: Some("dup-b".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.applied_resolution, Some(Resolution::Update));
    assert_eq!(resolved.existing_target_id.as_deref(), Some("dup-b"));

    // 最新一行生效
    let page = orchestrator.list_conflicts(ORG, &job_id, 50, 0).unwrap();
    assert_eq!(page.total, 1);
    assert!(page.items[0].is_resolved());

    let summary = orchestrator
        .execute(ORG, &job_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.counters.succeeded, 2);
    assert_eq!(summary.counters.failed, 0);

    let contacts = list_entities(&conn, TargetDataType::Contact);
    assert_eq!(contacts.len(), 3);
    let chosen = contacts.iter().find(|e| e.entity_id == "dup-b").unwrap();
    assert_eq!(chosen.field_str("phone"), Some("999"));
    let other = contacts.iter().find(|e| e.entity_id == "dup-a").unwrap();
    assert_eq!(other.field_str("phone"), Some("222"));
}

#[tokio::test]
async fn test_preview_conflicts_reports_mismatch_with_policy_suggestion() {
    logging::init_test();
    let (_temp_file, conn) = create_test_db();
    let orchestrator = create_orchestrator(&conn, test_config());

    seed_contact(&conn, "existing", "C0001", "Alice", "111");

    let mut request = new_job(&[TargetDataType::Contact], Resolution::Skip);
    request.execution_mode = ExecutionMode::Interactive;
    let job = orchestrator.create_job(ORG, request).unwrap();

    // 校验前不能预览
    let err = orchestrator.preview_conflicts(ORG, &job.job_id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");
    orchestrator.cancel(ORG, &job.job_id).await.unwrap();

    let mut request = new_job(&[TargetDataType::Contact], Resolution::Skip);
    request.execution_mode = ExecutionMode::Interactive;
    let job_id = prepare_validated_job(
        &orchestrator,
        request,
        csv_bytes("code,name,phone", &["C0001,Alice,999", "C0002,Bob,222"]),
        contact_mappings(),
    )
    .await;

    let rows = orchestrator.preview_conflicts(ORG, &job_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].conflict_type, ConflictType::Mismatch);
    assert_eq!(rows[0].existing_target_id.as_deref(), Some("existing"));
    assert_eq!(rows[0].suggested_resolution, Some(Resolution::Skip));

    // 预览只读
    assert_eq!(list_entities(&conn, TargetDataType::Contact).len(), 1);

    // 不一致记录不阻断交互执行，按作业策略处理
    let summary = orchestrator
        .execute(ORG, &job_id)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.counters.succeeded, 1);
    assert_eq!(summary.counters.skipped, 1);
}
