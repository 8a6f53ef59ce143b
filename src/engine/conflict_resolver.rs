// ==========================================
// 数据迁移导入引擎 - 冲突判定器
// ==========================================
// 职责: 计算自然键 → 查找已有目标数据 → 给出判定
// 红线: 禁止自动猜测（重复匹配无人工处理时记失败）
// 红线: 只读目标数据；仅产出 ConflictRecord 描述
// ==========================================

use crate::domain::conflict::{ConflictDecision, ConflictRecord};
use crate::domain::job::MigrationJob;
use crate::domain::target::{TargetDataType, TargetEntity};
use crate::domain::types::{ConflictType, ExecutionMode, Resolution};
use crate::domain::validation::ValidatedRecord;
use crate::repository::error::RepositoryResult;
use crate::repository::target_repo::TargetStore;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// 自然键分隔符（U+001F 单元分隔符）
pub const KEY_SEPARATOR: char = '\u{1F}';

/// 计算自然键；任一匹配字段缺失时返回 None
pub fn natural_key(values: &Map<String, JsonValue>, match_fields: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(match_fields.len());
    for field in match_fields {
        let part = normalize_key_part(values.get(field)?.as_str()?);
        if part.is_empty() {
            return None;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join(&KEY_SEPARATOR.to_string()))
}

/// 去空白 + 大小写折叠
pub fn normalize_key_part(value: &str) -> String {
    value.trim().to_lowercase()
}

// ==========================================
// Classification - 判定结果
// ==========================================
#[derive(Debug, Clone)]
pub struct Classification {
    pub decision: ConflictDecision,
    pub natural_key: Option<String>,
    pub candidates: Vec<TargetEntity>,
}

impl Classification {
    fn new(decision: ConflictDecision, natural_key: Option<String>, candidates: Vec<TargetEntity>) -> Self {
        Self {
            decision,
            natural_key,
            candidates,
        }
    }

    pub fn candidate_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|e| e.entity_id.clone()).collect()
    }

    /// 需要持久化 ConflictRecord 的判定
    ///
    /// 执行阶段: applied_resolution 为实际采用的处理；
    /// 重复匹配失败时 applied 为空，便于后续人工处理。
    pub fn to_conflict_record(&self, job: &MigrationJob, validated: &ValidatedRecord) -> Option<ConflictRecord> {
        let (conflict_type, existing, applied, reason) = match &self.decision {
            ConflictDecision::Create | ConflictDecision::Unchanged { .. } => return None,
            ConflictDecision::Skip { existing_id, conflict_type } => (
                *conflict_type,
                existing_id.clone(),
                Some(Resolution::Skip),
                "保留已有数据".to_string(),
            ),
            ConflictDecision::Update { existing_id, conflict_type } => (
                *conflict_type,
                Some(existing_id.clone()),
                Some(Resolution::Update),
                "覆盖已有数据".to_string(),
            ),
            ConflictDecision::CreateNew { existing_id, conflict_type } => (
                *conflict_type,
                existing_id.clone(),
                Some(Resolution::CreateNew),
                "另建新记录".to_string(),
            ),
            ConflictDecision::Fail { code, reason } => {
                let conflict_type = if *code == DUPLICATE_REQUIRES_RESOLUTION {
                    ConflictType::Duplicate
                } else {
                    ConflictType::ValidationError
                };
                (conflict_type, None, None, reason.clone())
            }
        };

        Some(ConflictRecord {
            conflict_id: Uuid::new_v4().to_string(),
            job_id: job.job_id.clone(),
            record_ref: validated.record_ref,
            conflict_type,
            existing_target_id: existing,
            candidate_ids: self.candidate_ids(),
            suggested_resolution: suggested_resolution(job, conflict_type),
            applied_resolution: applied,
            reason,
            created_at: Utc::now(),
        })
    }
}

/// 失败代码
pub const NATURAL_KEY_MISSING: &str = "NATURAL_KEY_MISSING";
pub const DUPLICATE_REQUIRES_RESOLUTION: &str = "DUPLICATE_REQUIRES_RESOLUTION";

/// 建议处理方式: 字段不一致按作业策略；重复匹配不给建议
fn suggested_resolution(job: &MigrationJob, conflict_type: ConflictType) -> Option<Resolution> {
    match conflict_type {
        ConflictType::Mismatch => Some(job.conflict_policy),
        ConflictType::Duplicate | ConflictType::ValidationError => None,
    }
}

// ==========================================
// ConflictResolver
// ==========================================
pub struct ConflictResolver<'a> {
    store: &'a dyn TargetStore,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(store: &'a dyn TargetStore) -> Self {
        Self { store }
    }

    /// 判定单个执行单元
    ///
    /// # 参数
    /// - conn: 调用方持有的连接（执行阶段为批次事务）
    /// - override_record: 该记录最新的人工处理（若有）
    pub fn classify(
        &self,
        conn: &Connection,
        job: &MigrationJob,
        validated: &ValidatedRecord,
        override_record: Option<&ConflictRecord>,
    ) -> RepositoryResult<Classification> {
        let data_type = validated.record_ref.data_type;
        let match_fields = job.match_fields_for(data_type);
        let Some(key) = natural_key(&validated.values, &match_fields) else {
            return Ok(Classification::new(
                ConflictDecision::Fail {
                    code: NATURAL_KEY_MISSING,
                    reason: format!("自然键字段缺失: {}", match_fields.join(", ")),
                },
                None,
                Vec::new(),
            ));
        };

        let matches = self
            .store
            .find_by_natural_key(conn, &job.organization_id, data_type, &key)?;
        let override_resolution = override_record.and_then(|r| r.applied_resolution);

        let decision = match matches.len() {
            0 => ConflictDecision::Create,
            1 => {
                let existing = &matches[0];
                if is_unchanged(&validated.values, existing) {
                    ConflictDecision::Unchanged {
                        existing_id: existing.entity_id.clone(),
                    }
                } else {
                    let existing_id = existing.entity_id.clone();
                    match override_resolution.unwrap_or(job.conflict_policy) {
                        Resolution::Skip => ConflictDecision::Skip {
                            existing_id: Some(existing_id),
                            conflict_type: ConflictType::Mismatch,
                        },
                        Resolution::Update => ConflictDecision::Update {
                            existing_id,
                            conflict_type: ConflictType::Mismatch,
                        },
                        Resolution::CreateNew => ConflictDecision::CreateNew {
                            existing_id: Some(existing_id),
                            conflict_type: ConflictType::Mismatch,
                        },
                    }
                }
            }
            n => match (override_resolution, override_record) {
                (Some(Resolution::Skip), _) => ConflictDecision::Skip {
                    existing_id: None,
                    conflict_type: ConflictType::Duplicate,
                },
                (Some(Resolution::CreateNew), _) => ConflictDecision::CreateNew {
                    existing_id: None,
                    conflict_type: ConflictType::Duplicate,
                },
                (Some(Resolution::Update), Some(record)) => {
                    match record
                        .existing_target_id
                        .as_ref()
                        .filter(|id| matches.iter().any(|e| &e.entity_id == *id))
                    {
                        Some(id) => ConflictDecision::Update {
                            existing_id: id.clone(),
                            conflict_type: ConflictType::Duplicate,
                        },
                        None => duplicate_failure(n, job.execution_mode),
                    }
                }
                _ => duplicate_failure(n, job.execution_mode),
            },
        };

        Ok(Classification::new(decision, Some(key), matches))
    }

    /// 交互模式预览: 只读判定，返回需要人工关注的冲突
    pub fn preview(
        &self,
        conn: &Connection,
        job: &MigrationJob,
        validated: &ValidatedRecord,
        override_record: Option<&ConflictRecord>,
    ) -> RepositoryResult<Option<ConflictRecord>> {
        let classification = self.classify(conn, job, validated, override_record)?;
        let record = match &classification.decision {
            ConflictDecision::Create
            | ConflictDecision::Unchanged { .. }
            | ConflictDecision::Fail {
                code: NATURAL_KEY_MISSING,
                ..
            } => None,
            decision => {
                let conflict_type = decision.conflict_type().unwrap_or(ConflictType::Duplicate);
                Some(ConflictRecord {
                    conflict_id: Uuid::new_v4().to_string(),
                    job_id: job.job_id.clone(),
                    record_ref: validated.record_ref,
                    conflict_type,
                    existing_target_id: override_record
                        .and_then(|r| r.existing_target_id.clone())
                        .or_else(|| {
                            classification
                                .candidates
                                .first()
                                .filter(|_| classification.candidates.len() == 1)
                                .map(|e| e.entity_id.clone())
                        }),
                    candidate_ids: classification.candidate_ids(),
                    suggested_resolution: suggested_resolution(job, conflict_type),
                    // 已有的人工处理随预览行延续
                    applied_resolution: override_record.and_then(|r| r.applied_resolution),
                    reason: match conflict_type {
                        ConflictType::Duplicate => format!(
                            "{} 条已有记录匹配同一自然键",
                            classification.candidates.len()
                        ),
                        _ => "已有记录字段不一致".to_string(),
                    },
                    created_at: Utc::now(),
                })
            }
        };
        Ok(record)
    }
}

fn duplicate_failure(matches: usize, mode: ExecutionMode) -> ConflictDecision {
    ConflictDecision::Fail {
        code: DUPLICATE_REQUIRES_RESOLUTION,
        reason: match mode {
            ExecutionMode::Unattended => {
                format!("{} 条已有记录匹配同一自然键，无人值守模式不自动处理", matches)
            }
            ExecutionMode::Interactive => {
                format!("{} 条已有记录匹配同一自然键，需要人工处理", matches)
            }
        },
    }
}

/// 传入的每个字段值都与已有实体一致
fn is_unchanged(values: &Map<String, JsonValue>, existing: &TargetEntity) -> bool {
    values
        .iter()
        .all(|(field, value)| existing.fields.get(field) == Some(value))
}

/// 引用字段指向的实体（凭证 → 总账科目）
pub fn find_reference(
    store: &dyn TargetStore,
    conn: &Connection,
    organization_id: &str,
    data_type: TargetDataType,
    values: &Map<String, JsonValue>,
) -> RepositoryResult<Option<String>> {
    let Some(spec) = data_type.reference_field() else {
        return Ok(None);
    };
    let (Some(referenced), Some(value)) = (spec.references, values.get(spec.name).and_then(|v| v.as_str())) else {
        return Ok(None);
    };
    let key = normalize_key_part(value);
    if key.is_empty() {
        return Ok(None);
    }
    let found = store.find_by_natural_key(conn, organization_id, referenced, &key)?;
    Ok(found.into_iter().next().map(|e| e.entity_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobCounters;
    use crate::domain::types::JobStatus;
    use crate::domain::validation::RecordRef;
    use crate::repository::target_repo::SqliteTargetStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        conn
    }

    fn job(policy: Resolution) -> MigrationJob {
        let now = Utc::now();
        MigrationJob {
            job_id: "job-2".to_string(),
            organization_id: "org".to_string(),
            name: "contacts".to_string(),
            source_type: "legacy".to_string(),
            target_data_types: [TargetDataType::Contact].into_iter().collect(),
            status: JobStatus::Running,
            conflict_policy: policy,
            execution_mode: ExecutionMode::Unattended,
            best_effort: false,
            match_fields: BTreeMap::new(),
            counters: JobCounters::default(),
            cancel_requested: false,
            validation_run: 1,
            eligibility_window_end: None,
            last_error_code: None,
            last_error_message: None,
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }

    fn contact(id: &str, code: &str, phone: &str) -> TargetEntity {
        let now = Utc::now();
        let mut fields = Map::new();
        fields.insert("code".to_string(), json!(code));
        fields.insert("name".to_string(), json!("Acme"));
        fields.insert("phone".to_string(), json!(phone));
        TargetEntity {
            entity_id: id.to_string(),
            organization_id: "org".to_string(),
            entity_type: TargetDataType::Contact,
            natural_key: code.to_lowercase(),
            fields,
            parent_entity_id: None,
            created_by_job: Some("job-1".to_string()),
            last_written_by_job: Some("job-1".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn unit(row: usize, code: &str, phone: &str) -> ValidatedRecord {
        let mut values = Map::new();
        values.insert("code".to_string(), json!(code));
        values.insert("name".to_string(), json!("Acme"));
        values.insert("phone".to_string(), json!(phone));
        ValidatedRecord {
            record_ref: RecordRef::new(TargetDataType::Contact, row),
            values,
            issues: vec![],
        }
    }

    fn override_row(resolution: Resolution, target: Option<&str>) -> ConflictRecord {
        ConflictRecord {
            conflict_id: "c".to_string(),
            job_id: "job-2".to_string(),
            record_ref: RecordRef::new(TargetDataType::Contact, 1),
            conflict_type: ConflictType::Duplicate,
            existing_target_id: target.map(|t| t.to_string()),
            candidate_ids: vec![],
            suggested_resolution: None,
            applied_resolution: Some(resolution),
            reason: "manual".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_natural_key_normalization() {
        let mut values = Map::new();
        values.insert("code".to_string(), json!("  AB-01 "));
        values.insert("email".to_string(), json!("X@Y.CN"));
        let fields = vec!["code".to_string(), "email".to_string()];
        assert_eq!(natural_key(&values, &fields).unwrap(), "ab-01\u{1F}x@y.cn");
        assert!(natural_key(&values, &["phone".to_string()]).is_none());
    }

    #[test]
    fn test_create_unchanged_and_mismatch() {
        let conn = setup();
        let store = SqliteTargetStore;
        store.insert(&conn, &contact("b", "B", "111")).unwrap();
        let resolver = ConflictResolver::new(&store);

        let create = resolver.classify(&conn, &job(Resolution::Update), &unit(1, "A", "1"), None).unwrap();
        assert_eq!(create.decision, ConflictDecision::Create);

        // 自然键大小写不敏感，字段值按原值比较
        let folded = resolver.classify(&conn, &job(Resolution::Update), &unit(2, "b", "111"), None).unwrap();
        assert!(matches!(folded.decision, ConflictDecision::Update { .. }));

        let unchanged = resolver.classify(&conn, &job(Resolution::Update), &unit(2, "B", "111"), None).unwrap();
        assert_eq!(
            unchanged.decision,
            ConflictDecision::Unchanged { existing_id: "b".to_string() }
        );

        let skip = resolver.classify(&conn, &job(Resolution::Skip), &unit(3, "B", "222"), None).unwrap();
        assert!(matches!(skip.decision, ConflictDecision::Skip { conflict_type: ConflictType::Mismatch, .. }));
    }

    #[test]
    fn test_duplicate_never_auto_resolved() {
        let conn = setup();
        let store = SqliteTargetStore;
        store.insert(&conn, &contact("d1", "D", "1")).unwrap();
        store.insert(&conn, &contact("d2", "D", "2")).unwrap();
        let resolver = ConflictResolver::new(&store);
        let job = job(Resolution::Update);

        let failed = resolver.classify(&conn, &job, &unit(1, "D", "3"), None).unwrap();
        assert!(matches!(
            failed.decision,
            ConflictDecision::Fail { code: DUPLICATE_REQUIRES_RESOLUTION, .. }
        ));
        assert_eq!(failed.candidates.len(), 2);

        // update 必须指定候选之一
        let bad = override_row(Resolution::Update, Some("elsewhere"));
        let still_failed = resolver.classify(&conn, &job, &unit(1, "D", "3"), Some(&bad)).unwrap();
        assert!(matches!(still_failed.decision, ConflictDecision::Fail { .. }));

        let good = override_row(Resolution::Update, Some("d2"));
        let update = resolver.classify(&conn, &job, &unit(1, "D", "3"), Some(&good)).unwrap();
        assert_eq!(
            update.decision,
            ConflictDecision::Update {
                existing_id: "d2".to_string(),
                conflict_type: ConflictType::Duplicate
            }
        );
    }

    #[test]
    fn test_preview_reports_duplicates_without_suggestion() {
        let conn = setup();
        let store = SqliteTargetStore;
        store.insert(&conn, &contact("d1", "D", "1")).unwrap();
        store.insert(&conn, &contact("d2", "D", "2")).unwrap();
        let resolver = ConflictResolver::new(&store);
        let mut job = job(Resolution::Skip);
        job.execution_mode = ExecutionMode::Interactive;

        let preview = resolver.preview(&conn, &job, &unit(1, "D", "9"), None).unwrap().unwrap();
        assert_eq!(preview.conflict_type, ConflictType::Duplicate);
        assert_eq!(preview.suggested_resolution, None);
        assert_eq!(preview.candidate_ids.len(), 2);
        assert!(resolver.preview(&conn, &job, &unit(2, "NEW", "9"), None).unwrap().is_none());
    }

    #[test]
    fn test_find_reference_for_voucher() {
        let conn = setup();
        let store = SqliteTargetStore;
        let mut ledger = contact("l1", "1001", "");
        ledger.entity_type = TargetDataType::Ledger;
        store.insert(&conn, &ledger).unwrap();

        let mut values = Map::new();
        values.insert("account_code".to_string(), json!("1001"));
        let found = find_reference(&store, &conn, "org", TargetDataType::Voucher, &values).unwrap();
        assert_eq!(found.as_deref(), Some("l1"));
        assert!(find_reference(&store, &conn, "org", TargetDataType::Contact, &values)
            .unwrap()
            .is_none());
    }
}
