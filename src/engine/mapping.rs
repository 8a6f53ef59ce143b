// ==========================================
// 数据迁移导入引擎 - 映射引擎
// ==========================================
// 职责: 自动建议映射（名称相似度 + 类型兼容 + 历史映射）
//       校验并规范化人工提交的映射集
// 约定: 置信度低于阈值时不做猜测（target_field 留空）
// ==========================================

use crate::domain::job::MigrationJob;
use crate::domain::mapping::{FieldMapping, MappingSuggestion};
use crate::domain::source::SourceSchema;
use crate::domain::target::{TargetDataType, TargetFieldSpec};
use crate::engine::error::{MigrationError, MigrationResult};
use crate::engine::validator::CompiledMappings;
use crate::repository::mapping_repo::MappingHistoryEntry;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// 置信度权重
const NAME_WEIGHT: f64 = 0.6;
const TYPE_WEIGHT: f64 = 0.25;
const HISTORY_WEIGHT: f64 = 0.15;
/// 命中历史映射时的置信度下限
const HISTORY_FLOOR: f64 = 0.9;
/// 名称包含关系的相似度
const CONTAINMENT_SCORE: f64 = 0.8;

pub struct MappingEngine {
    threshold: f64,
}

impl MappingEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    // ==========================================
    // 自动建议
    // ==========================================

    /// 为每个源列给出一条建议（贪心分配，每列 / 每个目标字段至多使用一次）
    pub fn suggest(
        &self,
        schema: &SourceSchema,
        data_type: TargetDataType,
        history: &[MappingHistoryEntry],
    ) -> Vec<MappingSuggestion> {
        let fields = data_type.fields();

        // (置信度, 列序, 字段序)
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        let mut best_per_column = vec![0.0_f64; schema.columns.len()];
        for (col_idx, column) in schema.columns.iter().enumerate() {
            for (field_idx, spec) in fields.iter().enumerate() {
                let name = name_score(&column.name, spec);
                let type_score = column.inferred_type.compatibility_with(spec.field_type);
                let from_history = history
                    .iter()
                    .any(|h| h.source_field == column.name && h.target_field == spec.name);

                let mut confidence = NAME_WEIGHT * name
                    + TYPE_WEIGHT * type_score
                    + if from_history { HISTORY_WEIGHT } else { 0.0 };
                if from_history {
                    confidence = confidence.max(HISTORY_FLOOR);
                }
                let confidence = round3(confidence.min(1.0));

                best_per_column[col_idx] = best_per_column[col_idx].max(confidence);
                candidates.push((confidence, col_idx, field_idx));
            }
        }

        candidates.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assigned: Vec<Option<(usize, f64)>> = vec![None; schema.columns.len()];
        let mut used_fields: HashSet<usize> = HashSet::new();
        for (confidence, col_idx, field_idx) in candidates {
            if confidence < self.threshold {
                break;
            }
            if assigned[col_idx].is_some() || used_fields.contains(&field_idx) {
                continue;
            }
            assigned[col_idx] = Some((field_idx, confidence));
            used_fields.insert(field_idx);
        }

        let suggestions: Vec<MappingSuggestion> = schema
            .columns
            .iter()
            .enumerate()
            .map(|(col_idx, column)| match assigned[col_idx] {
                Some((field_idx, confidence)) => {
                    let spec = &fields[field_idx];
                    MappingSuggestion {
                        source_field: column.name.clone(),
                        target_data_type: data_type,
                        target_field: Some(spec.name.to_string()),
                        target_type: Some(spec.field_type),
                        confidence,
                        required: spec.required,
                        transforms: vec!["trim".to_string()],
                    }
                }
                None => MappingSuggestion {
                    source_field: column.name.clone(),
                    target_data_type: data_type,
                    target_field: None,
                    target_type: None,
                    confidence: best_per_column[col_idx],
                    required: false,
                    transforms: vec!["trim".to_string()],
                },
            })
            .collect();

        debug!(
            data_type = %data_type,
            columns = schema.columns.len(),
            assigned = suggestions.iter().filter(|s| s.target_field.is_some()).count(),
            "映射建议完成"
        );
        suggestions
    }

    /// 按字段名命中数排序的候选数据类型（无命中的类型不返回）
    pub fn suggest_data_types(schema: &SourceSchema) -> Vec<TargetDataType> {
        let mut ranked: Vec<(usize, usize, TargetDataType)> = TargetDataType::ALL
            .iter()
            .enumerate()
            .map(|(order, data_type)| {
                let hits = data_type
                    .fields()
                    .iter()
                    .filter(|spec| schema.columns.iter().any(|c| name_score(&c.name, spec) >= 1.0))
                    .count();
                (hits, order, *data_type)
            })
            .filter(|(hits, _, _)| *hits > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, _, data_type)| data_type).collect()
    }

    // ==========================================
    // 人工映射校验
    // ==========================================

    /// 校验并规范化映射集（target_type / required 以目录为准）
    pub fn apply_overrides(
        &self,
        job: &MigrationJob,
        schema: &SourceSchema,
        mappings: Vec<FieldMapping>,
    ) -> MigrationResult<Vec<FieldMapping>> {
        let mut normalized = Vec::with_capacity(mappings.len());
        let mut targets: HashSet<(TargetDataType, String)> = HashSet::new();

        for mut mapping in mappings {
            let data_type = mapping.target_data_type;
            if !job.target_data_types.contains(&data_type) {
                return Err(MigrationError::Configuration(format!(
                    "作业未包含目标数据类型: {}",
                    data_type
                )));
            }
            let spec = data_type.field(&mapping.target_field).ok_or_else(|| {
                MigrationError::Configuration(format!(
                    "目标字段不存在: {}.{}",
                    data_type, mapping.target_field
                ))
            })?;
            if !targets.insert((data_type, mapping.target_field.clone())) {
                return Err(MigrationError::Configuration(format!(
                    "多个源字段映射到同一目标字段: {}.{}",
                    data_type, mapping.target_field
                )));
            }

            let match_fields = job.match_fields_for(data_type);
            mapping.target_type = spec.field_type;
            mapping.required = spec.required || match_fields.iter().any(|f| f == spec.name);
            normalized.push(mapping);
        }

        // 转换名 / 规则预编译
        CompiledMappings::compile(&normalized)?;

        Self::check_stale(schema, &normalized)?;

        // 每个数据类型的必填字段与自然键都必须映射
        for data_type in &job.target_data_types {
            let mut required: BTreeSet<String> = data_type
                .fields()
                .iter()
                .filter(|f| f.required)
                .map(|f| f.name.to_string())
                .collect();
            required.extend(job.match_fields_for(*data_type));

            let missing: Vec<String> = required
                .into_iter()
                .filter(|field| !targets.contains(&(*data_type, field.clone())))
                .collect();
            if !missing.is_empty() {
                return Err(MigrationError::Configuration(format!(
                    "{} 的必填字段未映射: {}",
                    data_type,
                    missing.join(", ")
                )));
            }
        }

        Ok(normalized)
    }

    /// 映射引用的源字段必须存在于当前 schema
    pub fn check_stale(schema: &SourceSchema, mappings: &[FieldMapping]) -> MigrationResult<()> {
        let mut missing: Vec<String> = Vec::new();
        for mapping in mappings {
            if !schema.has_column(&mapping.source_field) && !missing.contains(&mapping.source_field)
            {
                missing.push(mapping.source_field.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(MigrationError::MappingStale { missing })
        }
    }
}

// ==========================================
// 名称相似度
// ==========================================

/// 小写并仅保留字母数字（含中文）
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// 源列名与目标字段（含别名）的最佳相似度
fn name_score(column: &str, spec: &TargetFieldSpec) -> f64 {
    let column = normalize_name(column);
    if column.is_empty() {
        return 0.0;
    }
    std::iter::once(spec.name)
        .chain(spec.aliases.iter().copied())
        .map(|candidate| name_similarity(&column, &normalize_name(candidate)))
        .fold(0.0, f64::max)
}

/// 两个已规范化名称的相似度
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if shorter.chars().count() >= 3 && longer.contains(shorter) {
        return CONTAINMENT_SCORE;
    }
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// 字符级编辑距离
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobCounters;
    use crate::domain::source::ColumnInfo;
    use crate::domain::types::{ExecutionMode, FieldType, JobStatus, Resolution, SourceFormat};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn schema(columns: &[(&str, FieldType)]) -> SourceSchema {
        SourceSchema {
            format: SourceFormat::Csv,
            columns: columns
                .iter()
                .enumerate()
                .map(|(position, (name, inferred_type))| ColumnInfo {
                    name: name.to_string(),
                    position,
                    inferred_type: *inferred_type,
                    samples: vec![],
                    empty_count: 0,
                })
                .collect(),
            record_count: 3,
        }
    }

    fn contact_job() -> MigrationJob {
        let now = Utc::now();
        MigrationJob {
            job_id: "job".to_string(),
            organization_id: "org".to_string(),
            name: "contacts".to_string(),
            source_type: "legacy".to_string(),
            target_data_types: [TargetDataType::Contact].into_iter().collect(),
            status: JobStatus::Uploaded,
            conflict_policy: Resolution::Skip,
            execution_mode: ExecutionMode::Unattended,
            best_effort: false,
            match_fields: BTreeMap::new(),
            counters: JobCounters::default(),
            cancel_requested: false,
            validation_run: 0,
            eligibility_window_end: None,
            last_error_code: None,
            last_error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn mapping(source: &str, target: &str) -> FieldMapping {
        FieldMapping {
            source_field: source.to_string(),
            target_data_type: TargetDataType::Contact,
            target_field: target.to_string(),
            target_type: FieldType::Text,
            transforms: vec!["trim".to_string()],
            validation_rule: None,
            required: false,
        }
    }

    #[test]
    fn test_levenshtein_similarity() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(name_similarity("phone", "phone"), 1.0);
        assert_eq!(name_similarity("phone", "phonenumber"), 0.8);
        assert!(name_similarity("adress", "address") > 0.8);
        assert_eq!(normalize_name("Customer_Name"), "customername");
    }

    #[test]
    fn test_suggest_uses_aliases_and_leaves_unknown_unset() {
        let engine = MappingEngine::new(0.6);
        let schema = schema(&[
            ("客户编码", FieldType::Text),
            ("Customer Name", FieldType::Text),
            ("Mobile", FieldType::Integer),
            ("zzz", FieldType::Decimal),
        ]);
        let suggestions = engine.suggest(&schema, TargetDataType::Contact, &[]);

        assert_eq!(suggestions.len(), 4);
        assert_eq!(suggestions[0].target_field.as_deref(), Some("code"));
        assert_eq!(suggestions[1].target_field.as_deref(), Some("name"));
        assert_eq!(suggestions[2].target_field.as_deref(), Some("phone"));
        assert!(suggestions[3].target_field.is_none());
        assert!(suggestions[3].confidence < 0.6);
    }

    #[test]
    fn test_history_lifts_confidence() {
        let engine = MappingEngine::new(0.6);
        let schema = schema(&[("fld_07", FieldType::Text)]);
        let history = vec![MappingHistoryEntry {
            source_field: "fld_07".to_string(),
            target_field: "address".to_string(),
            success_count: 3,
        }];

        let without = engine.suggest(&schema, TargetDataType::Contact, &[]);
        assert!(without[0].target_field.is_none());

        let with = engine.suggest(&schema, TargetDataType::Contact, &history);
        assert_eq!(with[0].target_field.as_deref(), Some("address"));
        assert!(with[0].confidence >= 0.9);
    }

    #[test]
    fn test_suggest_data_types_ranked_by_hits() {
        let schema = schema(&[
            ("sku", FieldType::Text),
            ("item_name", FieldType::Text),
            ("qty", FieldType::Integer),
            ("email", FieldType::Text),
        ]);
        let types = MappingEngine::suggest_data_types(&schema);
        assert_eq!(types[0], TargetDataType::Inventory);
        assert!(types.contains(&TargetDataType::Contact));
        assert!(!types.contains(&TargetDataType::Voucher));
    }

    #[test]
    fn test_apply_overrides_normalizes_from_catalog() {
        let engine = MappingEngine::new(0.6);
        let schema = schema(&[("Code", FieldType::Text), ("Name", FieldType::Text)]);
        let mut code = mapping("Code", "code");
        code.target_type = FieldType::Integer;

        let normalized = engine
            .apply_overrides(&contact_job(), &schema, vec![code, mapping("Name", "name")])
            .unwrap();
        assert_eq!(normalized[0].target_type, FieldType::Text);
        assert!(normalized[0].required);
    }

    #[test]
    fn test_apply_overrides_rejections() {
        let engine = MappingEngine::new(0.6);
        let schema = schema(&[("Code", FieldType::Text), ("Name", FieldType::Text)]);
        let job = contact_job();

        // 必填字段未映射
        let err = engine
            .apply_overrides(&job, &schema, vec![mapping("Code", "code")])
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        // 目标字段冲突
        let err = engine
            .apply_overrides(
                &job,
                &schema,
                vec![mapping("Code", "code"), mapping("Name", "code")],
            )
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        // 未知转换
        let mut bad = mapping("Name", "name");
        bad.transforms = vec!["soundex".to_string()];
        let err = engine
            .apply_overrides(&job, &schema, vec![mapping("Code", "code"), bad])
            .unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");

        // 源字段已不存在
        let err = engine
            .apply_overrides(
                &job,
                &schema,
                vec![mapping("Code", "code"), mapping("Phone", "name")],
            )
            .unwrap_err();
        assert!(matches!(err, MigrationError::MappingStale { ref missing } if missing == &vec!["Phone".to_string()]));
    }

    #[test]
    fn test_match_field_override_becomes_required() {
        let engine = MappingEngine::new(0.6);
        let schema = schema(&[
            ("Code", FieldType::Text),
            ("Name", FieldType::Text),
            ("Email", FieldType::Text),
        ]);
        let mut job = contact_job();
        job.match_fields
            .insert(TargetDataType::Contact, vec!["email".to_string()]);

        let err = engine
            .apply_overrides(&job, &schema, vec![mapping("Code", "code"), mapping("Name", "name")])
            .unwrap_err();
        assert!(err.to_string().contains("email"));

        let normalized = engine
            .apply_overrides(
                &job,
                &schema,
                vec![
                    mapping("Code", "code"),
                    mapping("Name", "name"),
                    mapping("Email", "email"),
                ],
            )
            .unwrap();
        assert!(normalized[2].required);
    }
}
