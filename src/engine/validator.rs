// ==========================================
// 数据迁移导入引擎 - 校验器
// ==========================================
// 职责: 必填检查 → 转换管道 → 类型转换 → 格式/范围规则
// 红线: 纯函数，不读写目标数据；相同输入产生相同问题集
// ==========================================

use crate::domain::mapping::{FieldMapping, RuleKind, ValidationRule};
use crate::domain::source::RawRecord;
use crate::domain::target::TargetDataType;
use crate::domain::types::{FieldType, Severity};
use crate::domain::validation::{RecordRef, ValidatedRecord, ValidationIssue, ValidationSummary};
use crate::engine::error::{MigrationError, MigrationResult};
use crate::engine::transform::TransformPipeline;
use crate::importer::value_parser::{parse_boolean, parse_date, parse_decimal, parse_integer};
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";
const PHONE_PATTERN: &str = r"^\+?[0-9][0-9\-\s()]{5,19}$";

// ==========================================
// CompiledRule - 预编译的校验规则
// ==========================================
#[derive(Debug, Clone)]
pub struct CompiledRule {
    kind: RuleKind,
    severity: Severity,
    regex: Option<Regex>,
}

impl CompiledRule {
    pub fn compile(rule: &ValidationRule) -> Result<Self, String> {
        let regex = match &rule.kind {
            RuleKind::Regex { pattern } => Some(
                Regex::new(pattern).map_err(|e| format!("正则表达式无效 '{}': {}", pattern, e))?,
            ),
            RuleKind::Email => Some(Regex::new(EMAIL_PATTERN).map_err(|e| e.to_string())?),
            RuleKind::Phone => Some(Regex::new(PHONE_PATTERN).map_err(|e| e.to_string())?),
            RuleKind::Range { min: Some(min), max: Some(max) } if min > max => {
                return Err(format!("范围规则无效: min={} > max={}", min, max));
            }
            RuleKind::OneOf { values } if values.is_empty() => {
                return Err("one_of 规则至少需要一个取值".to_string());
            }
            _ => None,
        };
        Ok(Self {
            kind: rule.kind.clone(),
            severity: rule.severity,
            regex,
        })
    }

    /// 检查规范化后的值，违反时返回原因
    fn check(&self, value: &str) -> Option<String> {
        match &self.kind {
            RuleKind::Regex { pattern } => {
                (!self.matches(value)).then(|| format!("不匹配格式 {}", pattern))
            }
            RuleKind::Email => (!self.matches(value)).then(|| "邮箱格式不正确".to_string()),
            RuleKind::Phone => (!self.matches(value)).then(|| "电话格式不正确".to_string()),
            RuleKind::MaxLength { max } => {
                let len = value.chars().count();
                (len > *max).then(|| format!("长度 {} 超过上限 {}", len, max))
            }
            RuleKind::OneOf { values } => (!values.iter().any(|v| v == value))
                .then(|| format!("取值不在允许范围内: {}", values.join("/"))),
            RuleKind::Range { min, max } => match value.parse::<f64>() {
                Err(_) => Some("非数值，无法做范围检查".to_string()),
                Ok(n) => {
                    if min.map_or(false, |m| n < m) || max.map_or(false, |m| n > m) {
                        Some(format!(
                            "数值 {} 超出范围 [{}, {}]",
                            value,
                            min.map(|m| m.to_string()).unwrap_or_else(|| "-∞".to_string()),
                            max.map(|m| m.to_string()).unwrap_or_else(|| "+∞".to_string())
                        ))
                    } else {
                        None
                    }
                }
            },
        }
    }

    fn matches(&self, value: &str) -> bool {
        self.regex.as_ref().map_or(true, |re| re.is_match(value))
    }
}

// ==========================================
// CompiledMappings - 预编译的映射集
// ==========================================
#[derive(Debug, Clone)]
pub struct CompiledMapping {
    pub mapping: FieldMapping,
    pipeline: TransformPipeline,
    rule: Option<CompiledRule>,
}

#[derive(Debug, Clone, Default)]
pub struct CompiledMappings {
    by_type: BTreeMap<TargetDataType, Vec<CompiledMapping>>,
}

impl CompiledMappings {
    /// 编译映射集（转换名或规则无效 → 配置错误）
    pub fn compile(mappings: &[FieldMapping]) -> MigrationResult<Self> {
        let mut by_type: BTreeMap<TargetDataType, Vec<CompiledMapping>> = BTreeMap::new();
        for mapping in mappings {
            let pipeline = TransformPipeline::parse(&mapping.transforms).map_err(|msg| {
                MigrationError::Configuration(format!(
                    "{}.{}: {}",
                    mapping.target_data_type, mapping.target_field, msg
                ))
            })?;
            let rule = mapping
                .validation_rule
                .as_ref()
                .map(CompiledRule::compile)
                .transpose()
                .map_err(|msg| {
                    MigrationError::Configuration(format!(
                        "{}.{}: {}",
                        mapping.target_data_type, mapping.target_field, msg
                    ))
                })?;
            by_type
                .entry(mapping.target_data_type)
                .or_default()
                .push(CompiledMapping {
                    mapping: mapping.clone(),
                    pipeline,
                    rule,
                });
        }
        Ok(Self { by_type })
    }

    pub fn for_type(&self, data_type: TargetDataType) -> &[CompiledMapping] {
        self.by_type
            .get(&data_type)
            .map(|m| m.as_slice())
            .unwrap_or(&[])
    }

    /// 字段是否为必填（目录必填或自然键）
    pub fn is_required(&self, data_type: TargetDataType, field: &str) -> bool {
        self.for_type(data_type)
            .iter()
            .any(|c| c.mapping.target_field == field && c.mapping.required)
    }
}

// ==========================================
// ValidationOutcome - 一轮校验的结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub summary: ValidationSummary,
    pub issues: Vec<ValidationIssue>,
}

// ==========================================
// Validator
// ==========================================
pub struct Validator;

impl Validator {
    /// 校验单个执行单元 (记录, 数据类型)
    pub fn validate_unit(
        job_id: &str,
        record: &RawRecord,
        data_type: TargetDataType,
        mappings: &CompiledMappings,
    ) -> ValidatedRecord {
        let record_ref = RecordRef::new(data_type, record.row_number);
        let mut values = Map::new();
        let mut issues = Vec::new();

        for compiled in mappings.for_type(data_type) {
            let mapping = &compiled.mapping;
            let issue = |severity: Severity, code: &str, message: String| ValidationIssue {
                job_id: job_id.to_string(),
                record_ref,
                field: mapping.target_field.clone(),
                severity,
                message,
                code: code.to_string(),
            };

            // 1. 转换管道
            let output = match compiled.pipeline.apply(record.get(&mapping.source_field)) {
                Ok(output) => output,
                Err(err) => {
                    issues.push(issue(
                        Severity::Error,
                        "TRANSFORM_FAILED",
                        format!("转换 {} 失败: {}", err.step, err.message),
                    ));
                    continue;
                }
            };
            if output.truncated {
                issues.push(issue(
                    Severity::Warning,
                    "VALUE_TRUNCATED",
                    format!("字段 {} 的值已被截断", mapping.source_field),
                ));
            }

            // 2. 必填检查
            let raw = match output.value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => {
                    if mapping.required {
                        issues.push(issue(
                            Severity::Error,
                            "REQUIRED_FIELD_MISSING",
                            format!("必填字段缺失 (源列 {})", mapping.source_field),
                        ));
                    }
                    continue;
                }
            };

            // 3. 类型转换
            let canonical = match Self::coerce(&raw, mapping.target_type) {
                Ok(v) => v,
                Err(message) => {
                    issues.push(issue(Severity::Error, "TYPE_COERCION_FAILED", message));
                    continue;
                }
            };

            // 4. 格式 / 范围规则
            if let Some(rule) = &compiled.rule {
                if let Some(message) = rule.check(&canonical) {
                    let blocking = rule.severity == Severity::Error;
                    issues.push(issue(rule.severity, rule.kind.issue_code(), message));
                    if blocking {
                        continue;
                    }
                }
            }

            values.insert(mapping.target_field.clone(), JsonValue::String(canonical));
        }

        ValidatedRecord {
            record_ref,
            values,
            issues,
        }
    }

    /// 校验整个源数据（每条记录 × 每个目标数据类型）
    pub fn validate_records<I>(
        job_id: &str,
        records: I,
        data_types: &BTreeSet<TargetDataType>,
        mappings: &CompiledMappings,
    ) -> ValidationOutcome
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut outcome = ValidationOutcome::default();
        for record in records {
            for data_type in data_types {
                let validated = Self::validate_unit(job_id, &record, *data_type, mappings);
                outcome.summary.record(&validated);
                outcome.issues.extend(validated.issues);
            }
        }
        outcome.issues.sort_by(|a, b| {
            (a.record_ref.row_number, a.record_ref.data_type, &a.field, &a.code).cmp(&(
                b.record_ref.row_number,
                b.record_ref.data_type,
                &b.field,
                &b.code,
            ))
        });
        outcome
    }

    /// 转为目标类型的规范化字符串
    pub fn coerce(value: &str, target_type: FieldType) -> Result<String, String> {
        match target_type {
            FieldType::Text => Ok(value.to_string()),
            FieldType::Integer => parse_integer(value)
                .map(|n| n.to_string())
                .ok_or_else(|| format!("'{}' 不是有效整数", value)),
            FieldType::Decimal => {
                parse_decimal(value).ok_or_else(|| format!("'{}' 不是有效数值", value))
            }
            FieldType::Date => parse_date(value, None)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .ok_or_else(|| format!("'{}' 不是可识别的日期", value)),
            FieldType::Boolean => parse_boolean(value)
                .map(|b| b.to_string())
                .ok_or_else(|| format!("'{}' 不是有效布尔值", value)),
        }
    }
}
