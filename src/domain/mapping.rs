// ==========================================
// 数据迁移导入引擎 - 字段映射领域模型
// ==========================================
// 职责: 源字段 → 目标字段映射、转换管道、校验规则、映射建议
// ==========================================

use crate::domain::target::TargetDataType;
use crate::domain::types::{FieldType, Severity};
use serde::{Deserialize, Serialize};

// ==========================================
// FieldMapping - 字段映射
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_data_type: TargetDataType,
    pub target_field: String,
    /// 由目标目录决定，调用方传入值会被覆盖
    pub target_type: FieldType,
    /// 有序转换管道（名称取自固定白名单，形如 `trim` / `default:0`）
    #[serde(default)]
    pub transforms: Vec<String>,
    #[serde(default)]
    pub validation_rule: Option<ValidationRule>,
    /// 由目标目录决定，调用方不能放宽必填
    #[serde(default)]
    pub required: bool,
}

// ==========================================
// ValidationRule - 校验规则
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default)]
    pub severity: Severity,
}

impl ValidationRule {
    pub fn error(kind: RuleKind) -> Self {
        Self {
            kind,
            severity: Severity::Error,
        }
    }

    pub fn warning(kind: RuleKind) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
        }
    }
}

/// 规则种类（闭合集合）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RuleKind {
    Regex { pattern: String },
    Range { min: Option<f64>, max: Option<f64> },
    MaxLength { max: usize },
    OneOf { values: Vec<String> },
    Email,
    Phone,
}

impl RuleKind {
    /// 对应的问题代码
    pub fn issue_code(&self) -> &'static str {
        match self {
            RuleKind::Regex { .. } => "RULE_REGEX",
            RuleKind::Range { .. } => "RULE_RANGE",
            RuleKind::MaxLength { .. } => "RULE_MAX_LENGTH",
            RuleKind::OneOf { .. } => "RULE_ONE_OF",
            RuleKind::Email => "RULE_EMAIL",
            RuleKind::Phone => "RULE_PHONE",
        }
    }
}

// ==========================================
// MappingSuggestion - 映射建议
// ==========================================
// 置信度低于阈值时 target_field 留空，不做猜测
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSuggestion {
    pub source_field: String,
    pub target_data_type: TargetDataType,
    pub target_field: Option<String>,
    pub target_type: Option<FieldType>,
    pub confidence: f64,
    pub required: bool,
    pub transforms: Vec<String>,
}

impl MappingSuggestion {
    /// 转为可直接提交的映射（无目标字段时返回 None）
    pub fn to_mapping(&self) -> Option<FieldMapping> {
        let target_field = self.target_field.clone()?;
        Some(FieldMapping {
            source_field: self.source_field.clone(),
            target_data_type: self.target_data_type,
            target_field,
            target_type: self.target_type.unwrap_or(FieldType::Text),
            transforms: self.transforms.clone(),
            validation_rule: None,
            required: self.required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_json_shape() {
        let rule = ValidationRule::error(RuleKind::Range {
            min: Some(0.0),
            max: None,
        });
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["rule"], "range");
        assert_eq!(json["severity"], "error");

        let parsed: ValidationRule =
            serde_json::from_str(r#"{"rule":"max_length","max":10}"#).unwrap();
        assert_eq!(parsed.kind, RuleKind::MaxLength { max: 10 });
        assert_eq!(parsed.severity, Severity::Error);
    }
}
