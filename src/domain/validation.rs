// ==========================================
// 数据迁移导入引擎 - 校验结果领域模型
// ==========================================
// 职责: 记录引用 / 校验问题 / 汇总统计
// ==========================================

use crate::domain::target::TargetDataType;
use crate::domain::types::Severity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ==========================================
// RecordRef - 记录引用
// ==========================================
// 一个执行单元 = (源记录, 目标数据类型)，格式 `{data_type}#{row}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub row_number: usize,
    pub data_type: TargetDataType,
}

impl RecordRef {
    pub fn new(data_type: TargetDataType, row_number: usize) -> Self {
        Self {
            row_number,
            data_type,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.data_type, self.row_number)
    }
}

impl FromStr for RecordRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (data_type, row) = s
            .split_once('#')
            .ok_or_else(|| format!("记录引用格式错误: {}", s))?;
        let row_number = row
            .parse::<usize>()
            .map_err(|_| format!("记录引用行号错误: {}", s))?;
        Ok(Self {
            row_number,
            data_type: data_type.parse()?,
        })
    }
}

// ==========================================
// ValidationIssue - 校验问题
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub job_id: String,
    pub record_ref: RecordRef,
    pub field: String,
    pub severity: Severity,
    pub message: String,
    pub code: String,
}

// ==========================================
// ValidatedRecord - 单元校验结果
// ==========================================
// values 仅包含无错误的字段（规范化字符串）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRecord {
    pub record_ref: RecordRef,
    pub values: Map<String, JsonValue>,
    pub issues: Vec<ValidationIssue>,
}

impl ValidatedRecord {
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// 出错的字段
    pub fn error_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| i.field.as_str())
            .collect();
        fields.dedup();
        fields
    }
}

// ==========================================
// ValidationSummary - 校验汇总
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub valid_count: usize,
    pub invalid_count: usize,
    pub warning_count: usize,
    pub issues_by_code: BTreeMap<String, usize>,
}

impl ValidationSummary {
    pub fn record(&mut self, validated: &ValidatedRecord) {
        if validated.has_errors() {
            self.invalid_count += 1;
        } else {
            self.valid_count += 1;
        }
        for issue in &validated.issues {
            if issue.severity == Severity::Warning {
                self.warning_count += 1;
            }
            *self.issues_by_code.entry(issue.code.clone()).or_insert(0) += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_ref_format() {
        let r = RecordRef::new(TargetDataType::Contact, 12);
        assert_eq!(r.to_string(), "contact#12");
        assert_eq!("contact#12".parse::<RecordRef>().unwrap(), r);
        assert!("contact-12".parse::<RecordRef>().is_err());
        assert!("nothing#1".parse::<RecordRef>().is_err());
    }
}
