// ==========================================
// 数据迁移导入引擎 - 源数据模型
// ==========================================
// 职责: 原始记录（有序列名/值对）与检测到的源 schema
// ==========================================

use crate::domain::types::{FieldType, SourceFormat};
use serde::{Deserialize, Serialize};

// ==========================================
// RawRecord - 原始记录
// ==========================================
// 有序的 (列名, 值) 列表，仅通过显式查找访问
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 数据行号（从 1 开始，不含表头）
    pub row_number: usize,
    pub values: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(row_number: usize, values: Vec<(String, String)>) -> Self {
        Self { row_number, values }
    }

    /// 按列名查找值
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// 是否整行为空
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|(_, v)| v.trim().is_empty())
    }
}

// ==========================================
// ColumnInfo - 源列信息
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub position: usize,
    pub inferred_type: FieldType,
    pub samples: Vec<String>,
    /// 采样范围内的空值数量
    pub empty_count: usize,
}

// ==========================================
// SourceSchema - 源 schema
// ==========================================
// 进入校验阶段后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub format: SourceFormat,
    pub columns: Vec<ColumnInfo>,
    pub record_count: usize,
}

impl SourceSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
