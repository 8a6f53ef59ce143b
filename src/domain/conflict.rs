// ==========================================
// 数据迁移导入引擎 - 冲突领域模型
// ==========================================
// 职责: 冲突记录（只追加）与冲突判定结果（闭合枚举）
// ==========================================

use crate::domain::validation::RecordRef;
use crate::domain::types::{ConflictType, Resolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// ConflictRecord - 冲突记录
// ==========================================
// 同一记录可有多行，最新一行生效
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: String,
    pub job_id: String,
    pub record_ref: RecordRef,
    pub conflict_type: ConflictType,
    /// 已存在的目标实体（无匹配时为空）
    pub existing_target_id: Option<String>,
    /// 全部匹配到的目标实体（重复匹配时 > 1）
    pub candidate_ids: Vec<String>,
    pub suggested_resolution: Option<Resolution>,
    pub applied_resolution: Option<Resolution>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl ConflictRecord {
    pub fn is_resolved(&self) -> bool {
        self.applied_resolution.is_some()
    }
}

// ==========================================
// ConflictOverride - 单条记录覆写
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictOverride {
    pub resolution: Resolution,
    /// resolution=update 且存在多条匹配时必须指定
    pub existing_target_id: Option<String>,
}

// ==========================================
// ConflictDecision - 冲突判定
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    /// 无匹配 → 新建
    Create,
    /// 单条匹配且字段一致 → 跳过（幂等重跑）
    Unchanged { existing_id: String },
    /// 已决定跳过
    Skip {
        existing_id: Option<String>,
        conflict_type: ConflictType,
    },
    /// 覆盖已有实体
    Update {
        existing_id: String,
        conflict_type: ConflictType,
    },
    /// 另建新实体
    CreateNew {
        existing_id: Option<String>,
        conflict_type: ConflictType,
    },
    /// 无法决定 → 记失败
    Fail { code: &'static str, reason: String },
}

impl ConflictDecision {
    /// 产生写入的判定
    pub fn writes(&self) -> bool {
        matches!(
            self,
            ConflictDecision::Create
                | ConflictDecision::Update { .. }
                | ConflictDecision::CreateNew { .. }
        )
    }

    /// 实际采用的处理方式（仅冲突判定有值）
    pub fn applied_resolution(&self) -> Option<Resolution> {
        match self {
            ConflictDecision::Skip { .. } => Some(Resolution::Skip),
            ConflictDecision::Update { .. } => Some(Resolution::Update),
            ConflictDecision::CreateNew { .. } => Some(Resolution::CreateNew),
            _ => None,
        }
    }

    pub fn conflict_type(&self) -> Option<ConflictType> {
        match self {
            ConflictDecision::Skip { conflict_type, .. }
            | ConflictDecision::Update { conflict_type, .. }
            | ConflictDecision::CreateNew { conflict_type, .. } => Some(*conflict_type),
            _ => None,
        }
    }
}
