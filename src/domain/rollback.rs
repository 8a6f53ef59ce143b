// ==========================================
// 数据迁移导入引擎 - 回滚领域模型
// ==========================================
// 补偿日志: 每次成功写入对应一条 RollbackRecord（只追加）
// ==========================================

use crate::domain::target::TargetDataType;
use crate::domain::types::WriteOperation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

// ==========================================
// RollbackRecord - 补偿记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// 单调递增序号，逆序回放
    pub sequence: Option<i64>,
    pub organization_id: String,
    pub job_id: String,
    pub entity_type: TargetDataType,
    pub entity_id: String,
    pub operation_type: WriteOperation,
    /// 更新前镜像（新建时为空）
    pub pre_image: Option<Map<String, JsonValue>>,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// RollbackOptions - 回滚选项
// ==========================================
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RollbackOptions {
    /// true: 跳过被后续作业依赖的记录；false: 直接失败
    #[serde(default)]
    pub skip_blocked: bool,
}

// ==========================================
// RollbackReport - 回滚报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub reverted: usize,
    pub skipped: usize,
    pub failed: usize,
}
