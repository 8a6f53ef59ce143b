// ==========================================
// 数据迁移导入引擎 - 目标数据目录
// ==========================================
// 职责: 定义可导入的目标数据类型（总账科目/凭证/往来单位/存货）
//       及其字段、类型、必填、别名、自然键与引用关系
// ==========================================

use crate::domain::types::FieldType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

// ==========================================
// TargetDataType - 目标数据类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetDataType {
    Ledger,    // 总账科目
    Voucher,   // 记账凭证
    Contact,   // 往来单位（客户/供应商）
    Inventory, // 存货
}

impl TargetDataType {
    pub const ALL: [TargetDataType; 4] = [
        TargetDataType::Ledger,
        TargetDataType::Voucher,
        TargetDataType::Contact,
        TargetDataType::Inventory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetDataType::Ledger => "ledger",
            TargetDataType::Voucher => "voucher",
            TargetDataType::Contact => "contact",
            TargetDataType::Inventory => "inventory",
        }
    }

    /// 字段目录
    pub fn fields(&self) -> &'static [TargetFieldSpec] {
        match self {
            TargetDataType::Ledger => LEDGER_FIELDS,
            TargetDataType::Voucher => VOUCHER_FIELDS,
            TargetDataType::Contact => CONTACT_FIELDS,
            TargetDataType::Inventory => INVENTORY_FIELDS,
        }
    }

    /// 默认自然键（匹配字段）
    pub fn default_match_fields(&self) -> &'static [&'static str] {
        match self {
            TargetDataType::Ledger => &["account_code"],
            TargetDataType::Voucher => &["voucher_no"],
            TargetDataType::Contact => &["code"],
            TargetDataType::Inventory => &["sku"],
        }
    }

    pub fn field(&self, name: &str) -> Option<&'static TargetFieldSpec> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// 引用字段（例如凭证的 account_code → 总账科目）
    pub fn reference_field(&self) -> Option<&'static TargetFieldSpec> {
        self.fields().iter().find(|f| f.references.is_some())
    }
}

impl fmt::Display for TargetDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ledger" => Ok(TargetDataType::Ledger),
            "voucher" => Ok(TargetDataType::Voucher),
            "contact" => Ok(TargetDataType::Contact),
            "inventory" => Ok(TargetDataType::Inventory),
            other => Err(format!("未知目标数据类型: {}", other)),
        }
    }
}

// ==========================================
// TargetFieldSpec - 目标字段定义
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetFieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub aliases: &'static [&'static str],
    pub references: Option<TargetDataType>,
}

const fn field(
    name: &'static str,
    field_type: FieldType,
    required: bool,
    aliases: &'static [&'static str],
) -> TargetFieldSpec {
    TargetFieldSpec {
        name,
        field_type,
        required,
        aliases,
        references: None,
    }
}

static LEDGER_FIELDS: &[TargetFieldSpec] = &[
    field("account_code", FieldType::Text, true, &["科目编码", "科目代码", "code", "account_no", "gl_code"]),
    field("account_name", FieldType::Text, true, &["科目名称", "name", "ledger_name"]),
    field("account_type", FieldType::Text, false, &["科目类别", "type", "group"]),
    field("opening_balance", FieldType::Decimal, false, &["期初余额", "balance", "opening"]),
    field("currency", FieldType::Text, false, &["币种", "ccy"]),
];

static VOUCHER_FIELDS: &[TargetFieldSpec] = &[
    field("voucher_no", FieldType::Text, true, &["凭证号", "voucher_number", "document_no", "ref_no"]),
    field("voucher_date", FieldType::Date, true, &["凭证日期", "date", "posting_date"]),
    TargetFieldSpec {
        name: "account_code",
        field_type: FieldType::Text,
        required: true,
        aliases: &["科目编码", "account", "ledger", "gl_code"],
        references: Some(TargetDataType::Ledger),
    },
    field("amount", FieldType::Decimal, true, &["金额", "value", "total"]),
    field("narration", FieldType::Text, false, &["摘要", "memo", "description", "remarks"]),
];

static CONTACT_FIELDS: &[TargetFieldSpec] = &[
    field("code", FieldType::Text, true, &["客户编码", "编号", "customer_id", "contact_id", "customer_code"]),
    field("name", FieldType::Text, true, &["名称", "客户名称", "customer_name", "full_name", "company"]),
    field("phone", FieldType::Text, false, &["电话", "手机", "mobile", "telephone", "phone_number"]),
    field("email", FieldType::Text, false, &["邮箱", "mail", "email_address"]),
    field("address", FieldType::Text, false, &["地址", "street", "billing_address"]),
    field("contact_type", FieldType::Text, false, &["类型", "category", "kind"]),
];

static INVENTORY_FIELDS: &[TargetFieldSpec] = &[
    field("sku", FieldType::Text, true, &["物料编码", "item_code", "product_code", "part_no"]),
    field("item_name", FieldType::Text, true, &["物料名称", "name", "product_name", "description"]),
    field("unit", FieldType::Text, false, &["单位", "uom"]),
    field("quantity", FieldType::Decimal, false, &["数量", "qty", "stock"]),
    field("unit_price", FieldType::Decimal, false, &["单价", "price", "rate", "cost"]),
    field("category", FieldType::Text, false, &["分类", "group", "item_group"]),
];

// ==========================================
// TargetEntity - 目标数据实体
// ==========================================
// 组织目标数据库中的一条业务数据（由执行器/回滚管理器写入）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    pub entity_id: String,
    pub organization_id: String,
    pub entity_type: TargetDataType,
    pub natural_key: String,
    pub fields: Map<String, JsonValue>,
    pub parent_entity_id: Option<String>,
    pub created_by_job: Option<String>,
    pub last_written_by_job: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TargetEntity {
    /// 读取字段的规范字符串值
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}
