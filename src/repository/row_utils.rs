// ==========================================
// 数据迁移导入引擎 - 行映射辅助函数
// ==========================================
// 职责: TEXT 列 → 枚举 / JSON 的解析，失败时转为 rusqlite 转换错误
// ==========================================

use rusqlite::types::Type;
use serde::de::DeserializeOwned;
use std::str::FromStr;

/// 解析枚举列（FromStr<Err = String>）
pub fn parse_enum_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>().map_err(|msg| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
    })
}

/// 解析 JSON 列
pub fn parse_json_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: DeserializeOwned,
{
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// SQLite 布尔列
pub fn bool_to_sql(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::JobStatus;

    #[test]
    fn test_parse_enum_column() {
        assert_eq!(
            parse_enum_column::<JobStatus>(0, "running").unwrap(),
            JobStatus::Running
        );
        assert!(parse_enum_column::<JobStatus>(3, "nope").is_err());
    }

    #[test]
    fn test_parse_json_column() {
        let values: Vec<String> = parse_json_column(0, r#"["trim","uppercase"]"#).unwrap();
        assert_eq!(values, vec!["trim", "uppercase"]);
        assert!(parse_json_column::<Vec<String>>(0, "{").is_err());
    }
}
