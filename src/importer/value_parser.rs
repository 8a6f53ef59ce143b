// ==========================================
// 数据迁移导入引擎 - 值解析工具
// ==========================================
// 职责: 整数/小数/日期/布尔 的宽松解析与规范化
// 用途: schema 类型推断 + 校验器类型转换
// ==========================================

use chrono::NaiveDate;

/// 支持的日期格式（按优先级）
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d", "%d.%m.%Y"];

/// 解析整数（允许千分位逗号）
pub fn parse_integer(value: &str) -> Option<i64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<i64>().ok()
}

/// 解析小数，返回规范化字符串
///
/// # 规则
/// - 去除千分位逗号
/// - 去除末尾多余的 0（`12.50` → `12.5`，`3.0` → `3`）
pub fn parse_decimal(value: &str) -> Option<String> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    let number = cleaned.parse::<f64>().ok()?;
    if !number.is_finite() {
        return None;
    }
    Some(normalize_decimal(&cleaned))
}

fn normalize_decimal(cleaned: &str) -> String {
    let (sign, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", cleaned.strip_prefix('+').unwrap_or(cleaned)),
    };

    // 科学计数法直接交给 f64 格式化
    if digits.contains(['e', 'E']) {
        return digits
            .parse::<f64>()
            .map(|n| format!("{}{}", sign, n))
            .unwrap_or_else(|_| cleaned.to_string());
    }

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let int_part = int_part.trim_start_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let frac_part = frac_part.trim_end_matches('0');

    let body = if frac_part.is_empty() {
        int_part.to_string()
    } else {
        format!("{}.{}", int_part, frac_part)
    };

    if body == "0" {
        body
    } else {
        format!("{}{}", sign, body)
    }
}

/// 解析日期（可指定格式，未指定时依次尝试 DATE_FORMATS）
pub fn parse_date(value: &str, explicit_format: Option<&str>) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(fmt) = explicit_format {
        return NaiveDate::parse_from_str(trimmed, fmt).ok();
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
}

/// 解析布尔值（统一为 true / false）
pub fn parse_boolean(value: &str) -> Option<bool> {
    match value.trim().to_uppercase().as_str() {
        "1" | "Y" | "YES" | "TRUE" | "T" | "是" => Some(true),
        "0" | "N" | "NO" | "FALSE" | "F" | "否" => Some(false),
        _ => None,
    }
}
