// ==========================================
// 数据迁移导入引擎 - 转换管道
// ==========================================
// 职责: 按白名单解析转换步骤（name 或 name:参数），逐步作用于单个值
// 值语义: None 表示空值；步骤失败返回 TransformError
// ==========================================

use chrono::format::{Item, StrftimeItems};
use chrono::NaiveDate;
use std::fmt;

/// 货币符号（strip_currency 去除）
const CURRENCY_SYMBOLS: [char; 8] = ['¥', '￥', '$', '€', '£', '₹', '₩', '₽'];

// ==========================================
// TransformStep - 单个转换步骤
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformStep {
    Trim,
    Uppercase,
    Lowercase,
    CollapseWhitespace,
    DigitsOnly,
    /// 欧式小数 "1.234,56" → "1234.56"
    DecimalComma,
    StripCurrency,
    NullIfEmpty,
    Default(String),
    /// 按指定格式解析日期并输出 %Y-%m-%d
    DateFormat(String),
    Prefix(String),
    Truncate(usize),
}

impl TransformStep {
    /// 解析 `name` 或 `name:参数`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (name, arg) = match raw.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg)),
            None => (raw, None),
        };

        let step = match (name, arg) {
            ("trim", None) => TransformStep::Trim,
            ("uppercase", None) => TransformStep::Uppercase,
            ("lowercase", None) => TransformStep::Lowercase,
            ("collapse_whitespace", None) => TransformStep::CollapseWhitespace,
            ("digits_only", None) => TransformStep::DigitsOnly,
            ("decimal_comma", None) => TransformStep::DecimalComma,
            ("strip_currency", None) => TransformStep::StripCurrency,
            ("null_if_empty", None) => TransformStep::NullIfEmpty,
            ("default", Some(value)) if !value.is_empty() => {
                TransformStep::Default(value.to_string())
            }
            ("prefix", Some(text)) if !text.is_empty() => TransformStep::Prefix(text.to_string()),
            ("date_format", Some(pattern)) if is_valid_pattern(pattern) => {
                TransformStep::DateFormat(pattern.to_string())
            }
            ("truncate", Some(n)) => match n.trim().parse::<usize>() {
                Ok(n) if n > 0 => TransformStep::Truncate(n),
                _ => return Err(format!("转换参数无效: {}", raw)),
            },
            (
                "trim" | "uppercase" | "lowercase" | "collapse_whitespace" | "digits_only"
                | "decimal_comma" | "strip_currency" | "null_if_empty",
                Some(_),
            ) => return Err(format!("转换不接受参数: {}", raw)),
            ("default" | "prefix" | "date_format", _) => {
                return Err(format!("转换参数缺失或无效: {}", raw))
            }
            ("truncate", None) => return Err(format!("转换参数缺失: {}", raw)),
            _ => return Err(format!("未知转换: {}", name)),
        };
        Ok(step)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransformStep::Trim => "trim",
            TransformStep::Uppercase => "uppercase",
            TransformStep::Lowercase => "lowercase",
            TransformStep::CollapseWhitespace => "collapse_whitespace",
            TransformStep::DigitsOnly => "digits_only",
            TransformStep::DecimalComma => "decimal_comma",
            TransformStep::StripCurrency => "strip_currency",
            TransformStep::NullIfEmpty => "null_if_empty",
            TransformStep::Default(_) => "default",
            TransformStep::DateFormat(_) => "date_format",
            TransformStep::Prefix(_) => "prefix",
            TransformStep::Truncate(_) => "truncate",
        }
    }

    /// 作用于单个值，返回 (新值, 是否截断)
    fn apply(&self, value: Option<String>) -> Result<(Option<String>, bool), String> {
        let out = match self {
            TransformStep::NullIfEmpty => value.filter(|v| !v.trim().is_empty()),
            TransformStep::Default(fallback) => match value {
                Some(v) if !v.trim().is_empty() => Some(v),
                _ => Some(fallback.clone()),
            },
            TransformStep::Truncate(max) => {
                return Ok(match value {
                    Some(v) if v.chars().count() > *max => {
                        (Some(v.chars().take(*max).collect()), true)
                    }
                    other => (other, false),
                })
            }
            _ => match value {
                None => None,
                Some(v) => Some(self.apply_text(v)?),
            },
        };
        Ok((out, false))
    }

    fn apply_text(&self, v: String) -> Result<String, String> {
        let out = match self {
            TransformStep::Trim => v.trim().to_string(),
            TransformStep::Uppercase => v.to_uppercase(),
            TransformStep::Lowercase => v.to_lowercase(),
            TransformStep::CollapseWhitespace => v.split_whitespace().collect::<Vec<_>>().join(" "),
            TransformStep::DigitsOnly => v.chars().filter(|c| c.is_ascii_digit()).collect(),
            TransformStep::DecimalComma => v.trim().replace('.', "").replace(',', "."),
            TransformStep::StripCurrency => v
                .chars()
                .filter(|c| !CURRENCY_SYMBOLS.contains(c) && !c.is_alphabetic())
                .collect::<String>()
                .trim()
                .to_string(),
            TransformStep::Prefix(text) => {
                if v.is_empty() || v.starts_with(text.as_str()) {
                    v
                } else {
                    format!("{}{}", text, v)
                }
            }
            TransformStep::DateFormat(pattern) => {
                if v.trim().is_empty() {
                    v
                } else {
                    NaiveDate::parse_from_str(v.trim(), pattern)
                        .map(|d| d.format("%Y-%m-%d").to_string())
                        .map_err(|e| format!("日期 '{}' 不符合格式 {}: {}", v, pattern, e))?
                }
            }
            TransformStep::NullIfEmpty | TransformStep::Default(_) | TransformStep::Truncate(_) => v,
        };
        Ok(out)
    }
}

impl fmt::Display for TransformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformStep::Default(arg) | TransformStep::DateFormat(arg) | TransformStep::Prefix(arg) => {
                write!(f, "{}:{}", self.name(), arg)
            }
            TransformStep::Truncate(n) => write!(f, "{}:{}", self.name(), n),
            _ => f.write_str(self.name()),
        }
    }
}

fn is_valid_pattern(pattern: &str) -> bool {
    !pattern.trim().is_empty() && !StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
}

// ==========================================
// TransformPipeline - 有序转换管道
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformPipeline {
    steps: Vec<TransformStep>,
}

/// 管道输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub value: Option<String>,
    pub truncated: bool,
}

/// 管道执行失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformError {
    pub step: String,
    pub message: String,
}

impl TransformPipeline {
    pub fn parse(names: &[String]) -> Result<Self, String> {
        let steps = names
            .iter()
            .map(|name| TransformStep::parse(name))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn apply(&self, value: Option<&str>) -> Result<TransformOutput, TransformError> {
        let mut current = value.map(|v| v.to_string());
        let mut truncated = false;
        for step in &self.steps {
            let (next, cut) = step.apply(current).map_err(|message| TransformError {
                step: step.to_string(),
                message,
            })?;
            current = next;
            truncated |= cut;
        }
        Ok(TransformOutput {
            value: current,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(names: &[&str]) -> TransformPipeline {
        TransformPipeline::parse(&names.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .unwrap()
    }

    #[test]
    fn test_allow_list_rejects_unknown_and_bad_args() {
        assert!(TransformStep::parse("reverse").is_err());
        assert!(TransformStep::parse("trim:x").is_err());
        assert!(TransformStep::parse("default").is_err());
        assert!(TransformStep::parse("truncate:zero").is_err());
        assert!(TransformStep::parse("truncate:0").is_err());
        assert!(TransformStep::parse("date_format:%Q").is_err());
        assert_eq!(
            TransformStep::parse("date_format:%d/%m/%Y").unwrap(),
            TransformStep::DateFormat("%d/%m/%Y".to_string())
        );
    }

    #[test]
    fn test_text_steps_in_order() {
        let p = pipeline(&["trim", "collapse_whitespace", "uppercase"]);
        let out = p.apply(Some("  acme   trading  co ")).unwrap();
        assert_eq!(out.value.as_deref(), Some("ACME TRADING CO"));
        assert!(!out.truncated);
    }

    #[test]
    fn test_null_and_default() {
        let p = pipeline(&["trim", "null_if_empty"]);
        assert_eq!(p.apply(Some("   ")).unwrap().value, None);

        let p = pipeline(&["default:CNY"]);
        assert_eq!(p.apply(None).unwrap().value.as_deref(), Some("CNY"));
        assert_eq!(p.apply(Some("USD")).unwrap().value.as_deref(), Some("USD"));
    }

    #[test]
    fn test_numeric_cleanup() {
        let p = pipeline(&["strip_currency", "decimal_comma"]);
        assert_eq!(p.apply(Some("€ 1.234,50")).unwrap().value.as_deref(), Some("1234.50"));

        let p = pipeline(&["digits_only"]);
        assert_eq!(
            p.apply(Some("+86 138-0000-1111")).unwrap().value.as_deref(),
            Some("8613800001111")
        );
    }

    #[test]
    fn test_date_format_normalizes_or_fails() {
        let p = pipeline(&["date_format:%d/%m/%Y"]);
        assert_eq!(p.apply(Some("31/01/2024")).unwrap().value.as_deref(), Some("2024-01-31"));

        let err = p.apply(Some("2024-01-31")).unwrap_err();
        assert_eq!(err.step, "date_format:%d/%m/%Y");
    }

    #[test]
    fn test_truncate_flags_warning() {
        let p = pipeline(&["truncate:3"]);
        let out = p.apply(Some("上海市浦东")).unwrap();
        assert_eq!(out.value.as_deref(), Some("上海市"));
        assert!(out.truncated);
    }

    #[test]
    fn test_prefix_is_idempotent() {
        let p = pipeline(&["prefix:C-"]);
        assert_eq!(p.apply(Some("001")).unwrap().value.as_deref(), Some("C-001"));
        assert_eq!(p.apply(Some("C-001")).unwrap().value.as_deref(), Some("C-001"));
    }
}
