// ==========================================
// 数据迁移导入引擎 - 文件解析器实现
// ==========================================
// 支持: CSV (分隔文本) / Excel (.xlsx 首个工作表) / JSON (数组 / 包装对象 / NDJSON)
// 输入: 上传的原始字节（不落盘）
// 输出: 表头 + 按行序的 RawRecord 迭代器（可重复迭代）
// ==========================================

use crate::domain::source::RawRecord;
use crate::domain::types::SourceFormat;
use crate::importer::error::{ImportError, ImportResult};
use calamine::{Reader, Xlsx};
use csv::ReaderBuilder;
use serde_json::{Map, Value as JsonValue};
use std::io::Cursor;

/// 行迭代器（按行序，跳过整行为空的行）
pub type RecordIter<'a> = Box<dyn Iterator<Item = ImportResult<RawRecord>> + Send + 'a>;

/// 单次解析结果
pub struct ParsedRows<'a> {
    pub headers: Vec<String>,
    pub rows: RecordIter<'a>,
}

// ==========================================
// RecordParser Trait
// ==========================================
pub trait RecordParser: Send + Sync {
    fn format(&self) -> SourceFormat;

    /// 解析字节流为表头 + 行迭代器
    fn parse<'a>(&self, bytes: &'a [u8]) -> ImportResult<ParsedRows<'a>>;
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl CsvParser {
    /// 从表头行检测分隔符（, ; \t |），默认逗号
    pub fn detect_delimiter(text: &str) -> u8 {
        let header_line = text.lines().next().unwrap_or("");
        [b',', b';', b'\t', b'|']
            .into_iter()
            .map(|d| (d, header_line.matches(d as char).count()))
            .filter(|(_, count)| *count > 0)
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(d, _)| d)
            .unwrap_or(b',')
    }
}

impl RecordParser for CsvParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Csv
    }

    fn parse<'a>(&self, bytes: &'a [u8]) -> ImportResult<ParsedRows<'a>> {
        let body = strip_bom(bytes);
        let text =
            std::str::from_utf8(body).map_err(|e| ImportError::EncodingError(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(ImportError::EmptyInput);
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .delimiter(Self::detect_delimiter(text))
            .from_reader(body);

        let headers = normalize_headers(reader.headers()?.iter().map(|h| h.to_string()));
        let columns = headers.clone();

        let rows = reader
            .into_records()
            .map(move |result| {
                result
                    .map(|record| zip_row(&columns, record.iter().map(|v| v.to_string())))
                    .map_err(ImportError::from)
            })
            .filter(|result| !matches!(result, Ok(values) if is_blank(values)))
            .enumerate()
            .map(|(idx, result)| result.map(|values| RawRecord::new(idx + 1, values)));

        Ok(ParsedRows {
            headers,
            rows: Box::new(rows),
        })
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

impl RecordParser for ExcelParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Xlsx
    }

    fn parse<'a>(&self, bytes: &'a [u8]) -> ImportResult<ParsedRows<'a>> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;

        // 读取第一个 sheet
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;
        let range = workbook.worksheet_range(&sheet_name)?;

        // 提取表头（第一行）
        let mut sheet_rows = range.rows();
        let header_row = sheet_rows
            .next()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 工作表无表头行".to_string()))?;
        let headers = normalize_headers(header_row.iter().map(|cell| cell.to_string()));

        // 工作表已整体载入，按行转为拥有所有权的值
        let data_rows: Vec<Vec<(String, String)>> = sheet_rows
            .map(|row| zip_row(&headers, row.iter().map(|cell| cell.to_string())))
            .filter(|values| !is_blank(values))
            .collect();

        let rows = data_rows
            .into_iter()
            .enumerate()
            .map(|(idx, values)| Ok(RawRecord::new(idx + 1, values)));

        Ok(ParsedRows {
            headers,
            rows: Box::new(rows),
        })
    }
}

// ==========================================
// JSON Parser 实现
// ==========================================
pub struct JsonParser;

impl JsonParser {
    /// 包装对象中承载记录数组的键
    const WRAPPER_KEYS: [&'static str; 3] = ["records", "data", "rows"];

    fn collect_objects(bytes: &[u8]) -> ImportResult<Vec<Map<String, JsonValue>>> {
        match serde_json::from_slice::<JsonValue>(bytes) {
            Ok(JsonValue::Array(items)) => Self::expect_objects(items),
            Ok(JsonValue::Object(mut object)) => {
                for key in Self::WRAPPER_KEYS {
                    if let Some(JsonValue::Array(items)) = object.remove(key) {
                        return Self::expect_objects(items);
                    }
                }
                Ok(vec![object])
            }
            Ok(other) => Err(ImportError::JsonParseError(format!(
                "顶层必须为数组或对象，实际为: {}",
                json_kind(&other)
            ))),
            // 整体解析失败时按 NDJSON 逐行解析
            Err(_) => {
                let values = serde_json::Deserializer::from_slice(bytes)
                    .into_iter::<JsonValue>()
                    .collect::<Result<Vec<_>, _>>()?;
                Self::expect_objects(values)
            }
        }
    }

    fn expect_objects(items: Vec<JsonValue>) -> ImportResult<Vec<Map<String, JsonValue>>> {
        items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                JsonValue::Object(object) => Ok(object),
                other => Err(ImportError::JsonParseError(format!(
                    "第 {} 条记录不是对象: {}",
                    idx + 1,
                    json_kind(&other)
                ))),
            })
            .collect()
    }
}

impl RecordParser for JsonParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Json
    }

    fn parse<'a>(&self, bytes: &'a [u8]) -> ImportResult<ParsedRows<'a>> {
        let body = strip_bom(bytes);
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(ImportError::EmptyInput);
        }
        let objects = Self::collect_objects(body)?;

        // 表头 = 所有对象键的并集（按首次出现顺序）
        let mut raw_headers: Vec<String> = Vec::new();
        for object in &objects {
            for key in object.keys() {
                if !raw_headers.iter().any(|h| h == key) {
                    raw_headers.push(key.clone());
                }
            }
        }
        let headers = normalize_headers(raw_headers.iter().cloned());

        let data_rows: Vec<Vec<(String, String)>> = objects
            .iter()
            .map(|object| {
                zip_row(
                    &headers,
                    raw_headers
                        .iter()
                        .map(|key| object.get(key).map(json_to_text).unwrap_or_default()),
                )
            })
            .filter(|values| !is_blank(values))
            .collect();

        let rows = data_rows
            .into_iter()
            .enumerate()
            .map(|(idx, values)| Ok(RawRecord::new(idx + 1, values)));

        Ok(ParsedRows {
            headers,
            rows: Box::new(rows),
        })
    }
}

// ==========================================
// 通用文件解析器（按声明格式或内容嗅探选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    /// 根据内容嗅探格式
    ///
    /// # 规则
    /// - ZIP 魔数 `PK\x03\x04` → xlsx
    /// - 首个非空白字符为 `[` / `{` → json
    /// - 其余合法 UTF-8 文本 → csv
    pub fn detect_format(bytes: &[u8]) -> ImportResult<SourceFormat> {
        if bytes.is_empty() {
            return Err(ImportError::EmptyInput);
        }
        if bytes.starts_with(b"PK\x03\x04") {
            return Ok(SourceFormat::Xlsx);
        }

        let text = std::str::from_utf8(strip_bom(bytes))
            .map_err(|e| ImportError::EncodingError(e.to_string()))?;
        match text.trim_start().chars().next() {
            Some('[') | Some('{') => Ok(SourceFormat::Json),
            Some(_) => Ok(SourceFormat::Csv),
            None => Err(ImportError::EmptyInput),
        }
    }

    pub fn parser_for(format: SourceFormat) -> &'static dyn RecordParser {
        match format {
            SourceFormat::Csv => &CsvParser,
            SourceFormat::Xlsx => &ExcelParser,
            SourceFormat::Json => &JsonParser,
        }
    }

    pub fn parse<'a>(
        &self,
        bytes: &'a [u8],
        declared: Option<SourceFormat>,
    ) -> ImportResult<(SourceFormat, ParsedRows<'a>)> {
        let format = match declared {
            Some(format) => format,
            None => Self::detect_format(bytes)?,
        };
        let parsed = Self::parser_for(format).parse(bytes)?;
        Ok((format, parsed))
    }
}

// ==========================================
// 辅助函数
// ==========================================

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
}

/// 表头规范化: 去空白；空表头 → column_{n}；重名追加 _{n}
pub fn normalize_headers<I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut headers: Vec<String> = Vec::new();
    for (idx, header) in raw.into_iter().enumerate() {
        let trimmed = header.trim();
        let base = if trimmed.is_empty() {
            format!("column_{}", idx + 1)
        } else {
            trimmed.to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 2;
        while headers.contains(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        headers.push(candidate);
    }
    headers
}

/// 按表头顺序组装行；缺失的尾部单元格补空串，多余单元格丢弃
fn zip_row<I>(headers: &[String], cells: I) -> Vec<(String, String)>
where
    I: Iterator<Item = String>,
{
    let mut cells = cells;
    headers
        .iter()
        .map(|header| (header.clone(), cells.next().unwrap_or_default()))
        .collect()
}

fn is_blank(values: &[(String, String)]) -> bool {
    values.iter().all(|(_, v)| v.trim().is_empty())
}

fn json_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(parsed: ParsedRows<'_>) -> Vec<RawRecord> {
        parsed.rows.collect::<ImportResult<Vec<_>>>().unwrap()
    }

    #[test]
    fn test_csv_parser_valid_content() {
        let bytes = "客户编码,名称,电话\nC001,张三,13800000000\nC002,李四,\n".as_bytes();
        let parsed = CsvParser.parse(bytes).unwrap();
        assert_eq!(parsed.headers, vec!["客户编码", "名称", "电话"]);

        let records = collect(parsed);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row_number, 1);
        assert_eq!(records[0].get("名称"), Some("张三"));
        assert_eq!(records[1].get("电话"), Some(""));
    }

    #[test]
    fn test_csv_parser_detects_semicolon_and_skips_blank_rows() {
        let bytes = b"\xEF\xBB\xBFcode;name\nA;Alpha\n;\nB;Beta\n";
        let records = collect(CsvParser.parse(bytes).unwrap());

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].row_number, 2);
        assert_eq!(records[1].get("code"), Some("B"));
    }

    #[test]
    fn test_csv_parser_short_rows_are_padded() {
        let records = collect(CsvParser.parse(b"a,b,c\n1,2\n").unwrap());
        assert_eq!(records[0].get("c"), Some(""));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(CsvParser::detect_delimiter("a\tb\tc"), b'\t');
        assert_eq!(CsvParser::detect_delimiter("a|b"), b'|');
        assert_eq!(CsvParser::detect_delimiter("single"), b',');
    }

    #[test]
    fn test_normalize_headers_blank_and_duplicate() {
        let headers = normalize_headers(vec![
            " code ".to_string(),
            "".to_string(),
            "code".to_string(),
            "code".to_string(),
        ]);
        assert_eq!(headers, vec!["code", "column_2", "code_2", "code_3"]);
    }

    #[test]
    fn test_json_parser_array_and_wrapper() {
        let array = br#"[{"code":"A","qty":3},{"code":"B","active":true}]"#;
        let parsed = JsonParser.parse(array).unwrap();
        assert_eq!(parsed.headers, vec!["code", "qty", "active"]);
        let records = collect(parsed);
        assert_eq!(records[0].get("qty"), Some("3"));
        assert_eq!(records[0].get("active"), Some(""));
        assert_eq!(records[1].get("active"), Some("true"));

        let wrapped = br#"{"records":[{"code":"A"}]}"#;
        assert_eq!(collect(JsonParser.parse(wrapped).unwrap()).len(), 1);
    }

    #[test]
    fn test_json_parser_ndjson() {
        let ndjson = b"{\"code\":\"A\"}\n{\"code\":\"B\"}\n";
        let records = collect(JsonParser.parse(ndjson).unwrap());
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("code"), Some("B"));
    }

    #[test]
    fn test_json_parser_rejects_scalars() {
        assert!(matches!(
            JsonParser.parse(b"[1,2]"),
            Err(ImportError::JsonParseError(_))
        ));
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(
            UniversalFileParser::detect_format(b"PK\x03\x04rest").unwrap(),
            SourceFormat::Xlsx
        );
        assert_eq!(
            UniversalFileParser::detect_format(b"  [{}]").unwrap(),
            SourceFormat::Json
        );
        assert_eq!(
            UniversalFileParser::detect_format(b"a,b\n1,2").unwrap(),
            SourceFormat::Csv
        );
        assert!(matches!(
            UniversalFileParser::detect_format(b""),
            Err(ImportError::EmptyInput)
        ));
        assert!(matches!(
            UniversalFileParser::detect_format(&[0xff, 0xfe, 0x00]),
            Err(ImportError::EncodingError(_))
        ));
    }

    #[test]
    fn test_corrupt_xlsx_is_format_error() {
        let result = UniversalFileParser.parse(b"PK\x03\x04not-a-zip", None);
        match result {
            Err(err) => assert_eq!(err.code(), "FORMAT_ERROR"),
            Ok(_) => panic!("损坏的 xlsx 应解析失败"),
        }
    }
}
