// ==========================================
// 数据迁移导入引擎 - 源数据适配器
// ==========================================
// 职责: 字节流 → 源 schema + 可重复迭代的记录序列
// 约束: 纯函数，不产生持久化副作用（由调用方负责保存）
// ==========================================

use crate::domain::source::{ColumnInfo, RawRecord, SourceSchema};
use crate::domain::types::{FieldType, SourceFormat};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{RecordIter, UniversalFileParser};
use crate::importer::value_parser;
use std::sync::Arc;
use tracing::{debug, instrument};

/// 每列保留的样本数
const SAMPLE_LIMIT: usize = 3;

// ==========================================
// SourceLimits - 解析上限
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct SourceLimits {
    pub max_columns: usize,
    pub max_upload_bytes: usize,
    pub inference_sample_rows: usize,
}

// ==========================================
// RecordSource - 可重复迭代的记录序列
// ==========================================
// 持有原始字节，每次迭代重新解析，保证行序确定
#[derive(Clone)]
pub struct RecordSource {
    format: SourceFormat,
    bytes: Arc<Vec<u8>>,
}

impl RecordSource {
    pub fn new(format: SourceFormat, bytes: Arc<Vec<u8>>) -> Self {
        Self { format, bytes }
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 从头开始迭代
    pub fn records(&self) -> ImportResult<RecordIter<'_>> {
        let parsed = UniversalFileParser::parser_for(self.format).parse(&self.bytes)?;
        Ok(parsed.rows)
    }

    /// 前 n 条记录
    pub fn preview(&self, n: usize) -> ImportResult<Vec<RawRecord>> {
        self.records()?.take(n).collect()
    }
}

// ==========================================
// ParsedSource - 解析结果
// ==========================================
pub struct ParsedSource {
    pub schema: SourceSchema,
    pub records: RecordSource,
}

// ==========================================
// SourceAdapter
// ==========================================
pub struct SourceAdapter {
    limits: SourceLimits,
}

impl SourceAdapter {
    pub fn new(limits: SourceLimits) -> Self {
        Self { limits }
    }

    /// 解析上传内容
    ///
    /// # 参数
    /// - bytes: 上传的原始字节
    /// - declared: 调用方声明的格式（为空时按内容嗅探）
    ///
    /// # 错误
    /// - 格式无法识别 / 内容损坏 / 超过大小上限 → FORMAT_ERROR
    /// - 列数超过上限 → SCHEMA_TOO_LARGE
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn parse(&self, bytes: Vec<u8>, declared: Option<SourceFormat>) -> ImportResult<ParsedSource> {
        if bytes.is_empty() {
            return Err(ImportError::EmptyInput);
        }
        if bytes.len() > self.limits.max_upload_bytes {
            return Err(ImportError::FileTooLarge {
                size: bytes.len(),
                limit: self.limits.max_upload_bytes,
            });
        }

        let shared = Arc::new(bytes);
        let (format, parsed) = UniversalFileParser.parse(&shared, declared)?;
        let headers = parsed.headers;
        if headers.is_empty() {
            return Err(ImportError::NoColumns);
        }
        if headers.len() > self.limits.max_columns {
            return Err(ImportError::SchemaTooLarge {
                columns: headers.len(),
                limit: self.limits.max_columns,
            });
        }

        // 完整遍历一次: 统计行数 + 尽早暴露解析错误
        let mut inference = SchemaInference::new(&headers, self.limits.inference_sample_rows);
        let mut record_count = 0usize;
        for record in parsed.rows {
            let record = record?;
            inference.observe(&record);
            record_count += 1;
        }

        let schema = SourceSchema {
            format,
            columns: inference.finish(),
            record_count,
        };
        debug!(
            format = %format,
            columns = schema.columns.len(),
            record_count,
            "源文件解析完成"
        );

        Ok(ParsedSource {
            schema,
            records: RecordSource::new(format, shared.clone()),
        })
    }
}

// ==========================================
// SchemaInference - 列类型推断
// ==========================================
struct ColumnStats {
    name: String,
    samples: Vec<String>,
    empty_count: usize,
    non_empty: usize,
    all_integer: bool,
    all_decimal: bool,
    all_date: bool,
    all_boolean: bool,
}

impl ColumnStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            samples: Vec::new(),
            empty_count: 0,
            non_empty: 0,
            all_integer: true,
            all_decimal: true,
            all_date: true,
            all_boolean: true,
        }
    }

    fn observe(&mut self, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            self.empty_count += 1;
            return;
        }
        self.non_empty += 1;
        if self.samples.len() < SAMPLE_LIMIT && !self.samples.iter().any(|s| s == value) {
            self.samples.push(value.to_string());
        }

        self.all_integer &= value_parser::parse_integer(value).is_some();
        self.all_decimal &= value_parser::parse_decimal(value).is_some();
        self.all_date &= value_parser::parse_date(value, None).is_some();
        self.all_boolean &= value_parser::parse_boolean(value).is_some();
    }

    fn inferred_type(&self) -> FieldType {
        // 无值的列按文本处理
        if self.non_empty == 0 {
            return FieldType::Text;
        }
        if self.all_integer {
            FieldType::Integer
        } else if self.all_decimal {
            FieldType::Decimal
        } else if self.all_date {
            FieldType::Date
        } else if self.all_boolean {
            FieldType::Boolean
        } else {
            FieldType::Text
        }
    }
}

struct SchemaInference {
    columns: Vec<ColumnStats>,
    sample_rows: usize,
    seen: usize,
}

impl SchemaInference {
    fn new(headers: &[String], sample_rows: usize) -> Self {
        Self {
            columns: headers.iter().map(|h| ColumnStats::new(h)).collect(),
            sample_rows,
            seen: 0,
        }
    }

    fn observe(&mut self, record: &RawRecord) {
        if self.seen >= self.sample_rows {
            return;
        }
        self.seen += 1;
        for column in &mut self.columns {
            column.observe(record.get(&column.name).unwrap_or(""));
        }
    }

    fn finish(self) -> Vec<ColumnInfo> {
        self.columns
            .into_iter()
            .enumerate()
            .map(|(position, stats)| ColumnInfo {
                inferred_type: stats.inferred_type(),
                name: stats.name,
                position,
                samples: stats.samples,
                empty_count: stats.empty_count,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SourceAdapter {
        SourceAdapter::new(SourceLimits {
            max_columns: 4,
            max_upload_bytes: 1024,
            inference_sample_rows: 50,
        })
    }

    #[test]
    fn test_parse_infers_types_and_samples() {
        let csv = "code,qty,price,joined,active,note\n\
                   A,1,1.5,2024-01-02,yes,x\n\
                   B,2,2,2024-02-03,no,\n\
                   C,3,3.25,2024-03-04,yes,y\n\
                   D,4,4,2024-04-05,no,z\n";
        let adapter = SourceAdapter::new(SourceLimits {
            max_columns: 10,
            max_upload_bytes: 1024,
            inference_sample_rows: 50,
        });
        let parsed = adapter.parse(csv.as_bytes().to_vec(), None).unwrap();
        let schema = &parsed.schema;

        assert_eq!(schema.format, SourceFormat::Csv);
        assert_eq!(schema.record_count, 4);
        assert_eq!(schema.column("qty").unwrap().inferred_type, FieldType::Integer);
        assert_eq!(schema.column("price").unwrap().inferred_type, FieldType::Decimal);
        assert_eq!(schema.column("joined").unwrap().inferred_type, FieldType::Date);
        assert_eq!(schema.column("active").unwrap().inferred_type, FieldType::Boolean);
        assert_eq!(schema.column("code").unwrap().samples, vec!["A", "B", "C"]);
        assert_eq!(schema.column("note").unwrap().empty_count, 1);
    }

    #[test]
    fn test_record_source_is_restartable() {
        let parsed = adapter()
            .parse(b"code,name\nA,Alpha\nB,Beta\n".to_vec(), None)
            .unwrap();

        let first: Vec<_> = parsed.records.records().unwrap().collect();
        let second: Vec<_> = parsed.records.records().unwrap().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(
            first.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>(),
            second.into_iter().map(|r| r.unwrap()).collect::<Vec<_>>()
        );
        assert_eq!(parsed.records.preview(1).unwrap().len(), 1);
    }

    #[test]
    fn test_schema_too_large() {
        let result = adapter().parse(b"a,b,c,d,e\n1,2,3,4,5\n".to_vec(), None);
        match result {
            Err(err @ ImportError::SchemaTooLarge { .. }) => {
                assert_eq!(err.code(), "SCHEMA_TOO_LARGE")
            }
            _ => panic!("超过列数上限应失败"),
        }
    }

    #[test]
    fn test_upload_size_cap() {
        let result = adapter().parse(vec![b'a'; 2048], None);
        assert!(matches!(result, Err(ImportError::FileTooLarge { .. })));
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            adapter().parse(Vec::new(), None),
            Err(ImportError::EmptyInput)
        ));
    }
}
