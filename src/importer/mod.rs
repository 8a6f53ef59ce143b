// ==========================================
// 数据迁移导入引擎 - 导入层（源数据适配器）
// ==========================================
// 职责: 上传字节流解析为源 schema + 原始记录序列
// 支持: CSV / Excel / JSON
// ==========================================

// 模块声明
pub mod error;
pub mod file_parser;
pub mod source_adapter;
pub mod value_parser;

// 重导出核心类型
pub use error::{ImportError, ImportResult};
pub use file_parser::{
    CsvParser, ExcelParser, JsonParser, RecordIter, RecordParser, UniversalFileParser,
};
pub use source_adapter::{ParsedSource, RecordSource, SourceAdapter, SourceLimits};
