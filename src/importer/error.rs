// ==========================================
// 数据迁移导入引擎 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 摄取阶段错误只中止当前操作，作业状态保持不变
// ==========================================

use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 格式识别错误 =====
    #[error("文件格式不支持: {0}（仅支持 csv / xlsx / json）")]
    UnsupportedFormat(String),

    #[error("文件内容为空")]
    EmptyInput,

    #[error("文件过大: {size} 字节，上限 {limit} 字节")]
    FileTooLarge { size: usize, limit: usize },

    #[error("文本编码错误: {0}（仅支持 UTF-8）")]
    EncodingError(String),

    // ===== 解析错误 =====
    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("JSON 解析失败: {0}")]
    JsonParseError(String),

    // ===== schema 错误 =====
    #[error("列数过多: {columns} 列，上限 {limit} 列")]
    SchemaTooLarge { columns: usize, limit: usize },

    #[error("未检测到任何列")]
    NoColumns,
}

impl ImportError {
    /// 错误分类代码
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::SchemaTooLarge { .. } => "SCHEMA_TOO_LARGE",
            _ => "FORMAT_ERROR",
        }
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

// 实现 From<calamine::XlsxError>
impl From<calamine::XlsxError> for ImportError {
    fn from(err: calamine::XlsxError) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

// 实现 From<serde_json::Error>
impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::JsonParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
