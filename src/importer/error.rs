// ==========================================
// 文件数据仓储 (FDW) - 导入管道错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 单元格类型转换失败在宽松模式下不是错误（记入诊断）
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入管道错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .xlsx/.xls/.csv）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("文件写入失败: {0}")]
    FileWriteError(String),

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("文件无表头: {0}")]
    EmptyFile(String),

    // ===== 资源描述 =====
    #[error("资源描述文件无效 ({path}): {message}")]
    ResourceError { path: String, message: String },

    // ===== 类型转换 =====
    #[error("类型转换失败 (行 {row}, 字段 {field}): {message}")]
    TypeConversionError {
        row: usize,
        field: String,
        message: String,
    },

    // ===== 注册表 / 文档库 =====
    #[error("数据集不存在: {0}")]
    DatasetNotFound(String),

    #[error("数据集状态不满足条件: {0}")]
    PreconditionFailed(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    // ===== 配置错误 =====
    #[error("配置读取失败 (key: {key}): {message}")]
    ConfigReadError { key: String, message: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::InternalError(format!("JSON 处理失败: {}", err))
    }
}

impl ImportError {
    /// 配置读取失败的便捷构造
    pub fn config(key: &str, err: impl std::fmt::Display) -> Self {
        ImportError::ConfigReadError {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
