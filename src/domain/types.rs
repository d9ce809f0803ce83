// ==========================================
// 文件数据仓储 (FDW) - 领域类型定义
// ==========================================
// 职责: 数据集状态、来源、字段类型、文件格式等枚举
// 序列化格式: 小写 (与 registry 表及资源描述文件一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 数据集生命周期状态 (Dataset Status)
// ==========================================
// created → extracting → extracted | failed
// created → ready (人工录入，绕过文件管道)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Created,    // 已登记
    Extracting, // 抽取中（locked）
    Extracted,  // 抽取完成
    Failed,     // 失败（仅由人工重置产生）
    Ready,      // 人工录入数据可用
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl DatasetStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "extracting" => DatasetStatus::Extracting,
            "extracted" => DatasetStatus::Extracted,
            "failed" => DatasetStatus::Failed,
            "ready" => DatasetStatus::Ready,
            _ => DatasetStatus::Created, // 默认值
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            DatasetStatus::Created => "created",
            DatasetStatus::Extracting => "extracting",
            DatasetStatus::Extracted => "extracted",
            DatasetStatus::Failed => "failed",
            DatasetStatus::Ready => "ready",
        }
    }
}

// ==========================================
// 数据来源 (Dataset Source / Resource Scheme)
// ==========================================
// 同时用作资源描述文件中的 `_scheme` 标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    File,   // 文件上传
    Manual, // 人工建列/录入
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl DatasetSource {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Some(DatasetSource::File),
            "manual" => Some(DatasetSource::Manual),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            DatasetSource::File => "file",
            DatasetSource::Manual => "manual",
        }
    }
}

// ==========================================
// 字段语义类型 (Field Type)
// ==========================================
// API 类型 12 种 + 辅助类型 year/yearmonth/duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Date,
    Time,
    Datetime,
    Geopoint,
    Geojson,
    Any,
    Year,
    Yearmonth,
    Duration,
}

impl FieldType {
    /// 对外开放（可人工建列）的类型
    pub const API_TYPES: [FieldType; 12] = [
        FieldType::String,
        FieldType::Number,
        FieldType::Integer,
        FieldType::Boolean,
        FieldType::Object,
        FieldType::Array,
        FieldType::Date,
        FieldType::Time,
        FieldType::Datetime,
        FieldType::Geopoint,
        FieldType::Geojson,
        FieldType::Any,
    ];

    /// 仅由类型推断产生的辅助类型
    pub const OTHER_TYPES: [FieldType; 3] =
        [FieldType::Year, FieldType::Yearmonth, FieldType::Duration];

    /// 解析类型名称（大小写不敏感）
    pub fn from_str(s: &str) -> Option<Self> {
        let ft = match s.trim().to_lowercase().as_str() {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "integer" => FieldType::Integer,
            "boolean" => FieldType::Boolean,
            "object" => FieldType::Object,
            "array" => FieldType::Array,
            "date" => FieldType::Date,
            "time" => FieldType::Time,
            "datetime" => FieldType::Datetime,
            "geopoint" => FieldType::Geopoint,
            "geojson" => FieldType::Geojson,
            "any" => FieldType::Any,
            "year" => FieldType::Year,
            "yearmonth" => FieldType::Yearmonth,
            "duration" => FieldType::Duration,
            _ => return None,
        };
        Some(ft)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Integer => "integer",
            FieldType::Boolean => "boolean",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Date => "date",
            FieldType::Time => "time",
            FieldType::Datetime => "datetime",
            FieldType::Geopoint => "geopoint",
            FieldType::Geojson => "geojson",
            FieldType::Any => "any",
            FieldType::Year => "year",
            FieldType::Yearmonth => "yearmonth",
            FieldType::Duration => "duration",
        }
    }

    /// 是否为 API 类型（人工建列时校验）
    pub fn is_api_type(&self) -> bool {
        Self::API_TYPES.contains(self)
    }

    /// 全部类型名称（API 类型在前）
    pub fn all_type_names() -> Vec<&'static str> {
        Self::API_TYPES
            .iter()
            .chain(Self::OTHER_TYPES.iter())
            .map(|t| t.as_str())
            .collect()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 上传文件格式 (File Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Xls,
    Xlsx,
}

impl FileFormat {
    /// 从扩展名解析（带或不带前导 `.`，大小写不敏感）
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim().trim_start_matches('.').to_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "xls" => Some(FileFormat::Xls),
            "xlsx" => Some(FileFormat::Xlsx),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Xls => "xls",
            FileFormat::Xlsx => "xlsx",
        }
    }

    /// 可接受的上传扩展名
    pub fn accepted_extensions() -> [&'static str; 3] {
        [".xls", ".xlsx", ".csv"]
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ==========================================
// 下载/导出格式 (Download Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Xlsx,
    Csv,
}

impl DownloadFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "xlsx" => Some(DownloadFormat::Xlsx),
            "csv" => Some(DownloadFormat::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::Xlsx => "xlsx",
            DownloadFormat::Csv => "csv",
        }
    }

    pub fn supported() -> [&'static str; 2] {
        ["xlsx", "csv"]
    }
}

// ==========================================
// 类型转换模式 (Cast Mode)
// ==========================================
// Lenient: 尽力而为，转换失败保留原值并记录诊断
// Strict:  首个诊断即视为错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastMode {
    #[default]
    Lenient,
    Strict,
}

impl CastMode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "strict" => CastMode::Strict,
            _ => CastMode::Lenient,
        }
    }
}
