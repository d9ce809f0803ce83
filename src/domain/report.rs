// ==========================================
// 文件数据仓储 (FDW) - 报表与下载记录
// ==========================================

use crate::domain::types::DownloadFormat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Report - 数据集报表（按 user_id 归属）
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub dataset_id: String,
    pub user_id: String,
    pub name: String,
    pub columns: Vec<ReportColumn>, // 按 position 排序
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// 报表引用的列机器名（有序）
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.column_name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportColumn {
    pub column_id: String,   // → dataset_column.id
    pub column_name: String, // 冗余机器名，便于查询投影
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub dataset_id: String,
    pub user_id: String,
    pub name: String,
    pub columns: Vec<String>, // 列机器名，不属于数据集的会被忽略
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportChanges {
    pub name: Option<String>,
    pub columns: Option<Vec<String>>,
}

// ==========================================
// DownloadRequest - 导出审计记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: String,
    pub dataset_id: String,
    pub user_id: String,
    pub columns: Vec<String>, // 请求的列
    pub exclude: Vec<String>, // 未请求的列（计算得出）
    pub format: DownloadFormat,
    pub created_at: DateTime<Utc>,
}

// 导出结果: 存储路径 + 对外链接
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadLink {
    pub path: String,
    pub link: String,
}
