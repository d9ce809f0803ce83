// ==========================================
// 文件数据仓储 (FDW) - 数据集领域模型
// ==========================================
// 职责: Dataset / DatasetColumn 实体与变更结构
// 对齐: registry 库 dataset / dataset_column 表
// ==========================================

use crate::domain::types::{DatasetSource, DatasetStatus, FieldType, FileFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// Dataset - 数据集（注册表记录）
// ==========================================
// 红线: 抽取进行中 locked = true
// 红线: fields > 0 后不可再绑定列结构
// 红线: prod_tablename 只允许设置一次
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    // ===== 主键与归属 =====
    pub id: String,
    pub project_id: String,
    pub user_id: String,

    // ===== 基础信息 =====
    pub name: String,
    pub description: Option<String>,
    pub source: Option<DatasetSource>,

    // ===== 文件信息 =====
    pub filename: Option<String>,      // 原始上传文件名
    pub uuid_filename: Option<String>, // 存储文件名
    pub file: Option<String>,          // 相对 base_dir 的存储路径
    pub format: Option<FileFormat>,
    pub resource_file: Option<String>, // 资源描述文件路径

    // ===== 生命周期 =====
    pub status: DatasetStatus,
    pub locked: bool,

    // ===== 仓储信息 =====
    pub stagging_tablename: Option<String>,
    pub prod_tablename: Option<String>,
    pub stagging_recordcount: i64,
    pub prod_recordcount: i64,
    pub extraction_duration: Option<f64>, // 秒

    // ===== 派生字段 =====
    pub fields: i64, // 已绑定列数

    // ===== 审计字段 =====
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dataset {
    /// 列结构是否已绑定
    pub fn has_schema(&self) -> bool {
        self.fields > 0
    }

    /// 抽取结果所在集合（staging 与 production 为同一集合）
    pub fn collection(&self) -> Option<&str> {
        self.prod_tablename
            .as_deref()
            .or(self.stagging_tablename.as_deref())
    }
}

// ==========================================
// NewDataset - 登记数据集入参
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDataset {
    pub project_id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
}

// ==========================================
// DatasetUpdate - 注册表字段级更新
// ==========================================
// None 表示不修改
#[derive(Debug, Clone, Default)]
pub struct DatasetUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub source: Option<DatasetSource>,
    pub filename: Option<String>,
    pub uuid_filename: Option<String>,
    pub file: Option<String>,
    pub format: Option<FileFormat>,
    pub resource_file: Option<String>,
    pub status: Option<DatasetStatus>,
    pub locked: Option<bool>,
    pub stagging_tablename: Option<String>,
    pub prod_tablename: Option<String>,
    pub stagging_recordcount: Option<i64>,
    pub prod_recordcount: Option<i64>,
    pub extraction_duration: Option<f64>,
    pub deleted: Option<bool>,
}

impl DatasetUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.source.is_none()
            && self.filename.is_none()
            && self.uuid_filename.is_none()
            && self.file.is_none()
            && self.format.is_none()
            && self.resource_file.is_none()
            && self.status.is_none()
            && self.locked.is_none()
            && self.stagging_tablename.is_none()
            && self.prod_tablename.is_none()
            && self.stagging_recordcount.is_none()
            && self.prod_recordcount.is_none()
            && self.extraction_duration.is_none()
            && self.deleted.is_none()
    }
}

// ==========================================
// DatasetChanges - 用户可编辑字段
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl From<DatasetChanges> for DatasetUpdate {
    fn from(changes: DatasetChanges) -> Self {
        DatasetUpdate {
            name: changes.name,
            description: changes.description,
            ..Default::default()
        }
    }
}

// ==========================================
// DatasetColumn - 数据集列
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetColumn {
    pub id: String,
    pub dataset_id: String,
    pub name: String,         // 机器名（数据集内唯一）
    pub display_name: String, // 原始表头
    pub datatype: FieldType,
    pub position: i64,
}

// ==========================================
// ColumnSpec - 列规格（管道输出 / 人工建列入参）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            field_type,
        }
    }
}

// 人工建列入参: 显示名 + 类型名（类型名在 API 层校验）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualColumn {
    pub display_name: String,
    pub datatype: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_changes_into_update() {
        let update: DatasetUpdate = DatasetChanges {
            name: Some("新名称".to_string()),
            description: None,
        }
        .into();
        assert_eq!(update.name.as_deref(), Some("新名称"));
        assert!(update.status.is_none());
        assert!(!update.is_empty());
        assert!(DatasetUpdate::default().is_empty());
    }

    #[test]
    fn test_column_spec_serializes_type_key() {
        let spec = ColumnSpec::new("amount", "Amount", FieldType::Number);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "number");
        assert_eq!(json["label"], "Amount");
    }
}
