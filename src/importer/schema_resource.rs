// ==========================================
// 文件数据仓储 (FDW) - 表格资源描述文件
// ==========================================
// 职责: `<stem>.resource.json` 的读写（字段 + 类型 + 缺失值标记）
// 格式: tabular-data-resource，`_scheme` 区分文件导入 / 人工建表
// ==========================================

use crate::domain::dataset::ColumnSpec;
use crate::domain::types::FieldType;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::type_caster::DEFAULT_MISSING_VALUES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const RESOURCE_SUFFIX: &str = ".resource.json";
pub const RESOURCE_PROFILE: &str = "tabular-data-resource";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceScheme {
    File,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    pub fields: Vec<ResourceField>,
    #[serde(rename = "missingValues")]
    pub missing_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaResource {
    pub name: String,
    pub path: String,
    pub profile: String,
    pub format: String,
    pub encoding: String,
    #[serde(rename = "_scheme")]
    pub scheme: ResourceScheme,
    pub schema: ResourceSchema,
}

/// `<dir>/<stem>.resource.json`
pub fn resource_path_for(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    file.with_file_name(format!("{}{}", stem, RESOURCE_SUFFIX))
}

impl SchemaResource {
    pub fn new(data_file: &Path, scheme: ResourceScheme, fields: Vec<ResourceField>) -> Self {
        let name = data_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = data_file
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            name,
            path,
            profile: RESOURCE_PROFILE.to_string(),
            format: "csv".to_string(),
            encoding: "utf-8".to_string(),
            scheme,
            schema: ResourceSchema {
                fields,
                missing_values: DEFAULT_MISSING_VALUES.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    /// 人工建表: 没有数据文件，path 为空
    pub fn manual(name: &str, fields: Vec<ResourceField>) -> Self {
        let mut resource = Self::new(Path::new(""), ResourceScheme::Manual, fields);
        resource.name = name.to_string();
        resource
    }

    pub fn from_columns(data_file: &Path, scheme: ResourceScheme, columns: &[ColumnSpec]) -> Self {
        let fields = columns
            .iter()
            .map(|c| ResourceField {
                name: c.name.clone(),
                field_type: c.field_type,
            })
            .collect();
        Self::new(data_file, scheme, fields)
    }

    pub fn write_to(&self, path: &Path) -> ImportResult<()> {
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body).map_err(|e| ImportError::FileWriteError(e.to_string()))
    }

    pub fn read_from(path: &Path) -> ImportResult<Self> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        let body = std::fs::read_to_string(path)?;
        serde_json::from_str(&body).map_err(|e| ImportError::ResourceError {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.schema
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.field_type)
    }

    /// 修改字段类型，字段不存在时返回 false
    pub fn set_field_type(&mut self, name: &str, field_type: FieldType) -> bool {
        match self.schema.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => {
                field.field_type = field_type;
                true
            }
            None => false,
        }
    }

    /// (机器名, 类型) 列表，按字段顺序
    pub fn typed_fields(&self) -> Vec<(String, FieldType)> {
        self.schema
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.field_type))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resource_path_for() {
        let p = resource_path_for(Path::new("/media/dataset/Jan-2024/payroll_ab12c.csv"));
        assert_eq!(
            p,
            PathBuf::from("/media/dataset/Jan-2024/payroll_ab12c.resource.json")
        );
    }

    #[test]
    fn test_write_layout() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("payroll.csv");
        let res = SchemaResource::new(
            &data,
            ResourceScheme::File,
            vec![ResourceField {
                name: "amount".into(),
                field_type: FieldType::Number,
            }],
        );
        let path = resource_path_for(&data);
        res.write_to(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["name"], "payroll");
        assert_eq!(raw["path"], "payroll.csv");
        assert_eq!(raw["profile"], "tabular-data-resource");
        assert_eq!(raw["_scheme"], "file");
        assert_eq!(raw["schema"]["fields"][0]["type"], "number");
        assert_eq!(raw["schema"]["missingValues"].as_array().unwrap().len(), 6);

        assert_eq!(SchemaResource::read_from(&path).unwrap(), res);
    }

    #[test]
    fn test_set_field_type() {
        let mut res = SchemaResource::new(
            Path::new("x.csv"),
            ResourceScheme::Manual,
            vec![ResourceField {
                name: "n".into(),
                field_type: FieldType::Integer,
            }],
        );
        assert!(res.set_field_type("n", FieldType::Number));
        assert!(!res.set_field_type("missing", FieldType::Number));
        assert_eq!(res.field_type("n"), Some(FieldType::Number));
        assert_eq!(res.field_type("missing"), None);
    }

    #[test]
    fn test_read_invalid_resource() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.resource.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            SchemaResource::read_from(&path),
            Err(ImportError::ResourceError { .. })
        ));
    }
}
