// ==========================================
// 文件数据仓储 (FDW) - 文件规范化
// ==========================================
// 职责: 上传文件 → 规范 CSV + 列规格 + 资源描述
// 步骤:
// 1. 格式转换: xls/xlsx 首个工作表 → `<stem>.csv`；CSV 原地清洗
// 2. 日期修复（见 date_repair）
// 3. 表头重命名: 新的 ColumnFormatter 会话 + 全文件类型推断
// 4. 写出资源描述（_scheme = file）
// ==========================================

use crate::domain::dataset::ColumnSpec;
use crate::domain::types::FileFormat;
use crate::importer::column_formatter::ColumnFormatter;
use crate::importer::date_repair::{repair_date_columns, DateRepairOutcome};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::{
    replace_file, tmp_path_for, write_csv, CsvRowStream, ExcelParser, FileParser,
};
use crate::importer::schema_resource::{ResourceScheme, SchemaResource};
use crate::importer::type_caster::TypeCaster;
use crate::importer::type_detector::TypeInference;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 格式转换结果
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedFile {
    pub csv_path: PathBuf,
    /// 是否由 Excel 转换生成
    pub converted: bool,
}

pub struct FileNormalizer {
    caster: TypeCaster,
    date_sample_rows: usize,
}

impl FileNormalizer {
    pub fn new(caster: TypeCaster, date_sample_rows: usize) -> Self {
        Self {
            caster,
            date_sample_rows,
        }
    }

    /// 步骤 1: 转为规范 CSV
    ///
    /// Excel 输出写到同目录 `<stem>.csv`，源文件保留。
    pub fn convert_to_csv(&self, source: &Path) -> ImportResult<ConvertedFile> {
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ImportError::UnsupportedFormat(ext.to_string()))?;

        match format {
            FileFormat::Csv => {
                self.clean_csv(source)?;
                Ok(ConvertedFile {
                    csv_path: source.to_path_buf(),
                    converted: false,
                })
            }
            FileFormat::Xls | FileFormat::Xlsx => {
                let table = ExcelParser.parse(source)?;
                let csv_path = source.with_extension("csv");
                let rows = write_csv(&csv_path, &table.headers, table.rows)?;
                info!(
                    source = %source.display(),
                    target = %csv_path.display(),
                    rows,
                    "Excel 已转换为 CSV"
                );
                Ok(ConvertedFile {
                    csv_path,
                    converted: true,
                })
            }
        }
    }

    /// CSV 原地清洗（去 BOM、跳过空白行、对齐行宽）
    fn clean_csv(&self, path: &Path) -> ImportResult<()> {
        let mut stream = CsvRowStream::open(path)?;
        let headers = stream.headers().to_vec();
        let mut rows = Vec::new();
        while let Some(row) = stream.next_row()? {
            rows.push(row);
        }
        drop(stream);

        let tmp = tmp_path_for(path);
        write_csv(&tmp, &headers, rows)?;
        replace_file(&tmp, path)
    }

    /// 步骤 2: 文本日期修复
    pub fn repair_dates(&self, csv_path: &Path) -> ImportResult<DateRepairOutcome> {
        repair_date_columns(csv_path, self.date_sample_rows, &self.caster)
    }

    /// 步骤 3: 表头 → 机器名，全文件推断类型
    pub fn describe_columns(&self, csv_path: &Path) -> ImportResult<Vec<ColumnSpec>> {
        let mut stream = CsvRowStream::open(csv_path)?;

        let mut formatter = ColumnFormatter::new();
        for label in stream.headers() {
            formatter.add_column(label);
        }
        let (labels, names) = formatter.get_columns();

        let mut inference = TypeInference::new(names.len(), self.caster.clone());
        while let Some(row) = stream.next_row()? {
            inference.observe(&row);
        }
        debug!(rows = inference.rows_observed(), "全文件类型推断完成");

        let columns = names
            .into_iter()
            .zip(labels)
            .zip(inference.finish())
            .map(|((name, label), field_type)| ColumnSpec::new(name, label, field_type))
            .collect();
        Ok(columns)
    }

    /// 步骤 4: 写出资源描述
    pub fn write_resource(
        &self,
        csv_path: &Path,
        columns: &[ColumnSpec],
        resource_path: &Path,
    ) -> ImportResult<SchemaResource> {
        let resource = SchemaResource::from_columns(csv_path, ResourceScheme::File, columns);
        resource.write_to(resource_path)?;
        Ok(resource)
    }
}
