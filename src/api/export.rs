// ==========================================
// 文件数据仓储 (FDW) - 导出文件写出
// ==========================================
// 格式: csv / xlsx（工作表名 data）
// 链接: <server_base_url>/cdn/<相对目录>/<文件名>
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::types::DownloadFormat;
use crate::domain::value::{CellValue, Document};
use crate::repository::DOC_ID_FIELD;
use rust_xlsxwriter::Workbook;
use std::path::Path;

pub const XLSX_SHEET_NAME: &str = "data";

// Excel 能精确表示的整数范围
const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// 待写出的二维表
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ExportSheet {
    /// 文档 → 表格，`_id` 固定为首列，其余按 columns 顺序
    pub fn from_documents(docs: &[Document], columns: &[String]) -> Self {
        let mut headers = Vec::with_capacity(columns.len() + 1);
        headers.push(DOC_ID_FIELD.to_string());
        headers.extend(columns.iter().cloned());

        let rows = docs
            .iter()
            .map(|doc| {
                headers
                    .iter()
                    .map(|h| {
                        doc.get(h)
                            .map(CellValue::from_document_value)
                            .unwrap_or(CellValue::Null)
                    })
                    .collect()
            })
            .collect();

        Self { headers, rows }
    }

    /// 只有表头的空表（模板）
    pub fn header_only(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }
}

pub fn download_link(server_base_url: &str, folder: &Path, filename: &str) -> String {
    let folder = folder.to_string_lossy().replace('\\', "/");
    format!(
        "{}/cdn/{}/{}",
        server_base_url.trim_end_matches('/'),
        folder.trim_matches('/'),
        filename
    )
}

/// 按格式写出
pub fn write_export(path: &Path, format: DownloadFormat, sheet: &ExportSheet) -> ApiResult<()> {
    match format {
        DownloadFormat::Csv => write_csv_export(path, sheet),
        DownloadFormat::Xlsx => write_xlsx_export(path, sheet),
    }
}

fn write_csv_export(path: &Path, sheet: &ExportSheet) -> ApiResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&sheet.headers)?;
    for row in &sheet.rows {
        writer.write_record(row.iter().map(CellValue::to_export_string))?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx_export(path: &Path, sheet: &ExportSheet) -> ApiResult<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(XLSX_SHEET_NAME)?;

    for (col, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string(0, col_index(col)?, header)?;
    }

    for (r, row) in sheet.rows.iter().enumerate() {
        let excel_row = u32::try_from(r + 1)
            .map_err(|_| ApiError::InvalidInput("导出行数超出 Excel 上限".to_string()))?;
        for (c, cell) in row.iter().enumerate() {
            let excel_col = col_index(c)?;
            match cell {
                CellValue::Null => {}
                CellValue::Bool(b) => {
                    worksheet.write_boolean(excel_row, excel_col, *b)?;
                }
                CellValue::Integer(i) if i.unsigned_abs() <= MAX_SAFE_INTEGER as u64 => {
                    worksheet.write_number(excel_row, excel_col, *i as f64)?;
                }
                // 精确小数与超大整数按文本写出
                other => {
                    worksheet.write_string(excel_row, excel_col, other.to_export_string())?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn col_index(col: usize) -> ApiResult<u16> {
    u16::try_from(col).map_err(|_| ApiError::InvalidInput("导出列数超出 Excel 上限".to_string()))
}
