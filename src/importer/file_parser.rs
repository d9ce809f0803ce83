// ==========================================
// 文件数据仓储 (FDW) - 文件解析器
// ==========================================
// 支持: Excel (.xlsx/.xls，首个工作表) / CSV (.csv)
// 清洗: 去表头 BOM、跳过空白行、行宽对齐表头（补空/截断）
// ==========================================

use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto, Data, Reader};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const UTF8_BOM: char = '\u{feff}';

/// 内存中的表格（表头 + 行）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

// ==========================================
// FileParser Trait
// ==========================================
pub trait FileParser {
    /// 解析为表头 + 行（已清洗）
    fn parse(&self, file_path: &Path) -> ImportResult<RawTable>;
}

fn ensure_exists(path: &Path) -> ImportResult<()> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    Ok(())
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// 行宽对齐表头
fn fit_width(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|v| v.trim().is_empty())
}

// ==========================================
// CsvRowStream - 流式 CSV 读取
// ==========================================
pub struct CsvRowStream {
    reader: csv::Reader<BufReader<File>>,
    headers: Vec<String>,
    record: StringRecord,
}

impl CsvRowStream {
    pub fn open(path: &Path) -> ImportResult<Self> {
        ensure_exists(path)?;
        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(BufReader::new(file));

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                if i == 0 {
                    h.trim_start_matches(UTF8_BOM).to_string()
                } else {
                    h.to_string()
                }
            })
            .collect();

        if headers.is_empty() {
            return Err(ImportError::EmptyFile(path.display().to_string()));
        }

        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// 读取下一行非空白数据（已对齐表头宽度），文件结束返回 None
    pub fn next_row(&mut self) -> ImportResult<Option<Vec<String>>> {
        loop {
            if !self.reader.read_record(&mut self.record)? {
                return Ok(None);
            }
            let row: Vec<String> = self.record.iter().map(|v| v.to_string()).collect();
            if is_blank(&row) {
                continue;
            }
            return Ok(Some(fit_width(row, self.headers.len())));
        }
    }
}

// ==========================================
// CSV Parser
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse(&self, file_path: &Path) -> ImportResult<RawTable> {
        let ext = extension_of(file_path);
        if ext != "csv" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let mut stream = CsvRowStream::open(file_path)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next_row()? {
            rows.push(row);
        }

        Ok(RawTable {
            headers: stream.headers().to_vec(),
            rows,
        })
    }
}

// ==========================================
// Excel Parser
// ==========================================
pub struct ExcelParser;

impl ExcelParser {
    /// Excel 单元格 → 文本（日期转 ISO，整数值浮点去掉小数部分）
    pub fn cell_to_string(cell: &Data) -> String {
        match cell {
            Data::Empty => String::new(),
            Data::String(s) => s.clone(),
            Data::Int(i) => i.to_string(),
            Data::Float(f) => f.to_string(),
            Data::Bool(b) => b.to_string(),
            Data::DateTime(dt) => dt
                .as_datetime()
                .map(|d| d.format("%Y-%m-%dT%H:%M:%S").to_string())
                .unwrap_or_else(|| cell.to_string()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
            Data::Error(e) => e.to_string(),
        }
    }
}

impl FileParser for ExcelParser {
    fn parse(&self, file_path: &Path) -> ImportResult<RawTable> {
        ensure_exists(file_path)?;

        let ext = extension_of(file_path);
        if ext != "xlsx" && ext != "xls" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let mut workbook = open_workbook_auto(file_path)?;

        let sheet_names = workbook.sheet_names();
        let sheet_name = sheet_names
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;
        let range = workbook.worksheet_range(&sheet_name)?;

        let mut rows_iter = range.rows();
        let header_row = rows_iter
            .next()
            .ok_or_else(|| ImportError::EmptyFile(file_path.display().to_string()))?;

        let headers: Vec<String> = header_row.iter().map(Self::cell_to_string).collect();

        let mut rows = Vec::new();
        for data_row in rows_iter {
            let row: Vec<String> = data_row.iter().map(Self::cell_to_string).collect();
            if is_blank(&row) {
                continue;
            }
            rows.push(fit_width(row, headers.len()));
        }

        Ok(RawTable { headers, rows })
    }
}

// ==========================================
// CSV 写出
// ==========================================

/// 写出 CSV（表头原样写出）
pub fn write_csv<I>(path: &Path, headers: &[String], rows: I) -> ImportResult<usize>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let file = File::create(path).map_err(|e| ImportError::FileWriteError(e.to_string()))?;
    let mut writer = WriterBuilder::new().from_writer(file);

    writer.write_record(headers)?;
    let mut count = 0;
    for row in rows {
        writer.write_record(&row)?;
        count += 1;
    }
    writer
        .flush()
        .map_err(|e| ImportError::FileWriteError(e.to_string()))?;
    Ok(count)
}

/// 通过 `.tmp` 临时文件原子替换目标文件
pub fn replace_file(tmp: &Path, target: &Path) -> ImportResult<()> {
    std::fs::rename(tmp, target).map_err(|e| {
        ImportError::FileWriteError(format!(
            "替换 {} 失败: {}",
            target.display(),
            e
        ))
    })
}

/// 同目录下的 `.tmp` 路径
pub fn tmp_path_for(target: &Path) -> std::path::PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}
