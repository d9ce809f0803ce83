// ==========================================
// 文件数据仓储 (FDW) - 日期字符串修复
// ==========================================
// 职责: 识别以文本形式存储的日期列，统一改写为 ISO 时间戳
// 流程:
// 1. 取前 N 行样本推断类型，只有推断为 string 的列才是候选
// 2. 候选列的全部非缺失样本均可按日优先解析 → 日期列
// 3. 存在日期列时整文件重写（`.tmp` + rename），无法解析的单元格保持原样
// 已知局限: 样本窗口之后才出现的日期不会被识别；形似日期的数字串可能被改写
// ==========================================

use crate::domain::types::FieldType;
use crate::importer::error::ImportResult;
use crate::importer::file_parser::{replace_file, tmp_path_for, CsvRowStream};
use crate::importer::type_caster::TypeCaster;
use crate::importer::type_detector::TypeInference;
use chrono::{NaiveDate, NaiveDateTime};
use csv::WriterBuilder;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// 改写后的输出格式
pub const REPAIRED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// 两位年份格式排在四位之前，`%Y` 也会吞下两位数字
const DAY_FIRST_DATETIME: [&str; 6] = [
    "%d/%m/%y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
];

const DAY_FIRST_DATE: [&str; 12] = [
    "%d/%m/%y",
    "%d/%m/%Y",
    "%d-%m-%y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%d-%b-%Y",
    "%d-%b-%y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y/%m/%d",
];

const MONTH_FIRST_DATETIME: [&str; 2] = ["%m/%d/%Y %H:%M:%S", "%m/%d/%Y %H:%M"];

const MONTH_FIRST_DATE: [&str; 3] = ["%m/%d/%y", "%m/%d/%Y", "%m-%d-%Y"];

fn try_formats(raw: &str, datetime_formats: &[&str], date_formats: &[&str]) -> Option<NaiveDateTime> {
    for fmt in datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// 日优先解析，失败后回退到月优先
pub fn parse_day_first(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    try_formats(trimmed, &DAY_FIRST_DATETIME, &DAY_FIRST_DATE)
        .or_else(|| try_formats(trimmed, &MONTH_FIRST_DATETIME, &MONTH_FIRST_DATE))
}

/// 根据样本行找出日期列（返回列下标）
pub fn find_date_columns<S: AsRef<str>>(
    column_count: usize,
    sample: &[Vec<S>],
    caster: &TypeCaster,
) -> Vec<usize> {
    let mut inference = TypeInference::new(column_count, caster.clone());
    for row in sample {
        inference.observe(row);
    }
    let detected = inference.finish();

    (0..column_count)
        .filter(|&col| detected[col] == FieldType::String)
        .filter(|&col| {
            let cells: Vec<&str> = sample
                .iter()
                .filter_map(|row| row.get(col).map(|c| c.as_ref()))
                .filter(|c| !caster.is_missing(c))
                .collect();
            !cells.is_empty() && cells.iter().all(|c| parse_day_first(c).is_some())
        })
        .collect()
}

/// 修复结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DateRepairOutcome {
    /// 被识别为日期的列（原始表头）
    pub repaired_columns: Vec<String>,
    /// 实际改写的单元格数
    pub cells_rewritten: usize,
}

/// 对规范化后的 CSV 执行日期修复（原地替换）
pub fn repair_date_columns(
    csv_path: &Path,
    sample_rows: usize,
    caster: &TypeCaster,
) -> ImportResult<DateRepairOutcome> {
    let mut stream = CsvRowStream::open(csv_path)?;
    let headers = stream.headers().to_vec();

    let mut sample = Vec::with_capacity(sample_rows);
    while sample.len() < sample_rows {
        match stream.next_row()? {
            Some(row) => sample.push(row),
            None => break,
        }
    }
    drop(stream);

    let date_columns = find_date_columns(headers.len(), &sample, caster);
    if date_columns.is_empty() {
        debug!(path = %csv_path.display(), "未发现文本日期列");
        return Ok(DateRepairOutcome::default());
    }

    let repaired_columns: Vec<String> = date_columns.iter().map(|&i| headers[i].clone()).collect();
    info!(
        path = %csv_path.display(),
        columns = ?repaired_columns,
        "发现文本日期列，开始整文件改写"
    );

    let tmp = tmp_path_for(csv_path);
    let mut cells_rewritten = 0;
    {
        let mut stream = CsvRowStream::open(csv_path)?;
        let mut writer = WriterBuilder::new().from_writer(File::create(&tmp)?);
        writer.write_record(&headers)?;

        while let Some(mut row) = stream.next_row()? {
            for &col in &date_columns {
                let cell = &mut row[col];
                if caster.is_missing(cell) {
                    continue;
                }
                if let Some(dt) = parse_day_first(cell) {
                    *cell = dt.format(REPAIRED_FORMAT).to_string();
                    cells_rewritten += 1;
                }
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }
    replace_file(&tmp, csv_path)?;

    Ok(DateRepairOutcome {
        repaired_columns,
        cells_rewritten,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::file_parser::{CsvParser, FileParser};
    use tempfile::TempDir;

    #[test]
    fn test_parse_day_first_prefers_day() {
        let dt = parse_day_first("05/01/2024").unwrap();
        assert_eq!(dt.format(REPAIRED_FORMAT).to_string(), "2024-01-05T00:00:00");

        let dt = parse_day_first("05/01/24").unwrap();
        assert_eq!(dt.format(REPAIRED_FORMAT).to_string(), "2024-01-05T00:00:00");

        let dt = parse_day_first("31-12-2023 18:30").unwrap();
        assert_eq!(dt.format(REPAIRED_FORMAT).to_string(), "2023-12-31T18:30:00");

        let dt = parse_day_first("5 Jan 2024").unwrap();
        assert_eq!(dt.format(REPAIRED_FORMAT).to_string(), "2024-01-05T00:00:00");
    }

    #[test]
    fn test_parse_falls_back_to_month_first() {
        // 第二段 > 12 时日优先失败
        let dt = parse_day_first("01/25/2024").unwrap();
        assert_eq!(dt.format(REPAIRED_FORMAT).to_string(), "2024-01-25T00:00:00");
        assert!(parse_day_first("Alice").is_none());
        assert!(parse_day_first("").is_none());
    }

    #[test]
    fn test_find_date_columns_only_string_columns() {
        let sample = vec![
            vec!["05/01/2024", "2024-01-05", "Alice", "10"],
            vec!["31/12/2023", "2023-12-31", "Bob", "20"],
            vec!["", "", "Carol", "30"],
        ];
        let cols = find_date_columns(4, &sample, &TypeCaster::default());
        // 第二列已是 ISO 日期（推断为 date），不是候选
        assert_eq!(cols, vec![0]);
    }

    #[test]
    fn test_column_requires_every_sample_cell() {
        let sample = vec![vec!["05/01/2024"], vec!["not a date"]];
        assert!(find_date_columns(1, &sample, &TypeCaster::default()).is_empty());
    }

    #[test]
    fn test_repair_rewrites_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pay.csv");
        let mut content = String::from("name,paid_on\n");
        content.push_str("Alice,05/01/2024\n");
        content.push_str("Bob,06/01/2024\n");
        // 样本窗口之外的无法解析的值原样保留
        content.push_str("Carol,soon\n");
        std::fs::write(&path, content).unwrap();

        let outcome = repair_date_columns(&path, 2, &TypeCaster::default()).unwrap();
        assert_eq!(outcome.repaired_columns, vec!["paid_on"]);
        assert_eq!(outcome.cells_rewritten, 2);

        let table = CsvParser.parse(&path).unwrap();
        assert_eq!(table.rows[0][1], "2024-01-05T00:00:00");
        assert_eq!(table.rows[1][1], "2024-01-06T00:00:00");
        assert_eq!(table.rows[2][1], "soon");
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn test_dates_after_sample_window_are_not_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.csv");
        std::fs::write(&path, "name,note\nAlice,pending\nBob,pending\nCarol,05/01/2024\n").unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let outcome = repair_date_columns(&path, 2, &TypeCaster::default()).unwrap();
        assert!(outcome.repaired_columns.is_empty());
        assert_eq!(outcome.cells_rewritten, 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_repair_noop_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.csv");
        std::fs::write(&path, "a,b\nx,1\n").unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let outcome = repair_date_columns(&path, 100, &TypeCaster::default()).unwrap();
        assert!(outcome.repaired_columns.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }
}
