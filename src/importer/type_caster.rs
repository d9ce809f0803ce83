// ==========================================
// 文件数据仓储 (FDW) - 单元格类型转换
// ==========================================
// 职责: 原始文本 + 目标类型 → CellValue（宽松/严格两种模式）
// 规则:
// - date/datetime 解析前去除所有空白
// - 整数超出 i64 → 精确小数，列类型提升为 number
// - 小数一律精确小数 (rust_decimal)，超出范围保留原文 + overflow 诊断
// - 缺失值标记 → Null
// ==========================================

use crate::domain::types::{CastMode, FieldType};
use crate::domain::value::{CastDiagnostic, CastRow, CellValue};
use crate::importer::error::{ImportError, ImportResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::OnceLock;

/// 默认缺失值标记
pub const DEFAULT_MISSING_VALUES: [&str; 6] = ["n/a", "NULL", "Null", "null", "N/A", ""];

pub const ISSUE_OVERFLOW: &str = "overflow";

const TRUE_TOKENS: [&str; 4] = ["true", "True", "TRUE", "1"];
const FALSE_TOKENS: [&str; 4] = ["false", "False", "FALSE", "0"];

const GEOJSON_TYPES: [&str; 9] = [
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
    "Feature",
    "FeatureCollection",
];

// 去空白后的日期时间格式
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d%H:%M:%S%.f",
    "%Y-%m-%d%H:%M:%S",
    "%Y-%m-%d%H:%M",
];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];
const TIME_FORMATS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

static INTEGER_RE: OnceLock<Regex> = OnceLock::new();
static YEARMONTH_RE: OnceLock<Regex> = OnceLock::new();
static DURATION_RE: OnceLock<Regex> = OnceLock::new();
static GEOPOINT_RE: OnceLock<Regex> = OnceLock::new();

fn integer_re() -> &'static Regex {
    INTEGER_RE.get_or_init(|| Regex::new(r"^-?\d+$").expect("valid regex"))
}

fn yearmonth_re() -> &'static Regex {
    YEARMONTH_RE.get_or_init(|| Regex::new(r"^(\d{4})-(0[1-9]|1[0-2])$").expect("valid regex"))
}

fn duration_re() -> &'static Regex {
    DURATION_RE.get_or_init(|| {
        Regex::new(r"^P(\d+Y)?(\d+M)?(\d+W)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$")
            .expect("valid regex")
    })
}

fn geopoint_re() -> &'static Regex {
    GEOPOINT_RE.get_or_init(|| {
        Regex::new(r"^(-?\d+(?:\.\d+)?), (-?\d+(?:\.\d+)?)$").expect("valid regex")
    })
}

/// 单元格转换结果
#[derive(Debug, Clone, PartialEq)]
pub struct CastOutcome {
    pub value: CellValue,
    /// integer → number 提升
    pub promoted: bool,
    /// 异常说明（宽松模式下 value 为原文）
    pub issue: Option<String>,
}

impl CastOutcome {
    fn ok(value: CellValue) -> Self {
        Self {
            value,
            promoted: false,
            issue: None,
        }
    }
}

/// 数值文本规范化: 去千分位 `,`、去前后修饰符（货币符号、`%`），保留符号
pub fn normalize_numeric(raw: &str) -> Option<String> {
    let cleaned = raw.trim().replace(',', "");
    let mut rest = cleaned.as_str();
    let mut negative = false;

    if let Some(r) = rest.strip_prefix('-') {
        negative = true;
        rest = r;
    } else if let Some(r) = rest.strip_prefix('+') {
        rest = r;
    }

    rest = rest.trim_start_matches(|c: char| {
        !c.is_alphanumeric() && c != '.' && c != '-' && c != '+'
    });
    if !negative {
        if let Some(r) = rest.strip_prefix('-') {
            negative = true;
            rest = r;
        } else if let Some(r) = rest.strip_prefix('+') {
            rest = r;
        }
    }
    rest = rest.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '.');

    if rest.is_empty() || !rest.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(if negative {
        format!("-{}", rest)
    } else {
        rest.to_string()
    })
}

/// 文本是否为整数字面量（不限位数）
pub fn is_integer_literal(raw: &str) -> bool {
    normalize_numeric(raw)
        .map(|n| integer_re().is_match(&n))
        .unwrap_or(false)
}

fn strip_whitespace(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

fn parse_decimal(normalized: &str) -> Option<Decimal> {
    Decimal::from_str(normalized)
        .or_else(|_| Decimal::from_scientific(normalized))
        .ok()
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let compact = strip_whitespace(raw);
    let s = compact.trim_end_matches('Z');

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&compact) {
        return Some(dt.naive_utc());
    }
    None
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let compact = strip_whitespace(raw);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&compact, fmt).ok())
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let s = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

/// 严格解析（不含缺失值判断），Err 为异常说明
///
/// 返回 (值, 是否提升为 number)
pub(crate) fn parse_as(raw: &str, field_type: FieldType) -> Result<(CellValue, bool), String> {
    match field_type {
        FieldType::String | FieldType::Any => Ok((CellValue::Text(raw.to_string()), false)),

        FieldType::Integer => {
            let n = normalize_numeric(raw).ok_or_else(|| "不是整数".to_string())?;
            if integer_re().is_match(&n) {
                if let Ok(i) = n.parse::<i64>() {
                    return Ok((CellValue::Integer(i), false));
                }
                return Decimal::from_str(&n)
                    .map(|d| (CellValue::Decimal(d), true))
                    .map_err(|_| ISSUE_OVERFLOW.to_string());
            }
            // 12.0 这类零小数视为整数
            match parse_decimal(&n) {
                Some(d) if d.fract().is_zero() => d
                    .trunc()
                    .to_i64()
                    .map(|i| (CellValue::Integer(i), false))
                    .ok_or_else(|| "不是整数".to_string()),
                _ => Err("不是整数".to_string()),
            }
        }

        FieldType::Number => {
            let n = normalize_numeric(raw).ok_or_else(|| "不是数值".to_string())?;
            match parse_decimal(&n) {
                Some(d) => Ok((CellValue::Decimal(d), false)),
                None => match n.parse::<f64>() {
                    Ok(f) if f.is_finite() => Err(ISSUE_OVERFLOW.to_string()),
                    _ => Err("不是数值".to_string()),
                },
            }
        }

        FieldType::Boolean => {
            let s = raw.trim();
            if TRUE_TOKENS.contains(&s) {
                Ok((CellValue::Bool(true), false))
            } else if FALSE_TOKENS.contains(&s) {
                Ok((CellValue::Bool(false), false))
            } else {
                Err("不是布尔值".to_string())
            }
        }

        FieldType::Datetime => parse_datetime(raw)
            .or_else(|| parse_date(raw).map(|d| d.and_time(NaiveTime::MIN)))
            .map(|dt| (CellValue::DateTime(dt), false))
            .ok_or_else(|| "不是日期时间".to_string()),

        FieldType::Date => {
            if let Some(d) = parse_date(raw) {
                return Ok((CellValue::Date(d), false));
            }
            parse_datetime(raw)
                .map(|dt| (CellValue::DateTime(dt), false))
                .ok_or_else(|| "不是日期".to_string())
        }

        FieldType::Time => parse_time(raw)
            .map(|t| (CellValue::Time(t), false))
            .ok_or_else(|| "不是时间".to_string()),

        FieldType::Year => {
            let s = raw.trim();
            match s.parse::<i64>() {
                Ok(y) if s.len() == 4 && (0..=9999).contains(&y) => {
                    Ok((CellValue::Integer(y), false))
                }
                _ => Err("不是年份".to_string()),
            }
        }

        FieldType::Yearmonth => {
            let s = raw.trim();
            let caps = yearmonth_re()
                .captures(s)
                .ok_or_else(|| "不是年月".to_string())?;
            let year: i64 = caps[1].parse().map_err(|_| "不是年月".to_string())?;
            let month: i64 = caps[2].parse().map_err(|_| "不是年月".to_string())?;
            Ok((CellValue::Json(Value::from(vec![year, month])), false))
        }

        FieldType::Duration => {
            let s = raw.trim();
            if s.len() > 1 && !s.ends_with('T') && duration_re().is_match(s) {
                Ok((CellValue::Text(s.to_string()), false))
            } else {
                Err("不是 ISO 8601 时长".to_string())
            }
        }

        FieldType::Geopoint => {
            let caps = geopoint_re()
                .captures(raw.trim())
                .ok_or_else(|| "不是经纬度 (lon, lat)".to_string())?;
            let lon: f64 = caps[1].parse().map_err(|_| "经度无效".to_string())?;
            let lat: f64 = caps[2].parse().map_err(|_| "纬度无效".to_string())?;
            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                return Err("经纬度超出范围".to_string());
            }
            Ok((CellValue::Json(serde_json::json!([lon, lat])), false))
        }

        FieldType::Object => match serde_json::from_str::<Value>(raw.trim()) {
            Ok(v @ Value::Object(_)) => Ok((CellValue::Json(v), false)),
            _ => Err("不是 JSON 对象".to_string()),
        },

        FieldType::Array => match serde_json::from_str::<Value>(raw.trim()) {
            Ok(v @ Value::Array(_)) => Ok((CellValue::Json(v), false)),
            _ => Err("不是 JSON 数组".to_string()),
        },

        FieldType::Geojson => match serde_json::from_str::<Value>(raw.trim()) {
            Ok(v @ Value::Object(_)) => {
                let valid = v
                    .get("type")
                    .and_then(Value::as_str)
                    .map(|t| GEOJSON_TYPES.contains(&t))
                    .unwrap_or(false);
                if valid {
                    Ok((CellValue::Json(v), false))
                } else {
                    Err("不是 GeoJSON".to_string())
                }
            }
            _ => Err("不是 GeoJSON".to_string()),
        },
    }
}

// ==========================================
// TypeCaster
// ==========================================
#[derive(Debug, Clone)]
pub struct TypeCaster {
    missing_values: Vec<String>,
}

impl Default for TypeCaster {
    fn default() -> Self {
        Self::new(DEFAULT_MISSING_VALUES.iter().map(|s| s.to_string()).collect())
    }
}

impl TypeCaster {
    pub fn new(missing_values: Vec<String>) -> Self {
        Self { missing_values }
    }

    pub fn is_missing(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        self.missing_values.iter().any(|m| m == raw || m == trimmed)
    }

    /// 单元格转换（宽松）: 失败时 value 为原文，issue 记录原因
    pub fn cast(&self, raw: &str, field_type: FieldType) -> CastOutcome {
        if self.is_missing(raw) {
            return CastOutcome::ok(CellValue::Null);
        }
        match parse_as(raw, field_type) {
            Ok((value, promoted)) => CastOutcome {
                value,
                promoted,
                issue: None,
            },
            Err(issue) => CastOutcome {
                value: CellValue::Text(raw.to_string()),
                promoted: false,
                issue: Some(issue),
            },
        }
    }

    /// JSON 入参转换（人工录入）: 非字符串值按其 JSON 文本转换
    pub fn cast_json(&self, value: &Value, field_type: FieldType) -> CastOutcome {
        match value {
            Value::Null => CastOutcome::ok(CellValue::Null),
            Value::String(s) => self.cast(s, field_type),
            Value::Bool(b) if field_type == FieldType::Boolean => {
                CastOutcome::ok(CellValue::Bool(*b))
            }
            other => self.cast(&other.to_string(), field_type),
        }
    }

    /// 整行转换: 按 fields 顺序取 values，缺列视为空串
    ///
    /// 严格模式下首个异常转为 `TypeConversionError`。
    pub fn cast_row(
        &self,
        fields: &[(String, FieldType)],
        values: &[&str],
        mode: CastMode,
        row: usize,
    ) -> ImportResult<CastRow> {
        let mut out = CastRow::default();

        for (idx, (name, field_type)) in fields.iter().enumerate() {
            let raw = values.get(idx).copied().unwrap_or("");
            let outcome = self.cast(raw, *field_type);
            self.absorb(&mut out, name, raw, outcome, mode, row)?;
        }
        Ok(out)
    }

    /// 转换 JSON 对象中出现的字段（人工录入/更新），未知字段忽略
    pub fn cast_json_row(
        &self,
        fields: &[(String, FieldType)],
        payload: &serde_json::Map<String, Value>,
        mode: CastMode,
    ) -> ImportResult<CastRow> {
        let mut out = CastRow::default();

        for (name, field_type) in fields {
            let Some(value) = payload.get(name) else {
                continue;
            };
            let outcome = self.cast_json(value, *field_type);
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            self.absorb(&mut out, name, &raw, outcome, mode, 0)?;
        }
        Ok(out)
    }

    fn absorb(
        &self,
        out: &mut CastRow,
        name: &str,
        raw: &str,
        outcome: CastOutcome,
        mode: CastMode,
        row: usize,
    ) -> ImportResult<()> {
        if let Some(issue) = outcome.issue {
            if mode == CastMode::Strict {
                return Err(ImportError::TypeConversionError {
                    row,
                    field: name.to_string(),
                    message: format!("{}: {}", issue, raw),
                });
            }
            out.diagnostics.push(CastDiagnostic {
                column: name.to_string(),
                raw_value: raw.to_string(),
                issue,
            });
        }
        if outcome.promoted && !out.promoted.iter().any(|p| p == name) {
            out.promoted.push(name.to_string());
        }
        out.document
            .insert(name.to_string(), outcome.value.to_document_value());
        Ok(())
    }
}
