// ==========================================
// 文件数据仓储 (FDW) - 单元格值与存储编码
// ==========================================
// 职责: 类型转换后的单元格值 (CellValue)
// 存储编码: 扩展 JSON
//   精确小数 → {"$numberDecimal": "..."}
//   日期/时间戳 → {"$date": "YYYY-MM-DDTHH:MM:SS[.ffffff]"}（日期补零点）
// ==========================================

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// 存储文档（一行数据）
pub type Document = Map<String, Value>;

pub const DECIMAL_KEY: &str = "$numberDecimal";
pub const DATE_KEY: &str = "$date";

const DATETIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";
const DATETIME_FRACTION_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

// ==========================================
// CellValue - 类型化单元格值
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Json(Value), // object / array / geojson / geopoint / yearmonth
}

impl CellValue {
    /// 编码为存储文档中的 JSON 值
    pub fn to_document_value(&self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Integer(i) => Value::from(*i),
            CellValue::Decimal(d) => wrap(DECIMAL_KEY, d.to_string()),
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Date(d) => {
                let midnight = d.and_time(NaiveTime::MIN);
                wrap(DATE_KEY, format_datetime(&midnight))
            }
            CellValue::DateTime(dt) => wrap(DATE_KEY, format_datetime(dt)),
            CellValue::Time(t) => Value::String(t.format("%H:%M:%S").to_string()),
            CellValue::Json(v) => v.clone(),
        }
    }

    /// 从存储文档解码
    ///
    /// 日期在存储层已统一为时间戳，解码结果为 `DateTime`。
    pub fn from_document_value(value: &Value) -> CellValue {
        match value {
            Value::Null => CellValue::Null,
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    CellValue::Integer(i)
                } else {
                    Decimal::from_str(&n.to_string())
                        .or_else(|_| Decimal::from_scientific(&n.to_string()))
                        .map(CellValue::Decimal)
                        .unwrap_or_else(|_| CellValue::Text(n.to_string()))
                }
            }
            Value::String(s) => CellValue::Text(s.clone()),
            Value::Object(map) if map.len() == 1 => {
                if let Some(Value::String(s)) = map.get(DECIMAL_KEY) {
                    return Decimal::from_str(s)
                        .map(CellValue::Decimal)
                        .unwrap_or_else(|_| CellValue::Text(s.clone()));
                }
                if let Some(Value::String(s)) = map.get(DATE_KEY) {
                    return parse_storage_datetime(s)
                        .map(CellValue::DateTime)
                        .unwrap_or_else(|| CellValue::Text(s.clone()));
                }
                CellValue::Json(value.clone())
            }
            other => CellValue::Json(other.clone()),
        }
    }

    /// 导出时的文本形式（CSV / XLSX 单元格）
    pub fn to_export_string(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Decimal(d) => d.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            CellValue::DateTime(dt) => format_datetime(dt),
            CellValue::Time(t) => t.format("%H:%M:%S").to_string(),
            CellValue::Json(v) => v.to_string(),
        }
    }
}

fn wrap(key: &str, inner: String) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), Value::String(inner));
    Value::Object(map)
}

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format(DATETIME_FMT).to_string()
    } else {
        dt.format(DATETIME_FRACTION_FMT).to_string()
    }
}

fn parse_storage_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(s, DATETIME_FRACTION_FMT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, DATETIME_FMT))
        .ok()
}

// ==========================================
// CastDiagnostic - 类型转换诊断
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastDiagnostic {
    pub column: String,
    pub raw_value: String,
    pub issue: String,
}

// 单行转换结果: 文档 + 诊断 + 被提升为 number 的列
#[derive(Debug, Clone, Default)]
pub struct CastRow {
    pub document: Document,
    pub diagnostics: Vec<CastDiagnostic>,
    pub promoted: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decimal_encoding_is_exact() {
        let d = Decimal::from_str("19.99").unwrap();
        let encoded = CellValue::Decimal(d).to_document_value();
        assert_eq!(encoded, json!({"$numberDecimal": "19.99"}));

        let decoded = CellValue::from_document_value(&encoded);
        assert_eq!(decoded, CellValue::Decimal(d));
        assert_eq!(decoded.to_export_string(), "19.99");
    }

    #[test]
    fn test_date_encoded_as_midnight() {
        let d = NaiveDate::from_ymd_opt(2023, 3, 4).unwrap();
        let encoded = CellValue::Date(d).to_document_value();
        assert_eq!(encoded, json!({"$date": "2023-03-04T00:00:00"}));

        match CellValue::from_document_value(&encoded) {
            CellValue::DateTime(dt) => assert_eq!(dt, d.and_time(NaiveTime::MIN)),
            other => panic!("期望 DateTime, 实际 {:?}", other),
        }
    }

    #[test]
    fn test_datetime_fraction_only_when_present() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 250)
            .unwrap();
        let encoded = CellValue::DateTime(dt).to_document_value();
        assert_eq!(encoded, json!({"$date": "2024-01-02T03:04:05.000250"}));
        assert_eq!(CellValue::from_document_value(&encoded), CellValue::DateTime(dt));
    }

    #[test]
    fn test_plain_values_pass_through() {
        assert_eq!(CellValue::Integer(42).to_document_value(), json!(42));
        assert_eq!(CellValue::Null.to_document_value(), Value::Null);
        assert_eq!(
            CellValue::Json(json!([12.5, 41.9])).to_document_value(),
            json!([12.5, 41.9])
        );
        assert_eq!(
            CellValue::from_document_value(&json!({"a": 1, "b": 2})),
            CellValue::Json(json!({"a": 1, "b": 2}))
        );
    }
}
