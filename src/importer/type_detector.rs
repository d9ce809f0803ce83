// ==========================================
// 文件数据仓储 (FDW) - 列类型推断
// ==========================================
// 职责: 逐行累计每列对各候选类型的接受数，结束时给出推断类型
// 规则:
// - 缺失值标记不参与统计
// - 按候选顺序，首个接受 ≥ 90% 非缺失单元格的类型胜出
// - 全部缺失 → any
// ==========================================

use crate::domain::types::FieldType;
use crate::importer::type_caster::{is_integer_literal, parse_as, parse_date, TypeCaster};

/// 候选类型（优先级从高到低）
pub const CANDIDATE_ORDER: [FieldType; 14] = [
    FieldType::Yearmonth,
    FieldType::Geopoint,
    FieldType::Duration,
    FieldType::Geojson,
    FieldType::Object,
    FieldType::Array,
    FieldType::Datetime,
    FieldType::Time,
    FieldType::Date,
    FieldType::Integer,
    FieldType::Number,
    FieldType::Boolean,
    FieldType::Year,
    FieldType::String,
];

/// 胜出所需的接受率
pub const CONFIDENCE: f64 = 0.9;

/// 单元格是否可被某类型接受
pub fn accepts(raw: &str, field_type: FieldType) -> bool {
    match field_type {
        FieldType::String | FieldType::Any => true,
        // 超出精确小数范围的整数仍是整数列
        FieldType::Integer => is_integer_literal(raw) || parse_as(raw, field_type).is_ok(),
        // `2024-01-05` 这类纯日期不计入 datetime
        FieldType::Datetime => {
            parse_date(raw).is_none() && parse_as(raw, FieldType::Datetime).is_ok()
        }
        _ => parse_as(raw, field_type).is_ok(),
    }
}

#[derive(Debug, Clone, Default)]
struct ColumnTally {
    non_missing: usize,
    accepted: [usize; CANDIDATE_ORDER.len()],
}

// ==========================================
// TypeInference - 流式推断
// ==========================================
#[derive(Debug, Clone)]
pub struct TypeInference {
    caster: TypeCaster,
    tallies: Vec<ColumnTally>,
    rows: usize,
}

impl TypeInference {
    pub fn new(column_count: usize, caster: TypeCaster) -> Self {
        Self {
            caster,
            tallies: vec![ColumnTally::default(); column_count],
            rows: 0,
        }
    }

    /// 观察一行（超出列数的单元格忽略，缺少的视为缺失）
    pub fn observe<S: AsRef<str>>(&mut self, row: &[S]) {
        self.rows += 1;
        for (tally, cell) in self.tallies.iter_mut().zip(row.iter()) {
            let raw = cell.as_ref();
            if self.caster.is_missing(raw) {
                continue;
            }
            tally.non_missing += 1;
            for (i, candidate) in CANDIDATE_ORDER.iter().enumerate() {
                if accepts(raw, *candidate) {
                    tally.accepted[i] += 1;
                }
            }
        }
    }

    pub fn rows_observed(&self) -> usize {
        self.rows
    }

    /// 每列推断结果
    pub fn finish(&self) -> Vec<FieldType> {
        self.tallies.iter().map(Self::resolve).collect()
    }

    fn resolve(tally: &ColumnTally) -> FieldType {
        if tally.non_missing == 0 {
            return FieldType::Any;
        }
        let total = tally.non_missing as f64;
        CANDIDATE_ORDER
            .iter()
            .zip(tally.accepted.iter())
            .find(|(_, &n)| n as f64 / total >= CONFIDENCE)
            .map(|(t, _)| *t)
            .unwrap_or(FieldType::String)
    }
}

/// 对完整的行集合推断（测试与小文件使用）
pub fn detect_types<S: AsRef<str>>(
    column_count: usize,
    rows: &[Vec<S>],
    caster: &TypeCaster,
) -> Vec<FieldType> {
    let mut inference = TypeInference::new(column_count, caster.clone());
    for row in rows {
        inference.observe(row);
    }
    inference.finish()
}
