// ==========================================
// 文件数据仓储 (FDW) - 列名格式化器
// ==========================================
// 职责: 原始表头 → 机器列名（会话内唯一）
// 规则: 小写 → 去首尾空白 → 去除非单词/非空白字符 → 去首尾空白 → 空白串替换为 `_`
// 冲突: 追加 `_1`, `_2`, …（`_id` 预留）
// ==========================================

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// 文档主键，永远不会分配给数据列
pub const RESERVED_ID_COLUMN: &str = "_id";

static NON_WORD_RE: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

fn non_word_re() -> &'static Regex {
    NON_WORD_RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("valid regex"))
}

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// 单个表头的规范化（不处理冲突）
pub fn format_column(raw_label: &str) -> String {
    let lowered = raw_label.to_lowercase();
    let stripped = non_word_re().replace_all(lowered.trim(), "");
    whitespace_re()
        .replace_all(stripped.trim(), "_")
        .into_owned()
}

// ==========================================
// ColumnFormatter - 一次格式化会话
// ==========================================
#[derive(Debug, Clone)]
pub struct ColumnFormatter {
    taken: HashSet<String>,
    raw_labels: Vec<String>,
    machine_names: Vec<String>,
}

impl Default for ColumnFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnFormatter {
    pub fn new() -> Self {
        let mut taken = HashSet::new();
        taken.insert(RESERVED_ID_COLUMN.to_string());
        Self {
            taken,
            raw_labels: Vec::new(),
            machine_names: Vec::new(),
        }
    }

    /// 登记一个表头，返回 (原始表头, 机器名)
    pub fn add_column(&mut self, raw_label: &str) -> (String, String) {
        let candidate = format_column(raw_label);

        let mut name = candidate.clone();
        let mut i = 1;
        while self.taken.contains(&name) {
            name = format!("{}_{}", candidate, i);
            i += 1;
        }

        self.taken.insert(name.clone());
        self.raw_labels.push(raw_label.to_string());
        self.machine_names.push(name.clone());
        (raw_label.to_string(), name)
    }

    /// (原始表头列表, 机器名列表)，按登记顺序，不含 `_id`
    pub fn get_columns(&self) -> (Vec<String>, Vec<String>) {
        (self.raw_labels.clone(), self.machine_names.clone())
    }

    pub fn len(&self) -> usize {
        self.machine_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machine_names.is_empty()
    }
}
