// ==========================================
// 文件数据仓储 (FDW) - 抽取任务处理器
// ==========================================
// 任务名: dataset.stagging.extract
// 载荷: {"dataset_id": "<id>"}
// ==========================================

use crate::importer::warehousing::FileDataWarehousing;
use crate::jobs::task_queue::TaskHandler;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const EXTRACT_TASK_NAME: &str = "dataset.stagging.extract";

/// 构造抽取任务载荷
pub fn extraction_payload(dataset_id: &str) -> Value {
    json!({ "dataset_id": dataset_id })
}

/// 从载荷取 dataset_id（兼容数字 id）
pub fn dataset_id_from_payload(payload: &Value) -> Option<String> {
    match payload.get("dataset_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct ExtractionJob {
    fdw: Arc<FileDataWarehousing>,
}

impl ExtractionJob {
    pub fn new(fdw: Arc<FileDataWarehousing>) -> Self {
        Self { fdw }
    }
}

#[async_trait]
impl TaskHandler for ExtractionJob {
    fn task_name(&self) -> &'static str {
        EXTRACT_TASK_NAME
    }

    async fn handle(&self, payload: &Value) -> anyhow::Result<Value> {
        let dataset_id = dataset_id_from_payload(payload)
            .with_context(|| format!("载荷缺少 dataset_id: {}", payload))?;

        tracing::info!(dataset_id = %dataset_id, "收到抽取任务");
        let report = self
            .fdw
            .run_data_extraction_processes(&dataset_id)
            .await
            .with_context(|| format!("数据集 {} 抽取失败", dataset_id))?;
        tracing::info!(dataset_id = %dataset_id, rows = report.rows, "抽取任务完成");

        Ok(serde_json::to_value(report)?)
    }
}
