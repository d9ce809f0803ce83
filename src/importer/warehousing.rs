// ==========================================
// 文件数据仓储 (FDW) - 抽取流程编排
// ==========================================
// 职责: 已上传文件 → 文档库集合 + 注册表元数据
// 状态机: created → extracting → extracted（failed 仅由人工复位产生）
// 流程: 登记资源 → 格式转换 → 日期修复 → 表头/类型 → 分批入库 → 类型提升回写 → 完成 → 绑定列
// 失败语义:
// - 完成前出错: 数据集保持 extracting + locked，已写入的批次不回滚
// - 不自动重试（由任务队列 max_retries 决定）
// ==========================================

use crate::config::WarehouseConfigReader;
use crate::domain::dataset::{ColumnSpec, Dataset, DatasetUpdate};
use crate::domain::types::{CastMode, DatasetStatus, FieldType, FileFormat};
use crate::domain::value::{CastDiagnostic, Document};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::file_parser::CsvRowStream;
use crate::importer::normalizer::FileNormalizer;
use crate::importer::schema_resource::{resource_path_for, SchemaResource};
use crate::importer::type_caster::TypeCaster;
use crate::perf::PerfGuard;
use crate::repository::{DatasetRegistry, DocumentStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 抽取报告中保留的诊断条数上限
pub const MAX_REPORTED_DIAGNOSTICS: usize = 50;

// ==========================================
// ExtractionReport - 抽取结果
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub dataset_id: String,
    pub collection: String,
    pub rows: i64,
    pub duration_secs: f64,
    pub columns: Vec<ColumnSpec>,
    pub date_columns: Vec<String>,
    pub promoted_columns: Vec<String>,
    pub diagnostic_count: usize,
    /// 前 MAX_REPORTED_DIAGNOSTICS 条
    pub diagnostics: Vec<CastDiagnostic>,
}

/// 入库阶段统计
struct LoadOutcome {
    rows: i64,
    promoted: Vec<String>,
    diagnostic_count: usize,
    diagnostics: Vec<CastDiagnostic>,
}

// ==========================================
// FileDataWarehousing - 抽取编排器
// ==========================================
pub struct FileDataWarehousing {
    registry: Arc<dyn DatasetRegistry>,
    documents: Arc<dyn DocumentStore>,
    config: Arc<dyn WarehouseConfigReader>,
}

impl FileDataWarehousing {
    pub fn new(
        registry: Arc<dyn DatasetRegistry>,
        documents: Arc<dyn DocumentStore>,
        config: Arc<dyn WarehouseConfigReader>,
    ) -> Self {
        Self {
            registry,
            documents,
            config,
        }
    }

    async fn load_dataset(&self, dataset_id: &str) -> ImportResult<Dataset> {
        self.registry
            .get_dataset(dataset_id)
            .await?
            .filter(|d| !d.deleted)
            .ok_or_else(|| ImportError::DatasetNotFound(dataset_id.to_string()))
    }

    /// 执行完整抽取流程
    #[instrument(skip(self), fields(dataset_id = %dataset_id))]
    pub async fn run_data_extraction_processes(
        &self,
        dataset_id: &str,
    ) -> ImportResult<ExtractionReport> {
        let perf = PerfGuard::new("run_data_extraction_processes");

        let base_dir = self
            .config
            .get_base_dir()
            .await
            .map_err(|e| ImportError::config("base_dir", e))?;
        let batch_size = self
            .config
            .get_batch_size()
            .await
            .map_err(|e| ImportError::config("batch_size", e))?
            .max(1);
        let date_sample_rows = self
            .config
            .get_date_sample_rows()
            .await
            .map_err(|e| ImportError::config("date_sample_rows", e))?;

        // === 步骤 1: 定位文件与资源描述，标记 extracting ===
        let dataset = self.load_dataset(dataset_id).await?;
        let stored = dataset.file.clone().ok_or_else(|| {
            ImportError::PreconditionFailed(format!("数据集 {} 尚未上传文件", dataset_id))
        })?;
        let stored_rel = PathBuf::from(&stored);
        let resource_rel = resource_path_for(&stored_rel);
        let source_path = base_dir.join(&stored_rel);
        let resource_path = base_dir.join(&resource_rel);

        self.registry
            .update_dataset(
                dataset_id,
                &DatasetUpdate {
                    resource_file: Some(path_string(&resource_rel)),
                    status: Some(DatasetStatus::Extracting),
                    ..Default::default()
                },
            )
            .await?;
        info!(file = %stored, "开始抽取");

        // === 步骤 2: 格式转换 + 日期修复 ===
        let normalizer = FileNormalizer::new(TypeCaster::default(), date_sample_rows);
        let converted = normalizer.convert_to_csv(&source_path)?;
        if converted.converted {
            let csv_rel = stored_rel.with_extension("csv");
            let uuid_filename = csv_rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            self.registry
                .update_dataset(
                    dataset_id,
                    &DatasetUpdate {
                        file: Some(path_string(&csv_rel)),
                        uuid_filename,
                        format: Some(FileFormat::Csv),
                        ..Default::default()
                    },
                )
                .await?;
        }
        let csv_path = converted.csv_path;
        let repair = normalizer.repair_dates(&csv_path)?;

        // === 步骤 3: 表头重命名 + 类型推断，写资源描述 ===
        let mut columns = normalizer.describe_columns(&csv_path)?;
        normalizer.write_resource(&csv_path, &columns, &resource_path)?;
        debug!(columns = columns.len(), "资源描述已写出");

        // === 步骤 4: 分批写入文档库 ===
        let mut resource = SchemaResource::read_from(&resource_path)?;
        let collection = self
            .documents
            .get_or_create_collection(&resource.name)
            .await?;
        let load = self
            .load_rows(&csv_path, &resource, &collection, batch_size)
            .await?;

        // === 步骤 5: 类型提升回写 ===
        if !load.promoted.is_empty() {
            for name in &load.promoted {
                resource.set_field_type(name, FieldType::Number);
                if let Some(col) = columns.iter_mut().find(|c| &c.name == name) {
                    col.field_type = FieldType::Number;
                }
            }
            resource.write_to(&resource_path)?;
            info!(columns = ?load.promoted, "整数列已提升为 number");
        }

        // === 步骤 6: 完成 ===
        let duration_secs = perf.elapsed_secs();
        self.registry
            .update_dataset(
                dataset_id,
                &DatasetUpdate {
                    stagging_tablename: Some(collection.clone()),
                    prod_tablename: Some(collection.clone()),
                    stagging_recordcount: Some(load.rows),
                    prod_recordcount: Some(load.rows),
                    extraction_duration: Some(duration_secs),
                    status: Some(DatasetStatus::Extracted),
                    locked: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        // === 步骤 7: 绑定列结构 ===
        self.registry
            .save_dataset_columns(dataset_id, &columns)
            .await?;

        info!(
            collection = %collection,
            rows = load.rows,
            duration_secs,
            diagnostics = load.diagnostic_count,
            "抽取完成"
        );

        Ok(ExtractionReport {
            dataset_id: dataset_id.to_string(),
            collection,
            rows: load.rows,
            duration_secs,
            columns,
            date_columns: repair.repaired_columns,
            promoted_columns: load.promoted,
            diagnostic_count: load.diagnostic_count,
            diagnostics: load.diagnostics,
        })
    }

    /// 流式读取规范 CSV，按资源描述转换并分批 insert_many
    async fn load_rows(
        &self,
        csv_path: &Path,
        resource: &SchemaResource,
        collection: &str,
        batch_size: usize,
    ) -> ImportResult<LoadOutcome> {
        let fields = resource.typed_fields();
        let caster = TypeCaster::new(resource.schema.missing_values.clone());
        let mut stream = CsvRowStream::open(csv_path)?;

        let mut outcome = LoadOutcome {
            rows: 0,
            promoted: Vec::new(),
            diagnostic_count: 0,
            diagnostics: Vec::new(),
        };
        let mut batch: Vec<Document> = Vec::with_capacity(batch_size);

        while let Some(row) = stream.next_row()? {
            outcome.rows += 1;
            let values: Vec<&str> = row.iter().map(String::as_str).collect();
            // 文件管道始终宽松
            let cast = caster.cast_row(&fields, &values, CastMode::Lenient, outcome.rows as usize)?;

            for diag in cast.diagnostics {
                outcome.diagnostic_count += 1;
                if outcome.diagnostics.len() < MAX_REPORTED_DIAGNOSTICS {
                    warn!(
                        row = outcome.rows,
                        column = %diag.column,
                        raw = %diag.raw_value,
                        issue = %diag.issue,
                        "单元格转换异常，保留原文"
                    );
                    outcome.diagnostics.push(diag);
                }
            }
            for name in cast.promoted {
                if !outcome.promoted.contains(&name) {
                    outcome.promoted.push(name);
                }
            }

            batch.push(cast.document);
            if batch.len() >= batch_size {
                let n = self
                    .documents
                    .insert_many(collection, std::mem::take(&mut batch))
                    .await?;
                debug!(collection, inserted = n, "批次写入");
            }
        }

        if !batch.is_empty() {
            self.documents.insert_many(collection, batch).await?;
        }
        Ok(outcome)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{config_keys, ConfigManager};
    use crate::domain::dataset::NewDataset;
    use crate::repository::{DatasetRepository, FindOptions, SqliteDocumentStore};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        base: PathBuf,
        registry: Arc<DatasetRepository>,
        documents: Arc<SqliteDocumentStore>,
        fdw: FileDataWarehousing,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_path_buf();

        let reg_conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&reg_conn).unwrap();
        crate::db::init_registry_schema(&reg_conn).unwrap();
        let reg_conn = Arc::new(Mutex::new(reg_conn));

        let doc_conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::init_document_schema(&doc_conn).unwrap();

        let config = ConfigManager::from_connection(reg_conn.clone()).unwrap();
        config
            .set_value(config_keys::BASE_DIR, &base.to_string_lossy())
            .unwrap();
        config.set_value(config_keys::BATCH_SIZE, "2").unwrap();

        let registry = Arc::new(DatasetRepository::from_connection(reg_conn));
        let documents = Arc::new(SqliteDocumentStore::from_connection(Arc::new(Mutex::new(
            doc_conn,
        ))));
        let fdw = FileDataWarehousing::new(registry.clone(), documents.clone(), Arc::new(config));
        Harness {
            _dir: dir,
            base,
            registry,
            documents,
            fdw,
        }
    }

    async fn dataset_with_file(h: &Harness, rel: &str, content: &str) -> String {
        let ds = h
            .registry
            .insert_dataset(&NewDataset {
                project_id: "p1".into(),
                user_id: "u1".into(),
                name: "Payroll".into(),
                description: None,
            })
            .await
            .unwrap();
        let abs = h.base.join(rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(&abs, content).unwrap();
        h.registry
            .update_dataset(
                &ds.id,
                &DatasetUpdate {
                    file: Some(rel.to_string()),
                    format: Some(FileFormat::Csv),
                    locked: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        ds.id
    }

    #[tokio::test]
    async fn test_extraction_completes_and_binds_columns() {
        let h = harness();
        let id = dataset_with_file(
            &h,
            "project/media/dataset/Jan-2024/payroll_ab12c.csv",
            "Name,Amount,Pay Date\nAlice,1200.50,2024-01-05\nBob,99,2024-01-06\nCarol,10,2024-01-07\n",
        )
        .await;

        let report = h.fdw.run_data_extraction_processes(&id).await.unwrap();
        assert_eq!(report.rows, 3);
        assert_eq!(report.collection, "payroll_ab12c");
        assert_eq!(report.diagnostic_count, 0);

        let ds = h.registry.get_dataset(&id).await.unwrap().unwrap();
        assert_eq!(ds.status, DatasetStatus::Extracted);
        assert!(!ds.locked);
        assert_eq!(ds.fields, 3);
        assert_eq!(ds.stagging_recordcount, 3);
        assert_eq!(ds.prod_tablename.as_deref(), Some("payroll_ab12c"));
        assert_eq!(
            ds.resource_file.as_deref(),
            Some("project/media/dataset/Jan-2024/payroll_ab12c.resource.json")
        );

        // batch_size = 2 → 两次 insert_many
        assert_eq!(h.documents.count_documents("payroll_ab12c").await.unwrap(), 3);
        let docs = h
            .documents
            .find("payroll_ab12c", &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(docs[0]["amount"]["$numberDecimal"], "1200.50");
        assert_eq!(docs[0]["pay_date"]["$date"], "2024-01-05T00:00:00");
    }

    #[tokio::test]
    async fn test_failure_leaves_dataset_extracting() {
        let h = harness();
        let id = dataset_with_file(&h, "project/media/dataset/x/broken.csv", "a\n1\n").await;
        std::fs::remove_file(h.base.join("project/media/dataset/x/broken.csv")).unwrap();

        let err = h.fdw.run_data_extraction_processes(&id).await.unwrap_err();
        assert!(matches!(err, ImportError::FileNotFound(_)));

        let ds = h.registry.get_dataset(&id).await.unwrap().unwrap();
        assert_eq!(ds.status, DatasetStatus::Extracting);
        assert!(ds.locked);
    }

    #[tokio::test]
    async fn test_unknown_dataset() {
        let h = harness();
        let err = h.fdw.run_data_extraction_processes("nope").await.unwrap_err();
        assert!(matches!(err, ImportError::DatasetNotFound(_)));
    }
}
