// ==========================================
// 文件数据仓储 (FDW) - 数据集 API
// ==========================================
// 职责: 数据集登记、文件上传与抽取投递、列结构绑定、人工录入、查询与导出
// 红线: locked 期间不接受上传/录入/导出
// 红线: fields > 0 后不可再上传文件或重新建列
// 红线: 上传的所有校验发生在任何写操作之前
// ==========================================

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::api::export::{download_link, write_export, ExportSheet};
use crate::config::warehouse_config_trait::WarehouseConfigReader;
use crate::domain::dataset::{
    ColumnSpec, Dataset, DatasetChanges, DatasetColumn, DatasetUpdate, ManualColumn, NewDataset,
};
use crate::domain::report::{DownloadLink, DownloadRequest};
use crate::domain::types::{DatasetSource, DatasetStatus, DownloadFormat, FieldType, FileFormat};
use crate::domain::value::{CellValue, Document};
use crate::importer::column_formatter::ColumnFormatter;
use crate::importer::schema_resource::{ResourceField, SchemaResource};
use crate::importer::type_caster::TypeCaster;
use crate::importer::warehousing::{ExtractionReport, FileDataWarehousing};
use crate::jobs::extraction_job::{extraction_payload, EXTRACT_TASK_NAME};
use crate::jobs::task_queue::TaskDispatcher;
use crate::repository::document_store::{DocumentStore, FindOptions, DOC_ID_FIELD};
use crate::repository::report_repo::ReportRepository;
use crate::repository::DatasetRegistry;
use crate::storage::{
    download_location, manual_resource_location, upload_location, DownloadFolder, FileStorage,
};

pub const DEFAULT_DATASET_PAGE_LIMIT: usize = 20;
pub const DEFAULT_DATA_PAGE_LIMIT: usize = 100;

// ==========================================
// 返回结构
// ==========================================

/// 项目数据集分页
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetPage {
    pub skip: usize,
    pub limit: usize,
    pub total: i64,
    pub datasets: Vec<Dataset>,
}

/// 数据集行数据分页
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetData {
    pub skip: usize,
    pub limit: usize,
    pub total: i64,
    pub returned: usize,
    pub columns: Vec<String>,
    pub left: i64,
    pub rows: Vec<Document>,
    pub locked: bool,
}

/// 人工录入结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualInsertResult {
    pub created: usize,
    pub submitted: usize,
}

fn config_error(err: Box<dyn std::error::Error + Send + Sync>) -> ApiError {
    ApiError::InternalError(format!("读取配置失败: {}", err))
}

fn relative_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ==========================================
// DatasetApi
// ==========================================

/// 数据集 API
///
/// 职责：
/// 1. 登记与维护数据集（软删除）
/// 2. 上传文件并投递抽取任务
/// 3. 列结构绑定（文件管道或人工建列）
/// 4. 人工录入/修改行数据
/// 5. 分页查询与 csv/xlsx 导出
pub struct DatasetApi {
    registry: Arc<dyn DatasetRegistry>,
    documents: Arc<dyn DocumentStore>,
    storage: Arc<dyn FileStorage>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: Arc<dyn WarehouseConfigReader>,
    reports: Arc<ReportRepository>,
    fdw: Arc<FileDataWarehousing>,
    caster: TypeCaster,
}

impl DatasetApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn DatasetRegistry>,
        documents: Arc<dyn DocumentStore>,
        storage: Arc<dyn FileStorage>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: Arc<dyn WarehouseConfigReader>,
        reports: Arc<ReportRepository>,
        fdw: Arc<FileDataWarehousing>,
    ) -> Self {
        Self {
            registry,
            documents,
            storage,
            dispatcher,
            config,
            reports,
            fdw,
            caster: TypeCaster::default(),
        }
    }

    /// 查询未删除的数据集
    async fn require_dataset(&self, dataset_id: &str) -> ApiResult<Dataset> {
        match self.registry.get_dataset(dataset_id).await? {
            Some(ds) if !ds.deleted => Ok(ds),
            _ => Err(ApiError::NotFound(format!("Dataset(id={})不存在", dataset_id))),
        }
    }

    fn ensure_unlocked(dataset: &Dataset) -> ApiResult<()> {
        if dataset.locked {
            return Err(ApiError::DatasetLocked(format!(
                "数据集 {} 正在抽取中，请稍后再试",
                dataset.id
            )));
        }
        Ok(())
    }

    fn ensure_no_schema(dataset: &Dataset) -> ApiResult<()> {
        if dataset.has_schema() {
            return Err(ApiError::SchemaAlreadyExists(format!(
                "数据集 {} 已绑定 {} 列",
                dataset.id, dataset.fields
            )));
        }
        Ok(())
    }

    fn ensure_schema(dataset: &Dataset) -> ApiResult<()> {
        if !dataset.has_schema() {
            return Err(ApiError::BusinessRuleViolation(format!(
                "数据集 {} 尚未绑定列结构",
                dataset.id
            )));
        }
        Ok(())
    }

    // ==========================================
    // 登记与维护
    // ==========================================

    pub async fn create_dataset(&self, new: NewDataset) -> ApiResult<Dataset> {
        if new.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("数据集名称不能为空".to_string()));
        }
        if new.project_id.trim().is_empty() || new.user_id.trim().is_empty() {
            return Err(ApiError::InvalidInput("project_id/user_id 不能为空".to_string()));
        }

        let dataset = self.registry.insert_dataset(&new).await?;
        info!(dataset_id = %dataset.id, project_id = %dataset.project_id, "数据集已登记");
        Ok(dataset)
    }

    /// 修改名称/描述，空字符串视为不修改
    pub async fn update_dataset(
        &self,
        dataset_id: &str,
        changes: DatasetChanges,
    ) -> ApiResult<Dataset> {
        let current = self.require_dataset(dataset_id).await?;

        let changes = DatasetChanges {
            name: changes.name.filter(|s| !s.trim().is_empty()),
            description: changes.description.filter(|s| !s.trim().is_empty()),
        };
        let update: DatasetUpdate = changes.into();
        if update.is_empty() {
            return Ok(current);
        }
        Ok(self.registry.update_dataset(dataset_id, &update).await?)
    }

    /// 软删除
    pub async fn delete_dataset(&self, dataset_id: &str) -> ApiResult<()> {
        self.require_dataset(dataset_id).await?;
        self.registry
            .update_dataset(
                dataset_id,
                &DatasetUpdate {
                    deleted: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        info!(dataset_id, "数据集已删除");
        Ok(())
    }

    pub async fn get_dataset_info(&self, dataset_id: &str) -> ApiResult<Dataset> {
        self.require_dataset(dataset_id).await
    }

    pub async fn get_project_datasets(
        &self,
        project_id: &str,
        skip: Option<usize>,
        limit: Option<usize>,
    ) -> ApiResult<DatasetPage> {
        let skip = skip.unwrap_or(0);
        let limit = limit.unwrap_or(DEFAULT_DATASET_PAGE_LIMIT);

        let datasets = self
            .registry
            .list_project_datasets(project_id, skip, limit)
            .await?;
        let total = self.registry.count_project_datasets(project_id).await?;
        Ok(DatasetPage {
            skip,
            limit,
            total,
            datasets,
        })
    }

    /// 人工/外部流程可用的类型名
    pub fn get_data_type_list(&self) -> Vec<&'static str> {
        FieldType::API_TYPES.iter().map(|t| t.as_str()).collect()
    }

    /// 抽取卡死后的人工恢复: 仅 extracting 且 locked 的数据集可重置为 failed
    ///
    /// 已写入集合的批次不做回滚。
    pub async fn reset_stuck_dataset(&self, dataset_id: &str) -> ApiResult<Dataset> {
        let dataset = self.require_dataset(dataset_id).await?;
        if dataset.status != DatasetStatus::Extracting || !dataset.locked {
            return Err(ApiError::InvalidStateTransition {
                from: format!("{}(locked={})", dataset.status, dataset.locked),
                to: DatasetStatus::Failed.to_string(),
            });
        }

        let updated = self
            .registry
            .update_dataset(
                dataset_id,
                &DatasetUpdate {
                    status: Some(DatasetStatus::Failed),
                    locked: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        warn!(
            dataset_id,
            collection = ?dataset.collection(),
            "数据集已重置为 failed，已写入的批次保留"
        );
        Ok(updated)
    }

    // ==========================================
    // 上传与抽取
    // ==========================================

    /// 保存上传文件并投递抽取任务
    ///
    /// # 错误
    /// - NotFound / DatasetLocked / SchemaAlreadyExists / UnsupportedFormat
    ///   均在写文件与改注册表之前返回
    #[instrument(skip(self, reader), fields(dataset_id = %dataset_id))]
    pub async fn upload_data_file(
        &self,
        dataset_id: &str,
        original_filename: &str,
        reader: &mut dyn Read,
    ) -> ApiResult<Dataset> {
        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_unlocked(&dataset)?;
        Self::ensure_no_schema(&dataset)?;

        let ext = Path::new(original_filename)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let format = FileFormat::from_extension(&ext).ok_or_else(|| {
            ApiError::UnsupportedFormat(format!(
                "{}: 仅支持 {}",
                original_filename,
                FileFormat::accepted_extensions().join(", ")
            ))
        })?;

        let (dir, uuid_filename) = upload_location(&dataset.name, &ext, Utc::now());
        let relative = dir.join(&uuid_filename);
        let bytes = self.storage.save(&relative, reader)?;
        debug!(path = %relative.display(), bytes, "上传文件已落盘");

        let updated = self
            .registry
            .update_dataset(
                dataset_id,
                &DatasetUpdate {
                    filename: Some(original_filename.to_string()),
                    uuid_filename: Some(uuid_filename),
                    file: Some(relative_string(&relative)),
                    format: Some(format),
                    source: Some(DatasetSource::File),
                    locked: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        match self
            .dispatcher
            .submit_job(EXTRACT_TASK_NAME, extraction_payload(dataset_id))
            .await
        {
            Ok(task_id) => {
                info!(task_id = %task_id, file = ?updated.file, "抽取任务已投递");
                Ok(updated)
            }
            Err(e) => {
                // 投递失败时解锁，允许重新上传
                self.registry
                    .update_dataset(
                        dataset_id,
                        &DatasetUpdate {
                            locked: Some(false),
                            ..Default::default()
                        },
                    )
                    .await?;
                Err(e.into())
            }
        }
    }

    /// 同步执行抽取管道（worker 之外的直接调用入口）
    pub async fn run_data_extraction_processes(
        &self,
        dataset_id: &str,
    ) -> ApiResult<ExtractionReport> {
        Ok(self.fdw.run_data_extraction_processes(dataset_id).await?)
    }

    // ==========================================
    // 列结构
    // ==========================================

    /// 批量绑定列（只允许一次）
    pub async fn save_dataset_columns(
        &self,
        dataset_id: &str,
        columns: &[ColumnSpec],
    ) -> ApiResult<Vec<DatasetColumn>> {
        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_no_schema(&dataset)?;
        if columns.is_empty() {
            return Err(ApiError::InvalidInput("列列表不能为空".to_string()));
        }
        Ok(self.registry.save_dataset_columns(dataset_id, columns).await?)
    }

    /// 人工建列: 校验类型、格式化机器名、写 manual 资源描述
    pub async fn create_dataset_columns_manually(
        &self,
        dataset_id: &str,
        columns: &[ManualColumn],
    ) -> ApiResult<Vec<DatasetColumn>> {
        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_unlocked(&dataset)?;
        Self::ensure_no_schema(&dataset)?;
        if columns.is_empty() {
            return Err(ApiError::InvalidInput("列列表不能为空".to_string()));
        }

        let mut formatter = ColumnFormatter::new();
        let mut specs = Vec::with_capacity(columns.len());
        for column in columns {
            let field_type = FieldType::from_str(&column.datatype)
                .filter(FieldType::is_api_type)
                .ok_or_else(|| {
                    ApiError::InvalidInput(format!(
                        "列 {} 的类型 {} 无效，可选: {}",
                        column.display_name,
                        column.datatype,
                        self.get_data_type_list().join(", ")
                    ))
                })?;
            let (label, name) = formatter.add_column(&column.display_name);
            specs.push(ColumnSpec::new(name, label, field_type));
        }

        let resource_rel = manual_resource_location(&dataset.name, Utc::now());
        let resource_name = resource_rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let resource_name = resource_name
            .strip_suffix(crate::importer::schema_resource::RESOURCE_SUFFIX)
            .unwrap_or(&resource_name)
            .to_string();
        let fields = specs
            .iter()
            .map(|c| ResourceField {
                name: c.name.clone(),
                field_type: c.field_type,
            })
            .collect();
        let resource = SchemaResource::manual(&resource_name, fields);
        if let Some(parent) = resource_rel.parent() {
            self.storage.ensure_dir(parent)?;
        }
        resource.write_to(&self.storage.resolve(&resource_rel))?;

        let saved = self.registry.save_dataset_columns(dataset_id, &specs).await?;
        self.registry
            .update_dataset(
                dataset_id,
                &DatasetUpdate {
                    source: Some(DatasetSource::Manual),
                    resource_file: Some(relative_string(&resource_rel)),
                    ..Default::default()
                },
            )
            .await?;

        info!(dataset_id, columns = saved.len(), "人工建列完成");
        Ok(saved)
    }

    pub async fn get_dataset_columns(&self, dataset_id: &str) -> ApiResult<Vec<DatasetColumn>> {
        self.require_dataset(dataset_id).await?;
        Ok(self.registry.get_dataset_columns(dataset_id).await?)
    }

    // ==========================================
    // 人工录入
    // ==========================================

    /// 追加行: 只保留已知列并按列类型转换
    ///
    /// 需要已绑定列结构。尚无集合时按数据集名新建，并同时设置 stagging/prod 表名。
    pub async fn add_dataset_data_manually(
        &self,
        dataset_id: &str,
        rows: &[Value],
    ) -> ApiResult<ManualInsertResult> {
        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_unlocked(&dataset)?;
        Self::ensure_schema(&dataset)?;
        if rows.is_empty() {
            return Err(ApiError::InvalidInput("录入数据不能为空".to_string()));
        }

        let fields = typed_fields(&self.registry.get_dataset_columns(dataset_id).await?);
        let mode = self.config.get_cast_mode().await.map_err(config_error)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(object) = row.as_object() else {
                continue;
            };
            let cast = self.caster.cast_json_row(&fields, object, mode)?;
            for diag in &cast.diagnostics {
                warn!(dataset_id, column = %diag.column, raw = %diag.raw_value, issue = %diag.issue, "人工录入值转换失败");
            }
            if !cast.document.is_empty() {
                docs.push(cast.document);
            }
        }

        // 没有可写入的行: 不建集合，不改状态
        if docs.is_empty() {
            info!(dataset_id, submitted = rows.len(), "人工录入没有可写入的行");
            return Ok(ManualInsertResult {
                created: 0,
                submitted: rows.len(),
            });
        }

        let collection = match dataset.prod_tablename.clone() {
            Some(name) => name,
            None => {
                let name = self.documents.get_or_create_collection(&dataset.name).await?;
                self.registry
                    .update_dataset(
                        dataset_id,
                        &DatasetUpdate {
                            stagging_tablename: Some(name.clone()),
                            prod_tablename: Some(name.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                name
            }
        };

        let created = self.documents.insert_many(&collection, docs).await?;

        self.registry
            .update_dataset(
                dataset_id,
                &DatasetUpdate {
                    stagging_recordcount: Some(dataset.stagging_recordcount + created as i64),
                    prod_recordcount: Some(dataset.prod_recordcount + created as i64),
                    status: Some(DatasetStatus::Ready),
                    ..Default::default()
                },
            )
            .await?;

        info!(dataset_id, collection = %collection, created, submitted = rows.len(), "人工录入完成");
        Ok(ManualInsertResult {
            created,
            submitted: rows.len(),
        })
    }

    /// 按 `_id` 修改单行（`$set` 语义），返回修改后的文档
    pub async fn update_dataset_row_manually(
        &self,
        dataset_id: &str,
        data: &Document,
    ) -> ApiResult<Document> {
        let doc_id = match data.get(DOC_ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(ApiError::InvalidInput("缺少行标识 _id".to_string())),
        };
        if data.len() <= 1 {
            return Err(ApiError::InvalidInput("没有需要修改的字段".to_string()));
        }

        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_unlocked(&dataset)?;
        Self::ensure_schema(&dataset)?;
        let collection = dataset.collection().map(str::to_string).ok_or_else(|| {
            ApiError::BusinessRuleViolation(format!("数据集 {} 尚无数据表", dataset_id))
        })?;

        if self.documents.find_one(&collection, &doc_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("行(_id={})不存在", doc_id)));
        }

        let fields = typed_fields(&self.registry.get_dataset_columns(dataset_id).await?);
        let mode = self.config.get_cast_mode().await.map_err(config_error)?;
        let cast = self.caster.cast_json_row(&fields, data, mode)?;

        self.documents
            .find_one_and_update(&collection, &doc_id, cast.document)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("行(_id={})不存在", doc_id)))
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 行数据分页；locked 或尚无数据表时 rows 为空
    pub async fn get_dataset_data(
        &self,
        dataset_id: &str,
        skip: Option<usize>,
        limit: Option<usize>,
        columns: &[String],
    ) -> ApiResult<DatasetData> {
        let dataset = self.require_dataset(dataset_id).await?;
        let skip = skip.unwrap_or(0);
        let limit = limit.unwrap_or(DEFAULT_DATA_PAGE_LIMIT);

        let all_columns = column_names(&self.registry.get_dataset_columns(dataset_id).await?);
        let valid = valid_columns(columns, &all_columns);
        let projected = if valid.is_empty() {
            all_columns
        } else {
            valid
        };

        let (total, rows) = match dataset.collection() {
            Some(collection) if !dataset.locked => {
                let total = self.documents.count_documents(collection).await?;
                let rows = self
                    .documents
                    .find(
                        collection,
                        &FindOptions {
                            skip,
                            limit: Some(limit),
                            projection: Some(projected.clone()),
                        },
                    )
                    .await?;
                (total, rows)
            }
            _ => (0, Vec::new()),
        };

        Ok(DatasetData {
            skip,
            limit,
            total,
            returned: rows.len(),
            columns: projected,
            left: total
                .saturating_sub(i64::try_from(skip.saturating_add(limit)).unwrap_or(i64::MAX))
                .max(0),
            rows,
            locked: dataset.locked,
        })
    }

    // ==========================================
    // 导出
    // ==========================================

    /// 导出数据（`_id` 为首列），并记录导出审计
    ///
    /// 请求的列都无效时导出全部列。
    pub async fn download_dataset(
        &self,
        dataset_id: &str,
        user_id: &str,
        columns: &[String],
        format: &str,
    ) -> ApiResult<DownloadLink> {
        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_unlocked(&dataset)?;
        if !dataset.has_schema() {
            return Err(ApiError::DatasetLocked(format!(
                "数据集 {} 尚无可导出的数据",
                dataset_id
            )));
        }
        let format = parse_download_format(format)?;

        let all_columns = column_names(&self.registry.get_dataset_columns(dataset_id).await?);
        let valid = valid_columns(columns, &all_columns);
        let exclude: Vec<String> = if valid.is_empty() {
            Vec::new()
        } else {
            all_columns
                .iter()
                .filter(|c| !valid.contains(c))
                .cloned()
                .collect()
        };

        let collection = dataset.prod_tablename.clone().ok_or_else(|| {
            ApiError::BusinessRuleViolation(format!("数据集 {} 尚无数据表", dataset_id))
        })?;

        self.reports.insert_download_request(&DownloadRequest {
            id: Uuid::new_v4().to_string(),
            dataset_id: dataset_id.to_string(),
            user_id: user_id.to_string(),
            columns: columns.to_vec(),
            exclude: exclude.clone(),
            format,
            created_at: Utc::now(),
        })?;

        let exported: Vec<String> = all_columns
            .into_iter()
            .filter(|c| !exclude.contains(c))
            .collect();
        let docs = self
            .documents
            .find(
                &collection,
                &FindOptions {
                    skip: 0,
                    limit: None,
                    projection: Some(exported.clone()),
                },
            )
            .await?;

        let sheet = ExportSheet::from_documents(&docs, &exported);
        let link = self
            .write_download(DownloadFolder::Files, &dataset, format, &sheet)
            .await?;
        info!(dataset_id, rows = docs.len(), link = %link.link, "数据已导出");
        Ok(link)
    }

    /// 只有表头的录入模板
    pub async fn download_dataset_template(
        &self,
        dataset_id: &str,
        columns: &[String],
        format: &str,
    ) -> ApiResult<DownloadLink> {
        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_schema(&dataset)?;
        let format = parse_download_format(format)?;

        let all_columns = column_names(&self.registry.get_dataset_columns(dataset_id).await?);
        let valid = valid_columns(columns, &all_columns);
        let headers = if valid.is_empty() { all_columns } else { valid };

        self.write_download(
            DownloadFolder::Templates,
            &dataset,
            format,
            &ExportSheet::header_only(headers),
        )
        .await
    }

    /// 列定义表（name, display_name, datatype）
    pub async fn download_dataset_columns(
        &self,
        dataset_id: &str,
        format: &str,
    ) -> ApiResult<DownloadLink> {
        let dataset = self.require_dataset(dataset_id).await?;
        Self::ensure_schema(&dataset)?;
        let format = parse_download_format(format)?;

        let columns = self.registry.get_dataset_columns(dataset_id).await?;
        let sheet = ExportSheet {
            headers: vec![
                "name".to_string(),
                "display_name".to_string(),
                "datatype".to_string(),
            ],
            rows: columns
                .iter()
                .map(|c| {
                    vec![
                        CellValue::Text(c.name.clone()),
                        CellValue::Text(c.display_name.clone()),
                        CellValue::Text(c.datatype.as_str().to_string()),
                    ]
                })
                .collect(),
        };

        self.write_download(DownloadFolder::Columns, &dataset, format, &sheet)
            .await
    }

    async fn write_download(
        &self,
        folder: DownloadFolder,
        dataset: &Dataset,
        format: DownloadFormat,
        sheet: &ExportSheet,
    ) -> ApiResult<DownloadLink> {
        let (dir, filename) =
            download_location(folder, &dataset.name, format.extension(), Utc::now());
        let abs_dir = self.storage.ensure_dir(&dir)?;
        write_export(&abs_dir.join(&filename), format, sheet)?;

        let base_url = self.config.get_server_base_url().await.map_err(config_error)?;
        let relative: PathBuf = dir.join(&filename);
        Ok(DownloadLink {
            path: relative_string(&relative),
            link: download_link(&base_url, &dir, &filename),
        })
    }
}

fn parse_download_format(format: &str) -> ApiResult<DownloadFormat> {
    DownloadFormat::from_str(format).ok_or_else(|| {
        ApiError::UnsupportedFormat(format!(
            "{}: 仅支持 {}",
            format,
            DownloadFormat::supported().join(", ")
        ))
    })
}

fn column_names(columns: &[DatasetColumn]) -> Vec<String> {
    columns.iter().map(|c| c.name.clone()).collect()
}

fn typed_fields(columns: &[DatasetColumn]) -> Vec<(String, FieldType)> {
    columns.iter().map(|c| (c.name.clone(), c.datatype)).collect()
}

/// 请求列与数据集列的交集（保持请求顺序，去重）
fn valid_columns(requested: &[String], all: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in requested {
        if all.contains(name) && !out.contains(name) {
            out.push(name.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_manager::{config_keys, ConfigManager};
    use crate::jobs::task_queue::TaskQueue;
    use crate::repository::{DatasetRepository, SqliteDocumentStore};
    use crate::storage::LocalFileStorage;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        base: PathBuf,
        registry: Arc<DatasetRepository>,
        queue: Arc<TaskQueue>,
        reports: Arc<ReportRepository>,
        api: DatasetApi,
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

        let config = Arc::new(ConfigManager::from_connection(reg_conn.clone()).unwrap());
        config
            .set_value(config_keys::BASE_DIR, &base.to_string_lossy())
            .unwrap();
        config
            .set_value(config_keys::SERVER_BASE_URL, "http://cdn.test")
            .unwrap();

        let registry = Arc::new(DatasetRepository::from_connection(reg_conn.clone()));
        let documents = Arc::new(SqliteDocumentStore::from_connection(Arc::new(Mutex::new(
            doc_conn,
        ))));
        let queue = Arc::new(TaskQueue::new(reg_conn.clone(), 0));
        let reports = Arc::new(ReportRepository::from_connection(reg_conn));
        let fdw = Arc::new(FileDataWarehousing::new(
            registry.clone(),
            documents.clone(),
            config.clone(),
        ));

        let api = DatasetApi::new(
            registry.clone(),
            documents,
            Arc::new(LocalFileStorage::new(&base)),
            queue.clone(),
            config,
            reports.clone(),
            fdw,
        );
        Harness {
            _dir: dir,
            base,
            registry,
            queue,
            reports,
            api,
        }
    }

    async fn new_dataset(h: &Harness, name: &str) -> Dataset {
        h.api
            .create_dataset(NewDataset {
                project_id: "p1".into(),
                user_id: "u1".into(),
                name: name.into(),
                description: None,
            })
            .await
            .unwrap()
    }

    fn manual(display: &str, datatype: &str) -> ManualColumn {
        ManualColumn {
            display_name: display.into(),
            datatype: datatype.into(),
        }
    }

    #[tokio::test]
    async fn test_upload_stores_file_and_dispatches() {
        let h = harness();
        let ds = new_dataset(&h, "Monthly Payroll").await;

        let mut body: &[u8] = b"Name,Amount\nAlice,10\n";
        let updated = h
            .api
            .upload_data_file(&ds.id, "payroll.CSV", &mut body)
            .await
            .unwrap();

        assert!(updated.locked);
        assert_eq!(updated.source, Some(DatasetSource::File));
        assert_eq!(updated.format, Some(FileFormat::Csv));
        assert_eq!(updated.filename.as_deref(), Some("payroll.CSV"));
        let file = updated.file.unwrap();
        assert!(file.starts_with("project/media/dataset/"));
        assert!(updated.uuid_filename.unwrap().starts_with("monthly_payroll_"));
        assert!(h.base.join(&file).exists());

        let stats = h.queue.get_queue_stats().unwrap();
        assert_eq!(stats.pending_count, 1);
        let task = h.queue.dequeue().unwrap().unwrap();
        assert_eq!(task.task_name, EXTRACT_TASK_NAME);
        assert_eq!(task.payload, json!({"dataset_id": ds.id}));
    }

    #[tokio::test]
    async fn test_upload_rejections_happen_before_mutation() {
        let h = harness();
        let ds = new_dataset(&h, "Payroll").await;

        let mut body: &[u8] = b"x";
        let err = h
            .api
            .upload_data_file(&ds.id, "payroll.ods", &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedFormat(_)));

        let unchanged = h.api.get_dataset_info(&ds.id).await.unwrap();
        assert!(!unchanged.locked);
        assert!(unchanged.file.is_none());
        assert_eq!(h.queue.get_queue_stats().unwrap().pending_count, 0);

        let err = h
            .api
            .upload_data_file("missing", "a.csv", &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_upload_rejects_locked_and_bound() {
        let h = harness();
        let ds = new_dataset(&h, "Payroll").await;
        h.registry
            .update_dataset(
                &ds.id,
                &DatasetUpdate {
                    locked: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mut body: &[u8] = b"a\n1\n";
        let err = h
            .api
            .upload_data_file(&ds.id, "a.csv", &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DatasetLocked(_)));

        let bound = new_dataset(&h, "Bound").await;
        h.api
            .create_dataset_columns_manually(&bound.id, &[manual("Name", "string")])
            .await
            .unwrap();
        let mut body: &[u8] = b"a\n1\n";
        let err = h
            .api
            .upload_data_file(&bound.id, "a.csv", &mut body)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SchemaAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_manual_columns_and_rows() {
        let h = harness();
        let ds = new_dataset(&h, "Ledger").await;

        let err = h
            .api
            .create_dataset_columns_manually(&ds.id, &[manual("Name", "year")])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let cols = h
            .api
            .create_dataset_columns_manually(
                &ds.id,
                &[manual("Full Name", "string"), manual("Qty", "integer")],
            )
            .await
            .unwrap();
        assert_eq!(cols[0].name, "full_name");
        assert_eq!(cols[0].display_name, "Full Name");

        let info = h.api.get_dataset_info(&ds.id).await.unwrap();
        assert_eq!(info.source, Some(DatasetSource::Manual));
        let resource = SchemaResource::read_from(&h.base.join(info.resource_file.unwrap())).unwrap();
        assert_eq!(resource.path, "");
        assert_eq!(resource.field_type("qty"), Some(FieldType::Integer));

        let result = h
            .api
            .add_dataset_data_manually(
                &ds.id,
                &[
                    json!({"full_name": "Alice", "qty": "3", "unknown": 1}),
                    json!({"unknown": 2}),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            ManualInsertResult {
                created: 1,
                submitted: 2
            }
        );

        let info = h.api.get_dataset_info(&ds.id).await.unwrap();
        assert_eq!(info.status, DatasetStatus::Ready);
        assert_eq!(info.prod_tablename.as_deref(), Some("ledger"));
        assert_eq!(info.stagging_tablename.as_deref(), Some("ledger"));
        assert_eq!(info.prod_recordcount, 1);

        let data = h
            .api
            .get_dataset_data(&ds.id, None, None, &[])
            .await
            .unwrap();
        assert_eq!(data.total, 1);
        assert_eq!(data.limit, 100);
        assert_eq!(data.left, 0);
        assert_eq!(data.rows[0]["qty"], json!(3));
        assert!(!data.rows[0].contains_key("unknown"));

        let row_id = data.rows[0]["_id"].as_str().unwrap().to_string();
        let mut patch = Document::new();
        patch.insert("_id".into(), json!(row_id));
        patch.insert("qty".into(), json!("7"));
        let updated = h.api.update_dataset_row_manually(&ds.id, &patch).await.unwrap();
        assert_eq!(updated["qty"], json!(7));
        assert_eq!(updated["full_name"], json!("Alice"));

        patch.insert("_id".into(), json!("nope"));
        let err = h
            .api
            .update_dataset_row_manually(&ds.id, &patch)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_manual_rows_need_bound_columns() {
        let h = harness();
        let ds = new_dataset(&h, "Ledger").await;

        let err = h
            .api
            .add_dataset_data_manually(&ds.id, &[json!({"anything": 1})])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BusinessRuleViolation(_)));

        let info = h.api.get_dataset_info(&ds.id).await.unwrap();
        assert_eq!(info.status, DatasetStatus::Created);
        assert!(info.prod_tablename.is_none());
        assert!(info.stagging_tablename.is_none());
    }

    #[tokio::test]
    async fn test_manual_rows_without_known_columns_change_nothing() {
        let h = harness();
        let ds = new_dataset(&h, "Ledger").await;
        h.api
            .create_dataset_columns_manually(&ds.id, &[manual("Account", "string")])
            .await
            .unwrap();

        let result = h
            .api
            .add_dataset_data_manually(&ds.id, &[json!({"other": 1}), json!("not an object")])
            .await
            .unwrap();
        assert_eq!(
            result,
            ManualInsertResult {
                created: 0,
                submitted: 2
            }
        );

        let info = h.api.get_dataset_info(&ds.id).await.unwrap();
        assert_eq!(info.status, DatasetStatus::Created);
        assert!(info.prod_tablename.is_none());
        assert_eq!(info.prod_recordcount, 0);
    }

    #[tokio::test]
    async fn test_huge_page_arguments_are_clamped() {
        let h = harness();
        let ds = new_dataset(&h, "Ledger").await;
        h.api
            .create_dataset_columns_manually(&ds.id, &[manual("Account", "string")])
            .await
            .unwrap();
        h.api
            .add_dataset_data_manually(&ds.id, &[json!({"account": "A"}), json!({"account": "B"})])
            .await
            .unwrap();

        let data = h
            .api
            .get_dataset_data(&ds.id, Some(usize::MAX), None, &[])
            .await
            .unwrap();
        assert_eq!(data.total, 2);
        assert!(data.rows.is_empty());
        assert_eq!(data.left, 0);

        let data = h
            .api
            .get_dataset_data(&ds.id, Some(1), Some(usize::MAX), &[])
            .await
            .unwrap();
        assert_eq!(data.returned, 1);
        assert_eq!(data.left, 0);

        let page = h
            .api
            .get_project_datasets("p1", Some(usize::MAX), Some(usize::MAX))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.datasets.is_empty());
    }

    #[tokio::test]
    async fn test_update_row_requires_id_and_fields() {
        let h = harness();
        let ds = new_dataset(&h, "Ledger").await;

        let mut only_id = Document::new();
        only_id.insert("_id".into(), json!("r1"));
        let err = h
            .api
            .update_dataset_row_manually(&ds.id, &only_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let mut no_id = Document::new();
        no_id.insert("qty".into(), json!(1));
        let err = h
            .api
            .update_dataset_row_manually(&ds.id, &no_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_download_dataset_projects_and_audits() {
        let h = harness();
        let ds = new_dataset(&h, "Ledger").await;
        h.api
            .create_dataset_columns_manually(
                &ds.id,
                &[manual("Name", "string"), manual("Qty", "integer")],
            )
            .await
            .unwrap();
        h.api
            .add_dataset_data_manually(&ds.id, &[json!({"name": "A", "qty": 1})])
            .await
            .unwrap();

        let err = h
            .api
            .download_dataset(&ds.id, "u1", &[], "ods")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UnsupportedFormat(_)));

        let link = h
            .api
            .download_dataset(&ds.id, "u1", &["qty".into(), "bogus".into()], "csv")
            .await
            .unwrap();
        assert!(link.link.starts_with("http://cdn.test/cdn/project/media/downloads/files/"));
        assert!(link.path.ends_with(".csv"));

        let content = std::fs::read_to_string(h.base.join(&link.path)).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("_id,qty"));
        assert!(lines.next().unwrap().ends_with(",1"));

        assert_eq!(h.reports.count_download_requests(&ds.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_template_and_columns_downloads() {
        let h = harness();
        let ds = new_dataset(&h, "Ledger").await;
        let err = h
            .api
            .download_dataset_template(&ds.id, &[], "csv")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BusinessRuleViolation(_)));

        h.api
            .create_dataset_columns_manually(
                &ds.id,
                &[manual("Name", "string"), manual("Qty", "integer")],
            )
            .await
            .unwrap();

        let template = h
            .api
            .download_dataset_template(&ds.id, &["missing".into()], "csv")
            .await
            .unwrap();
        assert!(template.path.contains("downloads/templates/"));
        assert_eq!(
            std::fs::read_to_string(h.base.join(&template.path)).unwrap(),
            "name,qty\n"
        );

        let columns = h
            .api
            .download_dataset_columns(&ds.id, "xlsx")
            .await
            .unwrap();
        assert!(columns.path.contains("downloads/columns/"));
        assert!(h.base.join(&columns.path).exists());
    }

    #[tokio::test]
    async fn test_reset_stuck_dataset() {
        let h = harness();
        let ds = new_dataset(&h, "Payroll").await;

        let err = h.api.reset_stuck_dataset(&ds.id).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));

        h.registry
            .update_dataset(
                &ds.id,
                &DatasetUpdate {
                    status: Some(DatasetStatus::Extracting),
                    locked: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let reset = h.api.reset_stuck_dataset(&ds.id).await.unwrap();
        assert_eq!(reset.status, DatasetStatus::Failed);
        assert!(!reset.locked);
    }

    #[tokio::test]
    async fn test_update_delete_and_listing() {
        let h = harness();
        let a = new_dataset(&h, "A").await;
        new_dataset(&h, "B").await;

        let same = h
            .api
            .update_dataset(
                &a.id,
                DatasetChanges {
                    name: Some("  ".into()),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(same.name, "A");

        let renamed = h
            .api
            .update_dataset(
                &a.id,
                DatasetChanges {
                    name: Some("A2".into()),
                    description: Some("desc".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "A2");
        assert_eq!(renamed.description.as_deref(), Some("desc"));

        h.api.delete_dataset(&a.id).await.unwrap();
        let page = h.api.get_project_datasets("p1", None, None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.limit, 20);
        assert_eq!(page.datasets[0].name, "B");
        assert!(matches!(
            h.api.get_dataset_info(&a.id).await,
            Err(ApiError::NotFound(_))
        ));

        let types = h.api.get_data_type_list();
        assert!(types.contains(&"string"));
        assert!(types.contains(&"datetime"));
        assert!(!types.contains(&"year"));
    }
}
