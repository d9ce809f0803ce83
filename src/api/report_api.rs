// ==========================================
// 文件数据仓储 (FDW) - 报表 API
// ==========================================
// 职责: 数据集列子集报表的增删改查（按 user_id 归属）
// 入参列为机器名，API 内部映射为列 id；不属于数据集的列忽略
// ==========================================

use std::sync::Arc;

use tracing::info;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::dataset::DatasetColumn;
use crate::domain::report::{NewReport, Report, ReportChanges};
use crate::repository::report_repo::ReportRepository;
use crate::repository::DatasetRegistry;

pub struct ReportApi {
    reports: Arc<ReportRepository>,
    registry: Arc<dyn DatasetRegistry>,
}

impl ReportApi {
    pub fn new(reports: Arc<ReportRepository>, registry: Arc<dyn DatasetRegistry>) -> Self {
        Self { reports, registry }
    }

    /// 列机器名 → 列 id（保持请求顺序，去重）；无一有效时报错
    fn resolve_column_ids(
        requested: &[String],
        columns: &[DatasetColumn],
    ) -> ApiResult<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for name in requested {
            if let Some(col) = columns.iter().find(|c| &c.name == name) {
                if !ids.contains(&col.id) {
                    ids.push(col.id.clone());
                }
            }
        }
        if ids.is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "请求的列均不属于该数据集: {}",
                requested.join(", ")
            )));
        }
        Ok(ids)
    }

    pub async fn create_report(&self, new: NewReport) -> ApiResult<Report> {
        if new.columns.is_empty() {
            return Err(ApiError::InvalidInput("报表列不能为空".to_string()));
        }
        if new.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("报表名称不能为空".to_string()));
        }

        let dataset = match self.registry.get_dataset(&new.dataset_id).await? {
            Some(ds) if !ds.deleted => ds,
            _ => {
                return Err(ApiError::NotFound(format!(
                    "Dataset(id={})不存在",
                    new.dataset_id
                )))
            }
        };
        if dataset.locked || !dataset.has_schema() {
            return Err(ApiError::DatasetLocked(format!(
                "数据集 {} 正在抽取或尚未绑定列结构",
                dataset.id
            )));
        }

        let columns = self.registry.get_dataset_columns(&dataset.id).await?;
        let column_ids = Self::resolve_column_ids(&new.columns, &columns)?;

        let report = self
            .reports
            .create(&dataset.id, &new.user_id, new.name.trim(), &column_ids)?;
        info!(report_id = %report.id, dataset_id = %dataset.id, columns = column_ids.len(), "报表已创建");
        Ok(report)
    }

    /// 修改名称和/或列（列为整体替换）
    pub async fn update_report(
        &self,
        report_id: &str,
        user_id: &str,
        changes: ReportChanges,
    ) -> ApiResult<Report> {
        let current = self.get_report(report_id, user_id).await?;

        let column_ids = match &changes.columns {
            Some(cols) if cols.is_empty() => {
                return Err(ApiError::InvalidInput("报表列不能为空".to_string()))
            }
            Some(cols) => {
                let columns = self.registry.get_dataset_columns(&current.dataset_id).await?;
                Some(Self::resolve_column_ids(cols, &columns)?)
            }
            None => None,
        };
        let name = changes
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        Ok(self
            .reports
            .update(report_id, user_id, name, column_ids.as_deref())?)
    }

    pub async fn get_report(&self, report_id: &str, user_id: &str) -> ApiResult<Report> {
        self.reports
            .find(report_id, user_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Report(id={})不存在", report_id)))
    }

    pub async fn get_reports(
        &self,
        user_id: &str,
        dataset_id: Option<&str>,
    ) -> ApiResult<Vec<Report>> {
        Ok(self.reports.list(user_id, dataset_id)?)
    }

    pub async fn delete_report(&self, report_id: &str, user_id: &str) -> ApiResult<()> {
        self.reports.soft_delete(report_id, user_id)?;
        info!(report_id, "报表已删除");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dataset::{ColumnSpec, NewDataset};
    use crate::domain::types::FieldType;
    use crate::repository::DatasetRepository;
    use std::sync::Mutex;

    async fn setup() -> (ReportApi, String) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_registry_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let registry = Arc::new(DatasetRepository::from_connection(conn.clone()));
        let ds = registry
            .insert_dataset(&NewDataset {
                project_id: "p1".into(),
                user_id: "u1".into(),
                name: "Payroll".into(),
                description: None,
            })
            .await
            .unwrap();
        registry
            .save_dataset_columns(
                &ds.id,
                &[
                    ColumnSpec::new("name", "Name", FieldType::String),
                    ColumnSpec::new("amount", "Amount", FieldType::Number),
                ],
            )
            .await
            .unwrap();

        let api = ReportApi::new(Arc::new(ReportRepository::from_connection(conn)), registry);
        (api, ds.id)
    }

    fn new_report(dataset_id: &str, columns: &[&str]) -> NewReport {
        NewReport {
            dataset_id: dataset_id.into(),
            user_id: "u1".into(),
            name: "Totals".into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_create_report_keeps_known_columns() {
        let (api, ds) = setup().await;
        let report = api
            .create_report(new_report(&ds, &["amount", "bogus"]))
            .await
            .unwrap();
        assert_eq!(report.column_names(), vec!["amount"]);

        let err = api
            .create_report(new_report(&ds, &["bogus"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = api.create_report(new_report(&ds, &[])).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_reports_are_owner_scoped() {
        let (api, ds) = setup().await;
        let report = api.create_report(new_report(&ds, &["name"])).await.unwrap();

        assert!(matches!(
            api.get_report(&report.id, "u2").await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            api.delete_report(&report.id, "u2").await,
            Err(ApiError::NotFound(_))
        ));

        let updated = api
            .update_report(
                &report.id,
                "u1",
                ReportChanges {
                    name: None,
                    columns: Some(vec!["amount".into(), "name".into()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Totals");
        assert_eq!(updated.column_names(), vec!["amount", "name"]);

        assert_eq!(api.get_reports("u1", None).await.unwrap().len(), 1);
        api.delete_report(&report.id, "u1").await.unwrap();
        assert!(api.get_reports("u1", Some(&ds)).await.unwrap().is_empty());
    }
}
