// ==========================================
// 文件数据仓储 (FDW) - 数据集注册表仓储
// ==========================================
// 职责: 管理 dataset / dataset_column 表的 CRUD 操作
// 红线: 不含管道逻辑，只负责数据访问
// ==========================================

use crate::domain::dataset::{ColumnSpec, Dataset, DatasetColumn, DatasetUpdate, NewDataset};
use crate::domain::types::{DatasetSource, DatasetStatus, FieldType, FileFormat};
use crate::repository::dataset_registry::DatasetRegistry;
use crate::repository::document_store::sql_count;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const DATASET_COLUMNS_SQL: &str = r#"
    d.id, d.project_id, d.user_id, d.name, d.description, d.source,
    d.filename, d.uuid_filename, d.file, d.format, d.resource_file,
    d.status, d.locked, d.stagging_tablename, d.prod_tablename,
    d.stagging_recordcount, d.prod_recordcount, d.extraction_duration,
    d.deleted, d.created_at, d.updated_at,
    (SELECT COUNT(*) FROM dataset_column c WHERE c.dataset_id = d.id) AS fields
"#;

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            tracing::warn!(raw, "时间戳格式无法解析，使用当前时间");
            Utc::now()
        })
}

fn map_dataset_row(row: &Row<'_>) -> rusqlite::Result<Dataset> {
    let source: Option<String> = row.get(5)?;
    let format: Option<String> = row.get(9)?;
    let status: String = row.get(11)?;
    let created_at: String = row.get(19)?;
    let updated_at: String = row.get(20)?;

    Ok(Dataset {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        source: source.as_deref().and_then(DatasetSource::from_str),
        filename: row.get(6)?,
        uuid_filename: row.get(7)?,
        file: row.get(8)?,
        format: format.as_deref().and_then(FileFormat::from_extension),
        resource_file: row.get(10)?,
        status: DatasetStatus::from_str(&status),
        locked: row.get::<_, i64>(12)? != 0,
        stagging_tablename: row.get(13)?,
        prod_tablename: row.get(14)?,
        stagging_recordcount: row.get(15)?,
        prod_recordcount: row.get(16)?,
        extraction_duration: row.get(17)?,
        deleted: row.get::<_, i64>(18)? != 0,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        fields: row.get(21)?,
    })
}

fn map_column_row(row: &Row<'_>) -> rusqlite::Result<DatasetColumn> {
    let datatype: String = row.get(4)?;
    Ok(DatasetColumn {
        id: row.get(0)?,
        dataset_id: row.get(1)?,
        name: row.get(2)?,
        display_name: row.get(3)?,
        datatype: FieldType::from_str(&datatype).unwrap_or(FieldType::Any),
        position: row.get(5)?,
    })
}

fn select_dataset(conn: &Connection, dataset_id: &str) -> RepositoryResult<Option<Dataset>> {
    let sql = format!("SELECT {} FROM dataset d WHERE d.id = ?1", DATASET_COLUMNS_SQL);
    Ok(conn
        .query_row(&sql, params![dataset_id], map_dataset_row)
        .optional()?)
}

fn opt_text(v: &Option<String>) -> Option<SqlValue> {
    v.as_ref().map(|s| SqlValue::Text(s.clone()))
}

// ==========================================
// DatasetRepository - 数据集注册表仓储
// ==========================================
pub struct DatasetRepository {
    conn: Arc<Mutex<Connection>>,
}

impl DatasetRepository {
    /// 创建新的 DatasetRepository 实例（需已执行 registry 建表）
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建仓储实例
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 将 DatasetUpdate 展开为 (列名, 值) 列表
    fn collect_assignments(update: &DatasetUpdate) -> Vec<(&'static str, SqlValue)> {
        let mut sets: Vec<(&'static str, SqlValue)> = Vec::new();

        if let Some(v) = opt_text(&update.name) {
            sets.push(("name", v));
        }
        if let Some(v) = opt_text(&update.description) {
            sets.push(("description", v));
        }
        if let Some(source) = update.source {
            sets.push(("source", SqlValue::Text(source.to_db_str().to_string())));
        }
        if let Some(v) = opt_text(&update.filename) {
            sets.push(("filename", v));
        }
        if let Some(v) = opt_text(&update.uuid_filename) {
            sets.push(("uuid_filename", v));
        }
        if let Some(v) = opt_text(&update.file) {
            sets.push(("file", v));
        }
        if let Some(format) = update.format {
            sets.push(("format", SqlValue::Text(format.extension().to_string())));
        }
        if let Some(v) = opt_text(&update.resource_file) {
            sets.push(("resource_file", v));
        }
        if let Some(status) = update.status {
            sets.push(("status", SqlValue::Text(status.to_db_str().to_string())));
        }
        if let Some(locked) = update.locked {
            sets.push(("locked", SqlValue::Integer(locked as i64)));
        }
        if let Some(v) = opt_text(&update.stagging_tablename) {
            sets.push(("stagging_tablename", v));
        }
        if let Some(v) = opt_text(&update.prod_tablename) {
            sets.push(("prod_tablename", v));
        }
        if let Some(n) = update.stagging_recordcount {
            sets.push(("stagging_recordcount", SqlValue::Integer(n)));
        }
        if let Some(n) = update.prod_recordcount {
            sets.push(("prod_recordcount", SqlValue::Integer(n)));
        }
        if let Some(secs) = update.extraction_duration {
            sets.push(("extraction_duration", SqlValue::Real(secs)));
        }
        if let Some(deleted) = update.deleted {
            sets.push(("deleted", SqlValue::Integer(deleted as i64)));
        }

        sets
    }
}

#[async_trait]
impl DatasetRegistry for DatasetRepository {
    async fn insert_dataset(&self, new: &NewDataset) -> RepositoryResult<Dataset> {
        let conn = self.get_conn()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO dataset (
                id, project_id, user_id, name, description,
                status, locked, deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, ?7, ?7)
            "#,
            params![
                id,
                new.project_id,
                new.user_id,
                new.name,
                new.description,
                DatasetStatus::Created.to_db_str(),
                now,
            ],
        )?;

        tracing::debug!(dataset_id = %id, name = %new.name, "数据集已登记");

        select_dataset(&conn, &id)?.ok_or_else(|| RepositoryError::not_found("Dataset", id))
    }

    async fn get_dataset(&self, dataset_id: &str) -> RepositoryResult<Option<Dataset>> {
        let conn = self.get_conn()?;
        select_dataset(&conn, dataset_id)
    }

    async fn update_dataset(
        &self,
        dataset_id: &str,
        update: &DatasetUpdate,
    ) -> RepositoryResult<Dataset> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let current = select_dataset(&tx, dataset_id)?
            .ok_or_else(|| RepositoryError::not_found("Dataset", dataset_id))?;

        // prod_tablename 只允许设置一次
        if let (Some(existing), Some(requested)) = (&current.prod_tablename, &update.prod_tablename)
        {
            if existing != requested {
                return Err(RepositoryError::BusinessRuleViolation(format!(
                    "数据集 {} 的 prod_tablename 已设置为 {}，不可修改为 {}",
                    dataset_id, existing, requested
                )));
            }
        }

        let mut sets = Self::collect_assignments(update);
        if sets.is_empty() {
            return Ok(current);
        }
        sets.push(("updated_at", SqlValue::Text(Utc::now().to_rfc3339())));

        let clause = sets
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ?{}", col, i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE dataset SET {} WHERE id = ?{}",
            clause,
            sets.len() + 1
        );

        let mut values: Vec<SqlValue> = sets.into_iter().map(|(_, v)| v).collect();
        values.push(SqlValue::Text(dataset_id.to_string()));
        tx.execute(&sql, params_from_iter(values))?;

        let updated = select_dataset(&tx, dataset_id)?
            .ok_or_else(|| RepositoryError::not_found("Dataset", dataset_id))?;
        tx.commit()?;

        Ok(updated)
    }

    async fn list_project_datasets(
        &self,
        project_id: &str,
        skip: usize,
        limit: usize,
    ) -> RepositoryResult<Vec<Dataset>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM dataset d WHERE d.project_id = ?1 AND d.deleted = 0
             ORDER BY d.created_at DESC, d.id ASC LIMIT ?2 OFFSET ?3",
            DATASET_COLUMNS_SQL
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![project_id, sql_count(limit), sql_count(skip)],
            map_dataset_row,
        )?;

        let mut datasets = Vec::new();
        for row in rows {
            datasets.push(row?);
        }
        Ok(datasets)
    }

    async fn count_project_datasets(&self, project_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM dataset WHERE project_id = ?1 AND deleted = 0",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn save_dataset_columns(
        &self,
        dataset_id: &str,
        columns: &[ColumnSpec],
    ) -> RepositoryResult<Vec<DatasetColumn>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM dataset WHERE id = ?1",
                params![dataset_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Err(RepositoryError::not_found("Dataset", dataset_id));
        }

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM dataset_column WHERE dataset_id = ?1",
            params![dataset_id],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(RepositoryError::BusinessRuleViolation(format!(
                "数据集 {} 已绑定 {} 列，列结构只能绑定一次",
                dataset_id, existing
            )));
        }

        let mut saved = Vec::with_capacity(columns.len());
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO dataset_column (id, dataset_id, name, display_name, datatype, position)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for (position, spec) in columns.iter().enumerate() {
                let column = DatasetColumn {
                    id: Uuid::new_v4().to_string(),
                    dataset_id: dataset_id.to_string(),
                    name: spec.name.clone(),
                    display_name: spec.label.clone(),
                    datatype: spec.field_type,
                    position: position as i64,
                };
                stmt.execute(params![
                    column.id,
                    column.dataset_id,
                    column.name,
                    column.display_name,
                    column.datatype.as_str(),
                    column.position,
                ])?;
                saved.push(column);
            }
        }

        tx.execute(
            "UPDATE dataset SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), dataset_id],
        )?;
        tx.commit()?;

        tracing::info!(dataset_id, columns = saved.len(), "列结构已绑定");
        Ok(saved)
    }

    async fn get_dataset_columns(&self, dataset_id: &str) -> RepositoryResult<Vec<DatasetColumn>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, dataset_id, name, display_name, datatype, position
            FROM dataset_column
            WHERE dataset_id = ?1
            ORDER BY position ASC
            "#,
        )?;
        let rows = stmt.query_map(params![dataset_id], map_column_row)?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }
}
