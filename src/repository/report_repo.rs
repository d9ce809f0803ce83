// ==========================================
// 文件数据仓储 (FDW) - 报表与下载记录仓储
// ==========================================
// 职责: report / report_column / download_request 表的 CRUD
// 归属: 报表查询一律带 user_id 条件
// ==========================================

use crate::domain::report::{DownloadRequest, Report, ReportColumn};
use crate::repository::dataset_repo::parse_timestamp;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ==========================================
// ReportRepository
// ==========================================
pub struct ReportRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ReportRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入报表列引用（按传入顺序编号），列必须属于该数据集
    fn write_columns(
        tx: &Transaction<'_>,
        report_id: &str,
        dataset_id: &str,
        column_ids: &[String],
    ) -> RepositoryResult<()> {
        tx.execute(
            "DELETE FROM report_column WHERE report_id = ?1",
            params![report_id],
        )?;

        for (position, column_id) in column_ids.iter().enumerate() {
            let name: Option<String> = tx
                .query_row(
                    "SELECT name FROM dataset_column WHERE id = ?1 AND dataset_id = ?2",
                    params![column_id, dataset_id],
                    |row| row.get(0),
                )
                .optional()?;
            let name = name.ok_or_else(|| {
                RepositoryError::ValidationError(format!(
                    "列 {} 不属于数据集 {}",
                    column_id, dataset_id
                ))
            })?;

            tx.execute(
                "INSERT INTO report_column (report_id, column_id, column_name, position)
                 VALUES (?1, ?2, ?3, ?4)",
                params![report_id, column_id, name, position as i64],
            )?;
        }
        Ok(())
    }

    fn load_columns(conn: &Connection, report_id: &str) -> RepositoryResult<Vec<ReportColumn>> {
        let mut stmt = conn.prepare(
            "SELECT column_id, column_name, position FROM report_column
             WHERE report_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![report_id], |row| {
            Ok(ReportColumn {
                column_id: row.get(0)?,
                column_name: row.get(1)?,
                position: row.get(2)?,
            })
        })?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }

    fn load_report(
        conn: &Connection,
        report_id: &str,
        user_id: &str,
    ) -> RepositoryResult<Option<Report>> {
        let header = conn
            .query_row(
                "SELECT id, dataset_id, user_id, name, deleted, created_at, updated_at
                 FROM report WHERE id = ?1 AND user_id = ?2 AND deleted = 0",
                params![report_id, user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, dataset_id, user_id, name, deleted, created_at, updated_at)) = header else {
            return Ok(None);
        };

        let columns = Self::load_columns(conn, &id)?;
        Ok(Some(Report {
            id,
            dataset_id,
            user_id,
            name,
            columns,
            deleted: deleted != 0,
            created_at: parse_timestamp(&created_at),
            updated_at: parse_timestamp(&updated_at),
        }))
    }

    /// 创建报表
    pub fn create(
        &self,
        dataset_id: &str,
        user_id: &str,
        name: &str,
        column_ids: &[String],
    ) -> RepositoryResult<Report> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO report (id, dataset_id, user_id, name, deleted, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
            params![id, dataset_id, user_id, name, now],
        )?;
        Self::write_columns(&tx, &id, dataset_id, column_ids)?;

        let report = Self::load_report(&tx, &id, user_id)?
            .ok_or_else(|| RepositoryError::not_found("Report", id.clone()))?;
        tx.commit()?;
        Ok(report)
    }

    /// 按 id 查询（仅本人、未删除）
    pub fn find(&self, report_id: &str, user_id: &str) -> RepositoryResult<Option<Report>> {
        let conn = self.get_conn()?;
        Self::load_report(&conn, report_id, user_id)
    }

    /// 本人在某数据集下的报表（或全部数据集）
    pub fn list(&self, user_id: &str, dataset_id: Option<&str>) -> RepositoryResult<Vec<Report>> {
        let conn = self.get_conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT id FROM report
                 WHERE user_id = ?1 AND deleted = 0 AND (?2 IS NULL OR dataset_id = ?2)
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![user_id, dataset_id], |row| row.get(0))?;
            rows.collect::<Result<Vec<String>, _>>()?
        };

        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(report) = Self::load_report(&conn, &id, user_id)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// 修改名称和/或列引用
    pub fn update(
        &self,
        report_id: &str,
        user_id: &str,
        name: Option<&str>,
        column_ids: Option<&[String]>,
    ) -> RepositoryResult<Report> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let current = Self::load_report(&tx, report_id, user_id)?
            .ok_or_else(|| RepositoryError::not_found("Report", report_id))?;

        if let Some(name) = name {
            tx.execute(
                "UPDATE report SET name = ?1 WHERE id = ?2",
                params![name, report_id],
            )?;
        }
        if let Some(column_ids) = column_ids {
            Self::write_columns(&tx, report_id, &current.dataset_id, column_ids)?;
        }
        tx.execute(
            "UPDATE report SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), report_id],
        )?;

        let report = Self::load_report(&tx, report_id, user_id)?
            .ok_or_else(|| RepositoryError::not_found("Report", report_id))?;
        tx.commit()?;
        Ok(report)
    }

    /// 软删除
    pub fn soft_delete(&self, report_id: &str, user_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let affected = conn.execute(
            "UPDATE report SET deleted = 1, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3 AND deleted = 0",
            params![Utc::now().to_rfc3339(), report_id, user_id],
        )?;
        if affected == 0 {
            return Err(RepositoryError::not_found("Report", report_id));
        }
        Ok(())
    }

    // ===== 下载记录 =====

    /// 记录一次导出请求
    pub fn insert_download_request(&self, request: &DownloadRequest) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO download_request (id, dataset_id, user_id, columns_json, exclude_json, format, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                request.id,
                request.dataset_id,
                request.user_id,
                serde_json::to_string(&request.columns)?,
                serde_json::to_string(&request.exclude)?,
                request.format.extension(),
                request.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// 某数据集的导出记录条数
    pub fn count_download_requests(&self, dataset_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM download_request WHERE dataset_id = ?1",
            params![dataset_id],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, init_registry_schema};

    fn setup() -> (ReportRepository, Arc<Mutex<Connection>>) {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_registry_schema(&conn).unwrap();
        conn.execute_batch(
            r#"
            INSERT INTO dataset (id, project_id, user_id, name, created_at, updated_at)
            VALUES ('d1', 'p1', 'u1', 'sales', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z');
            INSERT INTO dataset_column (id, dataset_id, name, display_name, datatype, position)
            VALUES ('c1', 'd1', 'region', 'Region', 'string', 0),
                   ('c2', 'd1', 'amount', 'Amount', 'number', 1);
            "#,
        )
        .unwrap();
        let shared = Arc::new(Mutex::new(conn));
        (ReportRepository::from_connection(shared.clone()), shared)
    }

    #[test]
    fn test_report_is_owner_scoped() {
        let (repo, _conn) = setup();
        let report = repo
            .create("d1", "u1", "按区域", &["c2".to_string(), "c1".to_string()])
            .unwrap();
        assert_eq!(report.column_names(), vec!["amount", "region"]);

        assert!(repo.find(&report.id, "u2").unwrap().is_none());
        assert!(repo.list("u2", None).unwrap().is_empty());
        assert_eq!(repo.list("u1", Some("d1")).unwrap().len(), 1);
    }

    #[test]
    fn test_rejects_foreign_column() {
        let (repo, _conn) = setup();
        let err = repo
            .create("d1", "u1", "bad", &["nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ValidationError(_)));
        // 事务回滚，报表未落库
        assert!(repo.list("u1", None).unwrap().is_empty());
    }

    #[test]
    fn test_update_and_soft_delete() {
        let (repo, _conn) = setup();
        let report = repo.create("d1", "u1", "r", &["c1".to_string()]).unwrap();
        let updated = repo
            .update(&report.id, "u1", Some("r2"), Some(&["c2".to_string()]))
            .unwrap();
        assert_eq!(updated.name, "r2");
        assert_eq!(updated.column_names(), vec!["amount"]);

        repo.soft_delete(&report.id, "u1").unwrap();
        assert!(repo.find(&report.id, "u1").unwrap().is_none());
        assert!(repo.soft_delete(&report.id, "u1").is_err());
    }
}
