// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时 registry/document 数据库、完整 API 装配、测试文件生成
// ==========================================

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fdw_warehouse::api::{DatasetApi, ReportApi};
use fdw_warehouse::config::{config_keys, ConfigManager};
use fdw_warehouse::db;
use fdw_warehouse::domain::{Dataset, NewDataset};
use fdw_warehouse::jobs::{ExtractionJob, TaskQueue};
use fdw_warehouse::repository::{DatasetRepository, ReportRepository, SqliteDocumentStore};
use fdw_warehouse::storage::LocalFileStorage;
use fdw_warehouse::FileDataWarehousing;
use rusqlite::Connection;
use tempfile::TempDir;

pub type SharedConn = Arc<Mutex<Connection>>;

/// 一套完整的测试环境（TempDir 需保持存活）
pub struct TestEnv {
    pub dir: TempDir,
    pub base_dir: PathBuf,
    pub registry_conn: SharedConn,
    pub config: Arc<ConfigManager>,
    pub registry: Arc<DatasetRepository>,
    pub documents: Arc<SqliteDocumentStore>,
    pub reports: Arc<ReportRepository>,
    pub fdw: Arc<FileDataWarehousing>,
    pub queue: Arc<TaskQueue>,
    pub api: DatasetApi,
    pub report_api: ReportApi,
}

/// 在临时目录中打开并初始化 registry 库
pub fn create_registry_db(dir: &Path) -> SharedConn {
    let path = dir.join("registry.db");
    let conn = db::open_sqlite_connection(path.to_str().unwrap()).unwrap();
    db::init_registry_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

/// 在临时目录中打开并初始化文档库
pub fn create_document_db(dir: &Path) -> SharedConn {
    let path = dir.join("documents.db");
    let conn = db::open_sqlite_connection(path.to_str().unwrap()).unwrap();
    db::init_document_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

/// 默认环境: batch_size = 2，便于覆盖多批次写入
pub fn setup() -> TestEnv {
    setup_with(&[(config_keys::BATCH_SIZE, "2")], 0)
}

/// 自定义配置项与任务重试次数
pub fn setup_with(overrides: &[(&str, &str)], max_retries: i32) -> TestEnv {
    fdw_warehouse::logging::init_test();

    let dir = TempDir::new().unwrap();
    let base_dir = dir.path().join("media-root");
    std::fs::create_dir_all(&base_dir).unwrap();

    let registry_conn = create_registry_db(dir.path());
    let document_conn = create_document_db(dir.path());

    let config = Arc::new(ConfigManager::from_connection(registry_conn.clone()).unwrap());
    config
        .set_value(config_keys::BASE_DIR, base_dir.to_str().unwrap())
        .unwrap();
    config
        .set_value(config_keys::SERVER_BASE_URL, "http://localhost:8000")
        .unwrap();
    for (key, value) in overrides {
        config.set_value(key, value).unwrap();
    }

    let registry = Arc::new(DatasetRepository::from_connection(registry_conn.clone()));
    let documents = Arc::new(SqliteDocumentStore::from_connection(document_conn));
    let reports = Arc::new(ReportRepository::from_connection(registry_conn.clone()));
    let fdw = Arc::new(FileDataWarehousing::new(
        registry.clone(),
        documents.clone(),
        config.clone(),
    ));

    let mut queue = TaskQueue::new(registry_conn.clone(), max_retries);
    queue.register(Arc::new(ExtractionJob::new(fdw.clone())));
    let queue = Arc::new(queue);

    let api = DatasetApi::new(
        registry.clone(),
        documents.clone(),
        Arc::new(LocalFileStorage::new(&base_dir)),
        queue.clone(),
        config.clone(),
        reports.clone(),
        fdw.clone(),
    );
    let report_api = ReportApi::new(reports.clone(), registry.clone());

    TestEnv {
        dir,
        base_dir,
        registry_conn,
        config,
        registry,
        documents,
        reports,
        fdw,
        queue,
        api,
        report_api,
    }
}

impl TestEnv {
    pub async fn create_dataset(&self, name: &str) -> Dataset {
        self.api
            .create_dataset(NewDataset {
                project_id: "project-1".to_string(),
                user_id: "user-1".to_string(),
                name: name.to_string(),
                description: None,
            })
            .await
            .unwrap()
    }

    /// 上传内存中的文件内容
    pub async fn upload(&self, dataset_id: &str, filename: &str, content: &[u8]) -> Dataset {
        let mut reader = content;
        self.api
            .upload_data_file(dataset_id, filename, &mut reader)
            .await
            .unwrap()
    }

    /// 上传并让 worker 处理队列
    pub async fn upload_and_extract(&self, name: &str, filename: &str, content: &[u8]) -> Dataset {
        let ds = self.create_dataset(name).await;
        self.upload(&ds.id, filename, content).await;
        self.queue.process_all().await.unwrap();
        self.api.get_dataset_info(&ds.id).await.unwrap()
    }
}

/// 生成 xlsx 测试文件内容（第一张工作表）
pub fn xlsx_bytes(headers: &[&str], rows: &[Vec<&str>]) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (c, h) in headers.iter().enumerate() {
        sheet.write_string(0, c as u16, *h).unwrap();
    }
    for (r, row) in rows.iter().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            match cell.parse::<f64>() {
                Ok(n) => sheet.write_number((r + 1) as u32, c as u16, n).unwrap(),
                Err(_) => sheet.write_string((r + 1) as u32, c as u16, *cell).unwrap(),
            };
        }
    }
    workbook.save_to_buffer().unwrap()
}
