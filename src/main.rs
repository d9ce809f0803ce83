// ==========================================
// 文件数据仓储 (FDW) - 抽取 worker 主入口
// ==========================================
// 职责: 打开 registry/document 库，注册抽取任务，轮询任务队列直到 Ctrl-C
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context};
use tracing::{error, info};

use fdw_warehouse::config::{ConfigManager, WarehouseConfigReader};
use fdw_warehouse::jobs::{ExtractionJob, TaskQueue};
use fdw_warehouse::repository::{DatasetRepository, SqliteDocumentStore};
use fdw_warehouse::{db, logging, perf, FileDataWarehousing};

fn open_database(
    path: &str,
    init: fn(&rusqlite::Connection) -> rusqlite::Result<()>,
) -> anyhow::Result<Arc<Mutex<rusqlite::Connection>>> {
    let mut conn =
        db::open_sqlite_connection(path).with_context(|| format!("无法打开数据库: {}", path))?;
    init(&conn).with_context(|| format!("初始化数据库结构失败: {}", path))?;
    perf::install_sqlite_tracing(&mut conn);
    Ok(Arc::new(Mutex::new(conn)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    info!("==================================================");
    info!("{} - 抽取 worker", fdw_warehouse::APP_NAME);
    info!("系统版本: {}", fdw_warehouse::VERSION);
    info!("==================================================");

    let registry_path = db::default_registry_db_path();
    let document_path = db::default_document_db_path();
    info!(registry = %registry_path, documents = %document_path, "使用数据库");

    let registry_conn = open_database(&registry_path, db::init_registry_schema)?;
    let document_conn = open_database(&document_path, db::init_document_schema)?;

    let config = Arc::new(
        ConfigManager::from_connection(registry_conn.clone())
            .map_err(|e| anyhow!("初始化配置失败: {}", e))?,
    );
    let base_dir = config
        .get_base_dir()
        .await
        .map_err(|e| anyhow!("读取 base_dir 失败: {}", e))?;
    std::fs::create_dir_all(&base_dir)
        .with_context(|| format!("无法创建存储目录: {}", base_dir.display()))?;
    let name_max_len = config
        .get_collection_name_max_len()
        .await
        .map_err(|e| anyhow!("读取 collection_name_max_len 失败: {}", e))?;
    let max_retries = config
        .get_task_max_retries()
        .await
        .map_err(|e| anyhow!("读取 task_max_retries 失败: {}", e))?;
    let poll_ms = config
        .get_worker_poll_interval_ms()
        .await
        .map_err(|e| anyhow!("读取 worker_poll_interval_ms 失败: {}", e))?;

    let registry = Arc::new(DatasetRepository::from_connection(registry_conn.clone()));
    let documents =
        Arc::new(SqliteDocumentStore::from_connection(document_conn).with_name_max_len(name_max_len));
    let fdw = Arc::new(FileDataWarehousing::new(registry, documents, config));

    let mut queue = TaskQueue::new(registry_conn, max_retries);
    queue.register(Arc::new(ExtractionJob::new(fdw)));

    let requeued = queue.requeue_stale_running()?;
    if requeued > 0 {
        info!(requeued, "已重新投递中断的任务");
    }

    info!(base_dir = %base_dir.display(), poll_ms, max_retries, "worker 已启动");

    let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match queue.process_all().await {
                    Ok(done) if !done.is_empty() => info!(tasks = done.len(), "本轮任务处理完成"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "任务队列处理失败"),
                }
            }
            _ = &mut shutdown => {
                info!("收到退出信号，worker 停止");
                break;
            }
        }
    }

    Ok(())
}
