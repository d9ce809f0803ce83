// ==========================================
// 文件数据仓储 (FDW) - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - registry 库与文档库的幂等建表
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// registry 库路径环境变量
pub const ENV_DB_PATH: &str = "FDW_DB_PATH";
/// 文档库路径环境变量
pub const ENV_DOCUMENT_DB_PATH: &str = "FDW_DOCUMENT_DB_PATH";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：foreign_keys / busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化 registry 库（数据集、列、报表、下载记录、配置、任务队列）
pub fn init_registry_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS dataset (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            source TEXT,
            filename TEXT,
            uuid_filename TEXT,
            file TEXT,
            format TEXT,
            resource_file TEXT,
            status TEXT NOT NULL DEFAULT 'created',
            locked INTEGER NOT NULL DEFAULT 0,
            stagging_tablename TEXT,
            prod_tablename TEXT,
            stagging_recordcount INTEGER NOT NULL DEFAULT 0,
            prod_recordcount INTEGER NOT NULL DEFAULT 0,
            extraction_duration REAL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_dataset_project
          ON dataset(project_id, deleted);

        CREATE TABLE IF NOT EXISTS dataset_column (
            id TEXT PRIMARY KEY,
            dataset_id TEXT NOT NULL REFERENCES dataset(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            datatype TEXT NOT NULL,
            position INTEGER NOT NULL,
            UNIQUE(dataset_id, name)
        );

        CREATE TABLE IF NOT EXISTS report (
            id TEXT PRIMARY KEY,
            dataset_id TEXT NOT NULL REFERENCES dataset(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS report_column (
            report_id TEXT NOT NULL REFERENCES report(id) ON DELETE CASCADE,
            column_id TEXT NOT NULL REFERENCES dataset_column(id) ON DELETE CASCADE,
            column_name TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (report_id, position)
        );

        CREATE TABLE IF NOT EXISTS download_request (
            id TEXT PRIMARY KEY,
            dataset_id TEXT NOT NULL REFERENCES dataset(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            columns_json TEXT NOT NULL,
            exclude_json TEXT NOT NULL,
            format TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS task_queue (
            task_id TEXT PRIMARY KEY,
            task_name TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            error_message TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_task_queue_status
          ON task_queue(status, created_at);
        "#,
    )?;

    record_schema_version(conn)
}

/// 初始化文档库（集合登记表 + 文档表）
pub fn init_document_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS document_collection (
            name TEXT PRIMARY KEY,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS document (
            collection TEXT NOT NULL REFERENCES document_collection(name) ON DELETE CASCADE,
            doc_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (collection, doc_id)
        );

        CREATE INDEX IF NOT EXISTS idx_document_seq
          ON document(collection, seq);
        "#,
    )?;

    record_schema_version(conn)
}

fn record_schema_version(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// registry 库默认路径（环境变量优先，其次系统数据目录）
pub fn default_registry_db_path() -> String {
    resolve_db_path(ENV_DB_PATH, "fdw_registry.db")
}

/// 文档库默认路径
pub fn default_document_db_path() -> String {
    resolve_db_path(ENV_DOCUMENT_DB_PATH, "fdw_documents.db")
}

fn resolve_db_path(env_key: &str, file_name: &str) -> String {
    if let Ok(path) = std::env::var(env_key) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("fdw-warehouse");
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "创建数据目录失败，回退到当前目录");
        return file_name.to_string();
    }
    dir.push(file_name);
    dir.to_string_lossy().to_string()
}
