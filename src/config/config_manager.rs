// ==========================================
// 文件数据仓储 (FDW) - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: registry 库 config_kv 表 (scope_id='global')
// ==========================================

use crate::config::warehouse_config_trait::{ConfigResult, WarehouseConfigReader};
use crate::db::open_sqlite_connection;
use crate::domain::types::CastMode;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// base_dir 环境变量覆写
pub const ENV_BASE_DIR: &str = "FDW_BASE_DIR";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: registry 数据库文件路径（需已建表）
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager（对连接再次应用统一 PRAGMA，幂等）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> ConfigResult<String> {
        Ok(self
            .get_config_value(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// 读取非负整数配置，格式错误或为 0 时回退默认值
    fn get_positive_or_default(&self, key: &str, default: usize) -> ConfigResult<usize> {
        let raw = self.get_config_or_default(key, &default.to_string())?;
        match raw.trim().parse::<usize>() {
            Ok(v) if v > 0 => Ok(v),
            _ => {
                tracing::warn!(config_key = key, raw_value = %raw, default, "配置值无效，使用默认值");
                Ok(default)
            }
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// 写入配置（UPSERT）
    pub fn set_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::debug!(config_key = key, value, "配置已更新");
        Ok(())
    }

    /// 全部 global 配置的快照
    pub fn get_config_snapshot(&self) -> ConfigResult<HashMap<String, String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(config_map)
    }
}

// ==========================================
// WarehouseConfigReader Trait 实现
// ==========================================
#[async_trait]
impl WarehouseConfigReader for ConfigManager {
    async fn get_base_dir(&self) -> ConfigResult<PathBuf> {
        if let Ok(dir) = std::env::var(ENV_BASE_DIR) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir.trim()));
            }
        }
        let value = self.get_config_or_default(config_keys::BASE_DIR, defaults::BASE_DIR)?;
        Ok(PathBuf::from(value))
    }

    async fn get_batch_size(&self) -> ConfigResult<usize> {
        self.get_positive_or_default(config_keys::BATCH_SIZE, defaults::BATCH_SIZE)
    }

    async fn get_date_sample_rows(&self) -> ConfigResult<usize> {
        self.get_positive_or_default(config_keys::DATE_SAMPLE_ROWS, defaults::DATE_SAMPLE_ROWS)
    }

    async fn get_collection_name_max_len(&self) -> ConfigResult<usize> {
        self.get_positive_or_default(
            config_keys::COLLECTION_NAME_MAX_LEN,
            defaults::COLLECTION_NAME_MAX_LEN,
        )
    }

    async fn get_cast_mode(&self) -> ConfigResult<CastMode> {
        let value = self.get_config_or_default(config_keys::CAST_MODE, "lenient")?;
        Ok(CastMode::from_str(&value))
    }

    async fn get_server_base_url(&self) -> ConfigResult<String> {
        let value =
            self.get_config_or_default(config_keys::SERVER_BASE_URL, defaults::SERVER_BASE_URL)?;
        Ok(value.trim().trim_end_matches('/').to_string())
    }

    async fn get_task_max_retries(&self) -> ConfigResult<i32> {
        let value = self.get_config_or_default(config_keys::TASK_MAX_RETRIES, "0")?;
        Ok(value.trim().parse::<i32>().map(|v| v.max(0)).unwrap_or(0))
    }

    async fn get_worker_poll_interval_ms(&self) -> ConfigResult<u64> {
        let value = self.get_config_or_default(config_keys::WORKER_POLL_INTERVAL_MS, "2000")?;
        Ok(value.trim().parse::<u64>().unwrap_or(2000).max(100))
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 存储
    pub const BASE_DIR: &str = "base_dir";

    // 管道
    pub const BATCH_SIZE: &str = "batch_size";
    pub const DATE_SAMPLE_ROWS: &str = "date_sample_rows";
    pub const COLLECTION_NAME_MAX_LEN: &str = "collection_name_max_len";
    pub const CAST_MODE: &str = "cast_mode";

    // 导出
    pub const SERVER_BASE_URL: &str = "server_base_url";

    // 任务队列
    pub const TASK_MAX_RETRIES: &str = "task_max_retries";
    pub const WORKER_POLL_INTERVAL_MS: &str = "worker_poll_interval_ms";
}

pub mod defaults {
    pub const BASE_DIR: &str = "./data";
    pub const BATCH_SIZE: usize = 1000;
    pub const DATE_SAMPLE_ROWS: usize = 100;
    pub const COLLECTION_NAME_MAX_LEN: usize = 22;
    pub const SERVER_BASE_URL: &str = "http://localhost:8000";
}
