// ==========================================
// 文件数据仓储 (FDW) - 仓储配置读取 Trait
// ==========================================
// 职责: 定义管道/API/worker 所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::CastMode;
use async_trait::async_trait;
use std::error::Error;
use std::path::PathBuf;

/// 配置读取结果
pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// WarehouseConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait WarehouseConfigReader: Send + Sync {
    // ===== 存储 =====

    /// 上传/转换/导出文件的根目录
    ///
    /// # 默认值
    /// - `./data`（环境变量 FDW_BASE_DIR 优先）
    async fn get_base_dir(&self) -> ConfigResult<PathBuf>;

    // ===== 管道 =====

    /// 批量写入文档库的行数
    ///
    /// # 默认值
    /// - 1000
    async fn get_batch_size(&self) -> ConfigResult<usize>;

    /// 日期修复的采样行数
    ///
    /// # 默认值
    /// - 100
    async fn get_date_sample_rows(&self) -> ConfigResult<usize>;

    /// 集合名最大长度
    ///
    /// # 默认值
    /// - 22
    async fn get_collection_name_max_len(&self) -> ConfigResult<usize>;

    /// 人工录入/更新行时的类型转换模式（文件管道始终宽松）
    ///
    /// # 默认值
    /// - lenient
    async fn get_cast_mode(&self) -> ConfigResult<CastMode>;

    // ===== 导出 =====

    /// 下载链接前缀
    ///
    /// # 默认值
    /// - http://localhost:8000
    async fn get_server_base_url(&self) -> ConfigResult<String>;

    // ===== 任务队列 =====

    /// 任务失败后的最大重试次数（0 表示不自动重试）
    async fn get_task_max_retries(&self) -> ConfigResult<i32>;

    /// worker 轮询间隔（毫秒，默认 2000）
    async fn get_worker_poll_interval_ms(&self) -> ConfigResult<u64>;
}
