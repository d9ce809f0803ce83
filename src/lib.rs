// ==========================================
// 文件数据仓储 (FDW) - 核心库
// ==========================================
// 职责: 上传表格文件 → 列结构与类型推断 → 写入文档库
// 技术栈: Rust + SQLite (registry / document 两个库)
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 注册表与文档库
pub mod repository;

// 导入层 - 规范化与抽取管道
pub mod importer;

// 配置层
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 文件存储
pub mod storage;

// 后台任务
pub mod jobs;

// 日志与性能埋点
pub mod logging;
pub mod perf;

// API 层 - 业务接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::types::{CastMode, DatasetSource, DatasetStatus, DownloadFormat, FieldType, FileFormat};

pub use domain::{ColumnSpec, Dataset, DatasetColumn, Document, NewDataset, Report};

pub use importer::{ExtractionReport, FileDataWarehousing, ImportError};

pub use repository::{DatasetRegistry, DatasetRepository, DocumentStore, SqliteDocumentStore};

pub use jobs::{ExtractionJob, TaskDispatcher, TaskQueue, EXTRACT_TASK_NAME};

pub use api::{ApiError, DatasetApi, ReportApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "文件数据仓储";
