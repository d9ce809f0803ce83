// ==========================================
// 文件数据仓储 (FDW) - API 层
// ==========================================
// 职责: 对外业务接口（数据集、报表、导出），供上层服务调用
// ==========================================

pub mod dataset_api;
pub mod error;
pub mod export;
pub mod report_api;

// 重导出核心类型
pub use dataset_api::{DatasetApi, DatasetData, DatasetPage, ManualInsertResult};
pub use error::{ApiError, ApiResult};
pub use export::{download_link, write_export, ExportSheet};
pub use report_api::ReportApi;
