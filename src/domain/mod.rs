// ==========================================
// 文件数据仓储 (FDW) - 领域模型层
// ==========================================
// 职责: 定义实体、枚举、单元格值
// 红线: 不含数据访问逻辑,不含导入管道逻辑
// ==========================================

pub mod dataset;
pub mod report;
pub mod types;
pub mod value;

// 重导出核心类型
pub use dataset::{
    ColumnSpec, Dataset, DatasetChanges, DatasetColumn, DatasetUpdate, ManualColumn, NewDataset,
};
pub use report::{DownloadLink, DownloadRequest, NewReport, Report, ReportChanges, ReportColumn};
pub use types::{CastMode, DatasetSource, DatasetStatus, DownloadFormat, FieldType, FileFormat};
pub use value::{CastDiagnostic, CastRow, CellValue, Document};
