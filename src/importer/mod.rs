// ==========================================
// 文件数据仓储 (FDW) - 导入管道
// ==========================================
// 职责: 上传文件 → 规范 CSV → 列规格/资源描述 → 文档库
// 支持: Excel (.xlsx/.xls), CSV
// ==========================================

pub mod column_formatter;
pub mod date_repair;
pub mod error;
pub mod file_parser;
pub mod normalizer;
pub mod schema_resource;
pub mod type_caster;
pub mod type_detector;
pub mod warehousing;

pub use column_formatter::{format_column, ColumnFormatter, RESERVED_ID_COLUMN};
pub use date_repair::{parse_day_first, repair_date_columns, DateRepairOutcome};
pub use error::{ImportError, ImportResult};
pub use file_parser::{CsvParser, CsvRowStream, ExcelParser, FileParser, RawTable};
pub use normalizer::{ConvertedFile, FileNormalizer};
pub use schema_resource::{
    resource_path_for, ResourceField, ResourceScheme, SchemaResource, RESOURCE_SUFFIX,
};
pub use type_caster::{CastOutcome, TypeCaster, DEFAULT_MISSING_VALUES};
pub use type_detector::{detect_types, TypeInference};
pub use warehousing::{ExtractionReport, FileDataWarehousing};
