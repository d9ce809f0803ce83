// ==========================================
// 文件数据仓储 (FDW) - 数据仓储层
// ==========================================
// 红线: Repository 不含管道逻辑
// 职责: 注册表 (dataset/列/报表) 与文档库访问，屏蔽数据库细节
// 约束: 所有查询使用参数化
// ==========================================

pub mod dataset_registry;
pub mod dataset_repo;
pub mod document_store;
pub mod error;
pub mod report_repo;

pub use dataset_registry::DatasetRegistry;
pub use dataset_repo::DatasetRepository;
pub use document_store::{
    normalize_collection_name, DocumentStore, FindOptions, SqliteDocumentStore, DOC_ID_FIELD,
};
pub use error::{RepositoryError, RepositoryResult};
pub use report_repo::ReportRepository;
