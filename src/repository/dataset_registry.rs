// ==========================================
// 文件数据仓储 (FDW) - 数据集注册表 Trait
// ==========================================
// 职责: 定义数据集/列的数据访问接口（不包含业务逻辑）
// 红线: Repository 不含业务规则，只做数据 CRUD
//       例外: prod_tablename 只写一次、列结构只绑定一次（数据完整性约束）
// ==========================================

use crate::domain::dataset::{ColumnSpec, Dataset, DatasetColumn, DatasetUpdate, NewDataset};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;

// ==========================================
// DatasetRegistry Trait
// ==========================================
// 实现者: DatasetRepository（使用 rusqlite）
#[async_trait]
pub trait DatasetRegistry: Send + Sync {
    // ===== 数据集 =====

    /// 登记新数据集（status = created）
    async fn insert_dataset(&self, new: &NewDataset) -> RepositoryResult<Dataset>;

    /// 按 id 查询（包括已软删除的记录）
    async fn get_dataset(&self, dataset_id: &str) -> RepositoryResult<Option<Dataset>>;

    /// 字段级更新，返回更新后的记录
    ///
    /// # 错误
    /// - NotFound: 数据集不存在
    /// - BusinessRuleViolation: 试图修改已设置的 prod_tablename
    async fn update_dataset(
        &self,
        dataset_id: &str,
        update: &DatasetUpdate,
    ) -> RepositoryResult<Dataset>;

    /// 项目下未删除的数据集（按创建时间倒序）
    async fn list_project_datasets(
        &self,
        project_id: &str,
        skip: usize,
        limit: usize,
    ) -> RepositoryResult<Vec<Dataset>>;

    /// 项目下未删除的数据集总数
    async fn count_project_datasets(&self, project_id: &str) -> RepositoryResult<i64>;

    // ===== 列结构 =====

    /// 批量绑定列（单事务，按顺序写 position）
    ///
    /// # 错误
    /// - BusinessRuleViolation: 数据集已存在列
    /// - UniqueConstraintViolation: 列表内机器名重复
    async fn save_dataset_columns(
        &self,
        dataset_id: &str,
        columns: &[ColumnSpec],
    ) -> RepositoryResult<Vec<DatasetColumn>>;

    /// 查询列（按 position 排序）
    async fn get_dataset_columns(&self, dataset_id: &str) -> RepositoryResult<Vec<DatasetColumn>>;
}
