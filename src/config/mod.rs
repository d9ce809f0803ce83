// ==========================================
// 文件数据仓储 (FDW) - 配置层
// ==========================================
// 职责: 仓储配置管理（默认值 + config_kv 覆写 + 环境变量）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod warehouse_config_trait;

pub use config_manager::{config_keys, defaults, ConfigManager, ENV_BASE_DIR};
pub use warehouse_config_trait::{ConfigResult, WarehouseConfigReader};
