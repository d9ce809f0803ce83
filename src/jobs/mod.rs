// ==========================================
// 文件数据仓储 (FDW) - 后台任务
// ==========================================
// 职责: 任务队列（至少一次投递）与抽取任务处理器
// ==========================================

pub mod extraction_job;
pub mod task_queue;

pub use extraction_job::{extraction_payload, ExtractionJob, EXTRACT_TASK_NAME};
pub use task_queue::{
    QueueStats, QueuedTask, TaskDispatcher, TaskError, TaskHandler, TaskQueue, TaskStatus,
};
