// ==========================================
// 文件数据仓储 (FDW) - 后台任务队列
// ==========================================
// 职责: 持久化任务（task_queue 表），按名称分发给已注册的处理器
// 语义:
// - 至少一次投递: 出队即标记 RUNNING，worker 重启时 RUNNING 任务回到 PENDING
// - 失败时 retry_count < max_retries 才回到 PENDING（首次执行 + 最多 max_retries 次重试）
// - 单 worker 串行执行
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PENDING" => TaskStatus::Pending,
            "RUNNING" => TaskStatus::Running,
            "COMPLETED" => TaskStatus::Completed,
            "FAILED" => TaskStatus::Failed,
            "CANCELLED" => TaskStatus::Cancelled,
            _ => TaskStatus::Failed,
        }
    }
}

/// 队列中的任务
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task_id: String,
    pub task_name: String,
    pub payload: Value,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
}

impl QueuedTask {
    /// 是否可以重试
    pub fn can_retry(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error(transparent)]
    Queue(#[from] RepositoryError),

    #[error("未注册的任务: {0}")]
    UnknownTask(String),

    #[error("任务载荷无效: {0}")]
    InvalidPayload(String),

    #[error("任务执行失败 (task_id: {task_id}): {message}")]
    Failed { task_id: String, message: String },
}

// ==========================================
// 对外接口
// ==========================================

/// 任务提交方（上传接口只依赖这个接口）
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// 提交任务，返回 task_id
    async fn submit_job(&self, task_name: &str, payload: Value) -> RepositoryResult<String>;
}

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    fn task_name(&self) -> &'static str;

    /// 执行任务，返回写入日志的结果摘要
    async fn handle(&self, payload: &Value) -> anyhow::Result<Value>;
}

/// 队列统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending_count: u32,
    pub running_count: u32,
    pub completed_count: u32,
    pub failed_count: u32,
}

const TASK_COLUMNS: &str = "task_id, task_name, payload, status, retry_count, max_retries,
     created_at, started_at, completed_at, error_message";

fn map_task_row(row: &Row<'_>) -> rusqlite::Result<QueuedTask> {
    let payload_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    Ok(QueuedTask {
        task_id: row.get(0)?,
        task_name: row.get(1)?,
        payload: serde_json::from_str(&payload_raw).unwrap_or(Value::Null),
        status: TaskStatus::from_str(&status_raw),
        retry_count: row.get(4)?,
        max_retries: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
        error_message: row.get(9)?,
    })
}

// ==========================================
// TaskQueue - SQLite 任务队列
// ==========================================
pub struct TaskQueue {
    conn: Arc<Mutex<Connection>>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    max_retries: i32,
}

impl TaskQueue {
    /// 创建任务队列（task_queue 表由 init_registry_schema 创建）
    pub fn new(conn: Arc<Mutex<Connection>>, max_retries: i32) -> Self {
        Self {
            conn,
            handlers: HashMap::new(),
            max_retries: max_retries.max(0),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        tracing::debug!(task_name = handler.task_name(), "注册任务处理器");
        self.handlers
            .insert(handler.task_name().to_string(), handler);
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 写入任务
    pub fn enqueue(&self, task_name: &str, payload: &Value) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let task_id = Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO task_queue (task_id, task_name, payload, status, retry_count, max_retries, created_at)
             VALUES (?1, ?2, ?3, 'PENDING', 0, ?4, ?5)",
            params![
                task_id,
                task_name,
                serde_json::to_string(payload)?,
                self.max_retries,
                Utc::now().to_rfc3339(),
            ],
        )?;

        tracing::info!(task_id = %task_id, task_name, "任务已加入队列");
        Ok(task_id)
    }

    /// 取出最早的 PENDING 任务并标记为 RUNNING
    pub fn dequeue(&self) -> RepositoryResult<Option<QueuedTask>> {
        let conn = self.get_conn()?;

        let task = conn
            .query_row(
                &format!(
                    "SELECT {} FROM task_queue WHERE status = 'PENDING'
                     ORDER BY created_at ASC, rowid ASC LIMIT 1",
                    TASK_COLUMNS
                ),
                [],
                map_task_row,
            )
            .optional()?;

        let Some(mut task) = task else {
            return Ok(None);
        };

        let started_at = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE task_queue SET status = 'RUNNING', started_at = ?1 WHERE task_id = ?2",
            params![started_at, task.task_id],
        )?;
        task.status = TaskStatus::Running;
        task.started_at = Some(started_at);
        Ok(Some(task))
    }

    /// worker 启动时: 上次未完成的 RUNNING 任务重新投递
    pub fn requeue_stale_running(&self) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let n = conn.execute(
            "UPDATE task_queue SET status = 'PENDING', started_at = NULL WHERE status = 'RUNNING'",
            [],
        )?;
        if n > 0 {
            tracing::warn!(count = n, "RUNNING 任务已重新投递");
        }
        Ok(n)
    }

    /// 执行单个任务并记录结果
    pub async fn execute_task(&self, mut task: QueuedTask) -> Result<Value, TaskError> {
        tracing::info!(task_id = %task.task_id, task_name = %task.task_name, "开始执行任务");

        let outcome = match self.handlers.get(&task.task_name) {
            Some(handler) => handler
                .handle(&task.payload)
                .await
                .map_err(|e| format!("{:#}", e)),
            None => Err(TaskError::UnknownTask(task.task_name.clone()).to_string()),
        };

        match outcome {
            Ok(summary) => {
                let conn = self.get_conn()?;
                conn.execute(
                    "UPDATE task_queue SET status = 'COMPLETED', completed_at = ?1, error_message = NULL
                     WHERE task_id = ?2",
                    params![Utc::now().to_rfc3339(), task.task_id],
                )
                .map_err(RepositoryError::from)?;
                tracing::info!(task_id = %task.task_id, "任务执行成功");
                Ok(summary)
            }
            Err(message) => {
                task.status = TaskStatus::Failed;
                task.error_message = Some(message.clone());

                // 先按本次失败前的 retry_count 判断，再计数
                let next_status = if task.can_retry() {
                    TaskStatus::Pending
                } else {
                    TaskStatus::Failed
                };
                task.retry_count += 1;

                let conn = self.get_conn()?;
                conn.execute(
                    "UPDATE task_queue SET status = ?1, error_message = ?2, retry_count = ?3
                     WHERE task_id = ?4",
                    params![
                        next_status.as_str(),
                        task.error_message,
                        task.retry_count,
                        task.task_id
                    ],
                )
                .map_err(RepositoryError::from)?;

                if next_status == TaskStatus::Pending {
                    tracing::warn!(
                        task_id = %task.task_id,
                        retry_count = task.retry_count,
                        error = %message,
                        "任务失败，将重试"
                    );
                } else {
                    tracing::error!(
                        task_id = %task.task_id,
                        retry_count = task.retry_count,
                        error = %message,
                        "任务失败"
                    );
                }

                Err(TaskError::Failed {
                    task_id: task.task_id,
                    message,
                })
            }
        }
    }

    /// 处理下一个任务，返回 task_id（队列为空返回 None）
    pub async fn process_next(&self) -> Result<Option<String>, TaskError> {
        let Some(task) = self.dequeue()? else {
            return Ok(None);
        };
        let task_id = task.task_id.clone();
        self.execute_task(task).await?;
        Ok(Some(task_id))
    }

    /// 处理所有待执行任务，返回成功的 task_id（失败的记录日志后继续）
    pub async fn process_all(&self) -> RepositoryResult<Vec<String>> {
        let mut completed = Vec::new();
        loop {
            match self.process_next().await {
                Ok(Some(task_id)) => completed.push(task_id),
                Ok(None) => break,
                Err(TaskError::Queue(e)) => return Err(e),
                Err(e) => tracing::error!(error = %e, "处理任务失败"),
            }
        }
        Ok(completed)
    }

    pub fn get_task_status(&self, task_id: &str) -> RepositoryResult<Option<QueuedTask>> {
        let conn = self.get_conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM task_queue WHERE task_id = ?1", TASK_COLUMNS),
                params![task_id],
                map_task_row,
            )
            .optional()?;
        Ok(task)
    }

    /// 取消 PENDING 任务
    pub fn cancel_task(&self, task_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let n = conn.execute(
            "UPDATE task_queue SET status = 'CANCELLED' WHERE task_id = ?1 AND status = 'PENDING'",
            params![task_id],
        )?;
        Ok(n > 0)
    }

    pub fn get_queue_stats(&self) -> RepositoryResult<QueueStats> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM task_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as u32;
            match TaskStatus::from_str(&status) {
                TaskStatus::Pending => stats.pending_count = count,
                TaskStatus::Running => stats.running_count = count,
                TaskStatus::Completed => stats.completed_count = count,
                TaskStatus::Failed => stats.failed_count = count,
                TaskStatus::Cancelled => {}
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl TaskDispatcher for TaskQueue {
    async fn submit_job(&self, task_name: &str, payload: Value) -> RepositoryResult<String> {
        self.enqueue(task_name, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        fn task_name(&self) -> &'static str {
            "test.count"
        }

        async fn handle(&self, payload: &Value) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(json!({ "echo": payload.clone() }))
        }
    }

    fn setup_queue(max_retries: i32) -> TaskQueue {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_registry_schema(&conn).unwrap();
        TaskQueue::new(Arc::new(Mutex::new(conn)), max_retries)
    }

    fn handler(fail: bool) -> Arc<CountingHandler> {
        Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn test_submit_and_process() {
        let mut queue = setup_queue(0);
        let h = handler(false);
        queue.register(h.clone());

        let id = queue
            .submit_job("test.count", json!({"dataset_id": "d1"}))
            .await
            .unwrap();
        assert_eq!(queue.get_task_status(&id).unwrap().unwrap().status, TaskStatus::Pending);

        let done = queue.process_all().await.unwrap();
        assert_eq!(done, vec![id.clone()]);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let task = queue.get_task_status(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.payload["dataset_id"], "d1");
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let mut queue = setup_queue(0);
        let h = handler(true);
        queue.register(h.clone());

        let id = queue.enqueue("test.count", &json!({})).unwrap();
        let done = queue.process_all().await.unwrap();
        assert!(done.is_empty());
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);

        let task = queue.get_task_status(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_retries_up_to_max() {
        let mut queue = setup_queue(2);
        let h = handler(true);
        queue.register(h.clone());

        let id = queue.enqueue("test.count", &json!({})).unwrap();
        queue.process_all().await.unwrap();

        // 首次执行 + 2 次重试
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        let task = queue.get_task_status(&id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 3);
    }

    #[tokio::test]
    async fn test_unknown_task_fails() {
        let queue = setup_queue(0);
        let id = queue.enqueue("nobody.listens", &json!({})).unwrap();
        let err = queue.process_next().await.unwrap_err();
        assert!(matches!(err, TaskError::Failed { .. }));
        assert_eq!(
            queue.get_task_status(&id).unwrap().unwrap().status,
            TaskStatus::Failed
        );
    }

    #[test]
    fn test_requeue_stale_running_redelivers() {
        let queue = setup_queue(0);
        let id = queue.enqueue("test.count", &json!({})).unwrap();
        let task = queue.dequeue().unwrap().unwrap();
        assert_eq!(task.task_id, id);
        assert!(queue.dequeue().unwrap().is_none());

        assert_eq!(queue.requeue_stale_running().unwrap(), 1);
        assert_eq!(queue.dequeue().unwrap().unwrap().task_id, id);
    }

    #[test]
    fn test_cancel_and_stats() {
        let queue = setup_queue(0);
        let a = queue.enqueue("test.count", &json!({})).unwrap();
        queue.enqueue("test.count", &json!({})).unwrap();
        assert!(queue.cancel_task(&a).unwrap());
        assert!(!queue.cancel_task(&a).unwrap());

        let stats = queue.get_queue_stats().unwrap();
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.failed_count, 0);
    }
}
