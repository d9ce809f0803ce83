// ==========================================
// 文件数据仓储 (FDW) - 文档存储适配层
// ==========================================
// 职责: 命名集合 + JSON 文档（扩展 JSON 编码）的追加写入与查询
// 实现: SQLite 文档库 (document_collection / document 表)
// 语义:
// - insert_many 追加写入，无去重、无结构校验
// - 集合名在 get_or_create_collection 调用时登记
// ==========================================

use crate::domain::value::Document;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// 文档主键字段
pub const DOC_ID_FIELD: &str = "_id";

/// 集合名默认最大长度
pub const DEFAULT_COLLECTION_NAME_MAX_LEN: usize = 22;

/// 查询参数
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub skip: usize,
    pub limit: Option<usize>,
    /// 投影字段（`_id` 总是返回）；None 表示全部字段
    pub projection: Option<Vec<String>>,
}

/// 规范化候选集合名: 小写、去 `$`、空格转 `_`、截断
pub fn normalize_collection_name(proposed: &str, max_len: usize) -> String {
    proposed
        .to_lowercase()
        .replace('$', "")
        .replace(' ', "_")
        .chars()
        .take(max_len)
        .collect()
}

/// 分页参数转 SQLite 整数；超出 i64 的取 i64::MAX
pub(crate) fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// ==========================================
// DocumentStore Trait
// ==========================================
// 实现者: SqliteDocumentStore
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 选定并登记一个未被占用的集合名
    ///
    /// 已存在时依次尝试 `_1`, `_2`, …；两次调用得到两个不同集合。
    async fn get_or_create_collection(&self, proposed: &str) -> RepositoryResult<String>;

    /// 批量追加，缺少 `_id` 的文档自动生成；返回写入条数
    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> RepositoryResult<usize>;

    /// 写入单个文档，返回 `_id`
    async fn insert_one(&self, collection: &str, doc: Document) -> RepositoryResult<String>;

    /// 按插入顺序分页查询
    async fn find(&self, collection: &str, options: &FindOptions) -> RepositoryResult<Vec<Document>>;

    async fn find_one(&self, collection: &str, doc_id: &str) -> RepositoryResult<Option<Document>>;

    /// `$set` 语义: 合并字段（`_id` 不可改），返回更新后的文档
    async fn find_one_and_update(
        &self,
        collection: &str,
        doc_id: &str,
        set: Document,
    ) -> RepositoryResult<Option<Document>>;

    async fn count_documents(&self, collection: &str) -> RepositoryResult<i64>;

    async fn list_collection_names(&self) -> RepositoryResult<Vec<String>>;
}

// ==========================================
// SqliteDocumentStore
// ==========================================
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
    name_max_len: usize,
}

impl SqliteDocumentStore {
    /// 打开文档库并建表
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        crate::db::init_document_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            name_max_len: DEFAULT_COLLECTION_NAME_MAX_LEN,
        })
    }

    /// 从已有连接创建（需已执行 init_document_schema）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            name_max_len: DEFAULT_COLLECTION_NAME_MAX_LEN,
        }
    }

    pub fn with_name_max_len(mut self, max_len: usize) -> Self {
        self.name_max_len = max_len.max(1);
        self
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn collection_exists(conn: &Connection, name: &str) -> RepositoryResult<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM document_collection WHERE name = ?1",
                params![name],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false))
    }

    fn ensure_collection(conn: &Connection, name: &str) -> RepositoryResult<()> {
        if !Self::collection_exists(conn, name)? {
            return Err(RepositoryError::not_found("Collection", name));
        }
        Ok(())
    }

    fn parse_body(raw: &str) -> RepositoryResult<Document> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(map) => Ok(map),
            other => Err(RepositoryError::SerializationError(format!(
                "文档不是 JSON 对象: {}",
                other
            ))),
        }
    }

    fn project(doc: Document, projection: &Option<Vec<String>>) -> Document {
        match projection {
            None => doc,
            Some(fields) => doc
                .into_iter()
                .filter(|(k, _)| k == DOC_ID_FIELD || fields.iter().any(|f| f == k))
                .collect(),
        }
    }

    fn next_seq(conn: &Connection, collection: &str) -> RepositoryResult<i64> {
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM document WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(max + 1)
    }

    fn assign_id(doc: &mut Document) -> String {
        match doc.get(DOC_ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => {
                let id = Uuid::new_v4().simple().to_string();
                doc.insert(DOC_ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_or_create_collection(&self, proposed: &str) -> RepositoryResult<String> {
        let base = normalize_collection_name(proposed, self.name_max_len);
        if base.is_empty() {
            return Err(RepositoryError::ValidationError(format!(
                "集合名规范化后为空: {:?}",
                proposed
            )));
        }

        let conn = self.get_conn()?;
        let mut name = base.clone();
        let mut i = 1;
        while Self::collection_exists(&conn, &name)? {
            name = format!("{}_{}", base, i);
            i += 1;
        }

        conn.execute(
            "INSERT INTO document_collection (name) VALUES (?1)",
            params![name],
        )?;
        tracing::info!(collection = %name, proposed, "集合已登记");
        Ok(name)
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> RepositoryResult<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        Self::ensure_collection(&tx, collection)?;

        let mut seq = Self::next_seq(&tx, collection)?;
        let count = docs.len();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO document (collection, doc_id, seq, body) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for mut doc in docs {
                let id = Self::assign_id(&mut doc);
                let body = serde_json::to_string(&Value::Object(doc))?;
                stmt.execute(params![collection, id, seq, body])?;
                seq += 1;
            }
        }
        tx.commit()?;

        tracing::debug!(collection, rows = count, "批量写入完成");
        Ok(count)
    }

    async fn insert_one(&self, collection: &str, mut doc: Document) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::ensure_collection(&conn, collection)?;

        let id = Self::assign_id(&mut doc);
        let seq = Self::next_seq(&conn, collection)?;
        let body = serde_json::to_string(&Value::Object(doc))?;
        conn.execute(
            "INSERT INTO document (collection, doc_id, seq, body) VALUES (?1, ?2, ?3, ?4)",
            params![collection, id, seq, body],
        )?;
        Ok(id)
    }

    async fn find(&self, collection: &str, options: &FindOptions) -> RepositoryResult<Vec<Document>> {
        let conn = self.get_conn()?;
        Self::ensure_collection(&conn, collection)?;

        // LIMIT -1 表示不限
        let limit = options.limit.map(sql_count).unwrap_or(-1);
        let mut stmt = conn.prepare(
            "SELECT body FROM document WHERE collection = ?1 ORDER BY seq ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(
            params![collection, limit, sql_count(options.skip)],
            |row| row.get::<_, String>(0),
        )?;

        let mut docs = Vec::new();
        for raw in rows {
            let doc = Self::parse_body(&raw?)?;
            docs.push(Self::project(doc, &options.projection));
        }
        Ok(docs)
    }

    async fn find_one(&self, collection: &str, doc_id: &str) -> RepositoryResult<Option<Document>> {
        let conn = self.get_conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT body FROM document WHERE collection = ?1 AND doc_id = ?2",
                params![collection, doc_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| Self::parse_body(&r)).transpose()
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        doc_id: &str,
        set: Document,
    ) -> RepositoryResult<Option<Document>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT body FROM document WHERE collection = ?1 AND doc_id = ?2",
                params![collection, doc_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut doc = Self::parse_body(&raw)?;
        for (key, value) in set {
            if key == DOC_ID_FIELD {
                continue;
            }
            doc.insert(key, value);
        }

        tx.execute(
            "UPDATE document SET body = ?1 WHERE collection = ?2 AND doc_id = ?3",
            params![serde_json::to_string(&Value::Object(doc.clone()))?, collection, doc_id],
        )?;
        tx.commit()?;
        Ok(Some(doc))
    }

    async fn count_documents(&self, collection: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM document WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    async fn list_collection_names(&self) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT name FROM document_collection ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqliteDocumentStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_document_schema(&conn).unwrap();
        SqliteDocumentStore::from_connection(Arc::new(Mutex::new(conn)))
    }

    fn doc(v: Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_normalize_collection_name() {
        assert_eq!(normalize_collection_name("Sales Report", 22), "sales_report");
        assert_eq!(normalize_collection_name("$Price List$", 22), "price_list");
        assert_eq!(
            normalize_collection_name("A Very Long Dataset Name Indeed", 22),
            "a_very_long_dataset_na"
        );
    }

    #[tokio::test]
    async fn test_collection_suffix_on_collision() {
        let store = store();
        let first = store.get_or_create_collection("Sales Report").await.unwrap();
        let second = store.get_or_create_collection("Sales Report").await.unwrap();
        let third = store.get_or_create_collection("sales report").await.unwrap();
        assert_eq!(first, "sales_report");
        assert_eq!(second, "sales_report_1");
        assert_eq!(third, "sales_report_2");
        assert_eq!(store.list_collection_names().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_insert_find_and_projection() {
        let store = store();
        let c = store.get_or_create_collection("orders").await.unwrap();
        let n = store
            .insert_many(
                &c,
                vec![
                    doc(json!({"a": 1, "b": "x"})),
                    doc(json!({"a": 2, "b": "y"})),
                    doc(json!({"a": 3, "b": "z"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(store.count_documents(&c).await.unwrap(), 3);

        let page = store
            .find(
                &c,
                &FindOptions {
                    skip: 1,
                    limit: Some(1),
                    projection: Some(vec!["b".to_string()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["b"], json!("y"));
        assert!(page[0].contains_key(DOC_ID_FIELD));
        assert!(!page[0].contains_key("a"));
    }

    #[tokio::test]
    async fn test_find_one_and_update_sets_fields() {
        let store = store();
        let c = store.get_or_create_collection("rows").await.unwrap();
        let id = store.insert_one(&c, doc(json!({"qty": 1}))).await.unwrap();

        let updated = store
            .find_one_and_update(&c, &id, doc(json!({"qty": 5, "note": "ok", "_id": "hijack"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["qty"], json!(5));
        assert_eq!(updated[DOC_ID_FIELD], json!(id));

        let loaded = store.find_one(&c, &id).await.unwrap().unwrap();
        assert_eq!(loaded["note"], json!("ok"));
        assert!(store
            .find_one_and_update(&c, "missing", Document::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_insert_into_unknown_collection_fails() {
        let store = store();
        let err = store
            .insert_many("ghost", vec![doc(json!({"a": 1}))])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
