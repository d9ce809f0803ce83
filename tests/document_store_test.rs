// ==========================================
// SqliteDocumentStore 集成测试
// ==========================================
// 测试目标: 集合命名、精确小数、文件库重开后数据可见
// ==========================================

mod test_helpers;

use fdw_warehouse::domain::CellValue;
use fdw_warehouse::repository::{DocumentStore, FindOptions, SqliteDocumentStore};
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use tempfile::TempDir;
use test_helpers::create_document_db;

#[tokio::test]
async fn test_collection_names_are_unique_and_normalized() {
    let dir = TempDir::new().unwrap();
    let store = SqliteDocumentStore::from_connection(create_document_db(dir.path()));

    let first = store.get_or_create_collection("Sales Report").await.unwrap();
    let second = store.get_or_create_collection("Sales Report").await.unwrap();
    assert_eq!(first, "sales_report");
    assert_eq!(second, "sales_report_1");

    let long = store
        .get_or_create_collection("Quarterly $Revenue Breakdown 2024")
        .await
        .unwrap();
    assert_eq!(long.chars().count(), 22);
    assert!(!long.contains('$'));
}

#[tokio::test]
async fn test_decimal_round_trip_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.db");

    {
        let store = SqliteDocumentStore::from_connection(create_document_db(dir.path()));
        let collection = store.get_or_create_collection("prices").await.unwrap();
        let mut doc = fdw_warehouse::Document::new();
        doc.insert(
            "price".into(),
            CellValue::Decimal(Decimal::from_str("19.99").unwrap()).to_document_value(),
        );
        doc.insert("sku".into(), json!("A-1"));
        store.insert_many(&collection, vec![doc]).await.unwrap();
    }

    let store = SqliteDocumentStore::new(path.to_str().unwrap()).unwrap();
    let docs = store
        .find("prices", &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(
        CellValue::from_document_value(&docs[0]["price"]),
        CellValue::Decimal(Decimal::from_str("19.99").unwrap())
    );
    assert_eq!(
        CellValue::from_document_value(&docs[0]["price"]).to_export_string(),
        "19.99"
    );
}
