//! Tests for table upload, queries and table management actions.

mod common;

use std::fs::File;

use arrow::datatypes::DataType;
use arrow::ipc::writer::FileWriter;
use futures::StreamExt;

use flight_core::FlightError;

#[tokio::test]
async fn test_upload_then_describe_users() {
    let harness = common::start().await;
    let (schema, batch) = common::users();
    harness
        .client
        .upload_table("users", schema.clone(), vec![batch])
        .await
        .unwrap();

    let tables = harness.client.list_tables().await.unwrap();
    assert!(tables.contains(&"users".to_string()));
    // The temporary view used during upload is gone.
    assert_eq!(tables.len(), 1);

    let columns = harness.client.table_info("users").await.unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[0].name, "id");
    assert_eq!(columns[0].data_type, DataType::Int64);
    assert_eq!(columns[1].name, "name");
    assert_eq!(columns[1].data_type, DataType::Utf8);

    assert_eq!(harness.client.get_table_schema("users").await.unwrap(), schema);
}

#[tokio::test]
async fn test_query_round_trip() {
    let harness = common::start().await;
    let (schema, batch) = common::users();
    harness
        .client
        .upload_table("users", schema, vec![batch.clone()])
        .await
        .unwrap();

    let info = harness.client.get_flight_info("SELECT * FROM users").await.unwrap();
    assert_eq!(info.total_records, 3);
    assert_eq!(info.schema, batch.schema());

    let batches = harness.client.execute_query("SELECT * FROM users").await.unwrap();
    assert_eq!(batches, vec![batch]);
}

#[tokio::test]
async fn test_reader_exposes_schema_for_queries() {
    let harness = common::start().await;
    let (schema, batch) = common::users();
    harness
        .client
        .upload_table("users", schema.clone(), vec![batch])
        .await
        .unwrap();

    let mut reader = harness
        .client
        .run_query_for_batches("SELECT * FROM users")
        .await
        .unwrap();
    assert_eq!(reader.schema(), schema);
    assert_eq!(reader.next().await.unwrap().unwrap().num_rows(), 3);
    assert!(reader.next().await.is_none());
}

#[tokio::test]
async fn test_upload_replaces_existing_table() {
    let harness = common::start().await;
    harness
        .client
        .upload_table("numbers", common::numbers_schema(), common::numbers(2, 5))
        .await
        .unwrap();
    harness
        .client
        .upload_table("numbers", common::numbers_schema(), common::numbers(1, 3))
        .await
        .unwrap();

    let info = harness.client.get_flight_info("SELECT * FROM numbers").await.unwrap();
    assert_eq!(info.total_records, 3);
}

#[tokio::test]
async fn test_query_errors_carry_context() {
    let harness = common::start().await;
    let err = harness
        .client
        .execute_query("SELECT * FROM missing")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "error executing query: Table not found: missing"
    );
    assert!(matches!(err, FlightError::Upstream { .. }));
}

#[tokio::test]
async fn test_invalid_table_name_is_rejected() {
    let harness = common::start().await;
    let err = harness
        .client
        .upload_table("users; --", common::numbers_schema(), common::numbers(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, FlightError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_drop_table_and_view() {
    let harness = common::start().await;
    let (schema, batch) = common::users();
    harness
        .client
        .upload_table("users", schema, vec![batch])
        .await
        .unwrap();

    let err = harness.client.drop_view("users").await.unwrap_err();
    assert!(matches!(err, FlightError::Upstream { .. }));

    assert_eq!(
        harness.client.drop_table("users").await.unwrap(),
        "dropped table users"
    );
    assert!(harness.client.list_tables().await.unwrap().is_empty());

    let err = harness.client.table_info("users").await.unwrap_err();
    assert!(err.to_string().starts_with("error describing table"));
}

#[tokio::test]
async fn test_read_external_files() {
    let harness = common::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("users.arrow");
    let (schema, batch) = common::users();
    {
        let mut writer = FileWriter::try_new(File::create(&path).unwrap(), &schema).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }

    let ack = harness
        .client
        .read_parquet(&[path.display().to_string()], "imported")
        .await
        .unwrap();
    assert_eq!(ack, "read parquet file imported");

    let batches = harness.client.execute_query("SELECT * FROM imported").await.unwrap();
    assert_eq!(batches, vec![batch]);
}

#[tokio::test]
async fn test_read_missing_file_is_upstream_error() {
    let harness = common::start().await;
    let err = harness
        .client
        .read_parquet(&["/nonexistent/file.arrow".to_string()], "t")
        .await
        .unwrap_err();
    assert!(matches!(err, FlightError::Upstream { .. }));
}
