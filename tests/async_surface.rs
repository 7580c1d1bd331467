//! Blocking-pool wrappers (requires the `async` feature)

#![cfg(feature = "async")]

mod common;

use apkg_rs::{export_collection_async, parse_archive_async, ExportOptions, PackageVersion};

#[tokio::test]
async fn test_parse_and_export_off_thread() {
    let bytes = common::fixture_package(PackageVersion::Latest);
    let col = parse_archive_async(bytes).await.unwrap();
    let notes = col.notes().len();

    let (col, out) = export_collection_async(col, ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(col.notes().len(), notes);

    let again = parse_archive_async(out).await.unwrap();
    assert_eq!(again.notes(), col.notes());
}

#[tokio::test]
async fn test_async_parse_error() {
    assert!(parse_archive_async(b"nope".to_vec()).await.is_err());
}
