use anyhow::Result;
use kiln_core::error::{ErrorKind, ObjectError};

mod common;
use common::*;

#[tokio::test]
async fn upload_download_replace() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let reports = client.bucket("reports");

    let url = reports.upload("2026/line-4/shift-a.csv", "ts,temp\n0,1450\n", "text/csv").await?;
    assert_eq!(url, format!("{}/storage/v1/object/reports/2026/line-4/shift-a.csv", server.url()));
    assert_eq!(reports.download("2026/line-4/shift-a.csv").await?, "ts,temp\n0,1450\n");

    // uploads replace what is there
    reports.upload("2026/line-4/shift-a.csv", b"ts,temp\n0,1462\n".to_vec(), "text/csv").await?;
    assert_eq!(reports.download("2026/line-4/shift-a.csv").await?, "ts,temp\n0,1462\n");
    Ok(())
}

#[tokio::test]
async fn missing_object_is_not_found() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;

    let err = client.bucket("reports").download("nowhere.csv").await.unwrap_err();
    assert!(matches!(err, ObjectError::NotFound(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn public_url_serves_without_credentials() -> Result<()> {
    let server = start_backend().await?;
    let client = client_for(&server)?;
    let photos = client.bucket("inspection-photos");

    photos.upload("/kiln-2/shell.jpg", vec![0xff, 0xd8, 0xff, 0xe0], "image/jpeg").await?;
    let url = photos.public_url("kiln-2/shell.jpg");
    assert_eq!(url, format!("{}/storage/v1/object/public/inspection-photos/kiln-2/shell.jpg", server.url()));

    let response = reqwest::get(&url).await?;
    assert_eq!(response.headers()[reqwest::header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(&response.bytes().await?[..], &[0xffu8, 0xd8, 0xff, 0xe0][..]);
    Ok(())
}
