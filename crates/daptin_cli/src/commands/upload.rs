//! Upload, resume, cancel and sessions command implementations.

use super::CommandResult;
use daptin_client::protocol::ProgressEvent;
use daptin_client::{DaptinClient, FileSource, UploadOptions, UploadSource};
use std::path::Path;
use std::sync::Arc;

fn progress_options() -> UploadOptions {
    UploadOptions::new().with_progress(|event: &ProgressEvent| {
        println!(
            "  {:>6.2}%  {}/{} bytes  ({})",
            event.percent, event.loaded, event.total, event.upload_id
        );
    })
}

/// Uploads a local file into an asset column.
pub async fn run(
    client: &DaptinClient,
    type_name: &str,
    resource_id: &str,
    column_name: &str,
    path: &Path,
    name: Option<&str>,
) -> CommandResult {
    let source: Arc<dyn UploadSource> = Arc::new(FileSource::open(path).await?);
    println!("Uploading {} ({} bytes)", path.display(), source.size());

    let session = client
        .assets()
        .upload_file(
            type_name,
            resource_id,
            column_name,
            source,
            name,
            &progress_options(),
        )
        .await?;

    println!(
        "Upload {} {} via {} ({} bytes)",
        session.upload_id, session.state, session.strategy, session.uploaded_bytes
    );
    if !session.parts.is_empty() {
        println!("  {} parts", session.parts.len());
    }
    Ok(())
}

/// Restarts a persisted resumable upload from a local file.
pub async fn resume(client: &DaptinClient, upload_id: &str, path: &Path) -> CommandResult {
    let source: Arc<dyn UploadSource> = Arc::new(FileSource::open(path).await?);
    let session = client
        .assets()
        .resume_upload(upload_id, source, &progress_options())
        .await?;
    println!(
        "Upload {} {} ({} bytes)",
        session.upload_id, session.state, session.uploaded_bytes
    );
    Ok(())
}

/// Forgets a persisted resumable upload.
pub async fn cancel(client: &DaptinClient, upload_id: &str) -> CommandResult {
    client.assets().cancel_upload(upload_id).await?;
    println!("Removed session {upload_id}");
    Ok(())
}

/// Lists persisted resumable uploads.
pub fn sessions(client: &DaptinClient) -> CommandResult {
    let pending = client.assets().pending_uploads()?;
    if pending.is_empty() {
        println!("No pending uploads");
        return Ok(());
    }
    for record in pending {
        println!(
            "{}  {}/{}/{}  {} ({} bytes, {})  created {}",
            record.upload_id,
            record.type_name,
            record.resource_id,
            record.column_name,
            record.file_name,
            record.file_size,
            record.file_type,
            record.created_at.to_rfc3339()
        );
    }
    Ok(())
}
