//! Upload a single local file into a Swift container.
//!
//! Reads the same environment as the gateway (`SWIFT_*` or `OS_*` names)
//! plus `LOCAL_FILE_PATH`, `SWIFT_CONTAINER` and `SWIFT_OBJECT_NAME`;
//! command-line flags override them.

use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, sync::Arc, time::Duration};
use swift_gateway::{
    config::{self, StoreConfig},
    services::{
        swift::{SwiftConnection, build_http_client},
        upload_service::{UploadRequest, upload_file},
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload a local file to OpenStack Swift")]
struct Args {
    /// Local file to upload (overrides LOCAL_FILE_PATH)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Destination container (overrides SWIFT_CONTAINER)
    #[arg(long)]
    container: Option<String>,

    /// Destination object name (overrides SWIFT_OBJECT_NAME)
    #[arg(long)]
    object: Option<String>,

    /// Deadline in seconds for authentication and upload; none if unset
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Send the file's MD5 and verify the store's etag
    #[arg(long)]
    verify_checksum: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    swift_gateway::init_tracing();

    let args = Args::parse();
    config::load_dotenv();

    let mut store = StoreConfig::from_env();
    if let Some(file) = args.file {
        store.local_file_path = Some(file);
    }
    if let Some(container) = args.container {
        store.container = container;
    }
    if let Some(object) = args.object {
        store.object_name = Some(object);
    }

    let mut request = UploadRequest::from_config(&store)?;
    request.verify_checksum = args.verify_checksum;

    let store = Arc::new(store);
    let client = build_http_client(&store).context("building HTTP client")?;
    let mut conn = SwiftConnection::new(store, client);

    let report = upload_file(
        &mut conn,
        &request,
        args.timeout_secs.map(Duration::from_secs),
    )
    .await?;

    println!(
        "Successfully uploaded {} to Swift container {}",
        report.object, report.container
    );
    Ok(())
}
