//! One-shot upload of a local file into a container.
//!
//! Linear: authenticate once, open the file, stream it up in a single PUT.
//! Every failure is returned to the caller; the binary decides whether that
//! ends the process.

use crate::{
    config::StoreConfig,
    services::store::{PutOptions, StoreConnection, StoreError, with_deadline},
};
use md5::Context;
use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::{fs::File, io::AsyncReadExt, time::Instant};
use tracing::{debug, info};

const HASH_CHUNK: usize = 64 * 1024;

/// What to upload and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    pub container: String,
    pub object: String,
    /// Send the file's MD5 so the store rejects a corrupted upload.
    pub verify_checksum: bool,
}

impl UploadRequest {
    /// Build a request from the store configuration's upload fields.
    pub fn from_config(config: &StoreConfig) -> Result<Self, UploadError> {
        let local_path = config
            .local_file_path
            .clone()
            .ok_or(UploadError::MissingSetting("LOCAL_FILE_PATH"))?;
        let object = config
            .object_name
            .clone()
            .ok_or(UploadError::MissingSetting("SWIFT_OBJECT_NAME"))?;

        Ok(Self {
            local_path,
            container: config.container.clone(),
            object,
            verify_checksum: false,
        })
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub container: String,
    pub object: String,
    pub bytes: u64,
    pub etag: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0} is not set")]
    MissingSetting(&'static str),
    #[error("Authentication failed: {0}")]
    Auth(#[source] StoreError),
    #[error("Failed to open local file {}: {source}", path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to upload file: {0}")]
    Upload(#[source] StoreError),
    #[error("checksum mismatch: local {local}, store {remote}")]
    ChecksumMismatch { local: String, remote: String },
}

/// Upload `request.local_path` through `conn`.
///
/// With a `timeout`, authentication and the upload share one deadline;
/// without one, both run until the store client gives up.
pub async fn upload_file<C: StoreConnection>(
    conn: &mut C,
    request: &UploadRequest,
    timeout: Option<Duration>,
) -> Result<UploadReport, UploadError> {
    let deadline = timeout.map(|budget| (Instant::now() + budget, budget));

    let auth = conn.authenticate();
    match deadline {
        Some((at, budget)) => with_deadline(at, budget, auth).await,
        None => auth.await,
    }
    .map_err(UploadError::Auth)?;

    let open_err = |source: io::Error| UploadError::OpenFile {
        path: request.local_path.clone(),
        source,
    };
    let checksum = if request.verify_checksum {
        Some(local_md5(&request.local_path).await.map_err(open_err)?)
    } else {
        None
    };
    let file = File::open(&request.local_path).await.map_err(open_err)?;
    let bytes = file.metadata().await.map_err(open_err)?.len();
    debug!(
        "uploading {} ({} bytes) to {}/{}",
        request.local_path.display(),
        bytes,
        request.container,
        request.object
    );

    let options = PutOptions {
        content_length: Some(bytes),
        etag: checksum.clone(),
        content_type: None,
    };
    let put = conn.object_put(&request.container, &request.object, Box::new(file), options);
    let etag = match deadline {
        Some((at, budget)) => with_deadline(at, budget, put).await,
        None => put.await,
    }
    .map_err(UploadError::Upload)?;

    if let Some(local) = checksum {
        if !etag.is_empty() && !etag.eq_ignore_ascii_case(&local) {
            return Err(UploadError::ChecksumMismatch {
                local,
                remote: etag,
            });
        }
    }

    info!("uploaded {}/{} ({} bytes)", request.container, request.object, bytes);
    Ok(UploadReport {
        container: request.container.clone(),
        object: request.object.clone(),
        bytes,
        etag,
    })
}

/// Hex MD5 of a local file, read in chunks.
pub async fn local_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut digest = Context::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digest.consume(&buf[..n]);
    }
    Ok(format!("{:x}", digest.compute()))
}
