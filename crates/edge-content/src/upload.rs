//! Content-addressed artifact upload.
//!
//! Files are hashed first and looked up by SHA-256 in the target domain, so
//! identical content is uploaded at most once per domain. New content is
//! streamed as a multipart body through an in-memory pipe; the file is never
//! buffered whole.

use std::io::SeekFrom;
use std::path::Path;

use edge_jobs::Context;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, DuplexStream};
use tracing::{debug, info, instrument, warn};

use crate::api::{ArtifactUpload, ContentApi};
use crate::error::ContentError;
use crate::model::Artifact;
use crate::multipart::Envelope;
use crate::Result;

/// Read and pipe buffer size.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Form field carrying the file.
const FILE_FIELD: &str = "file";

/// SHA-256 (hex) and length of everything remaining in `file`; the file is
/// rewound afterwards.
pub async fn hash_file(file: &mut File) -> Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    file.seek(SeekFrom::Start(0)).await?;
    Ok((hex::encode(hasher.finalize()), size))
}

/// Upload `path` into `domain` unless an artifact with the same digest exists.
#[instrument(skip(ctx, api, path), fields(path = %path.display()))]
pub async fn upload_file(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    path: &Path,
) -> Result<Artifact> {
    let mut file = File::open(path).await?;
    let (sha256, size) = hash_file(&mut file).await?;

    if let Some(existing) = find_by_digest(ctx, api, domain, &sha256).await? {
        info!(sha256 = %sha256, href = %existing.pulp_href, "artifact already present");
        return Ok(existing);
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| sha256.clone());

    match stream_upload(ctx, api, domain, file, &filename, &sha256, size).await {
        Ok(artifact) => {
            info!(sha256 = %sha256, size, href = %artifact.pulp_href, "artifact uploaded");
            Ok(artifact)
        }
        Err(err) if err.is_already_exists() => {
            // Lost a race with a concurrent upload of the same content.
            debug!(sha256 = %sha256, "artifact appeared during upload, re-reading");
            find_by_digest(ctx, api, domain, &sha256)
                .await?
                .ok_or(ContentError::NotFound {
                    kind: "artifact",
                    key: sha256,
                })
        }
        Err(err) => Err(err),
    }
}

async fn find_by_digest(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    sha256: &str,
) -> Result<Option<Artifact>> {
    Ok(api
        .find_artifacts(ctx, domain, sha256)
        .await?
        .into_iter()
        .next())
}

async fn stream_upload(
    ctx: &Context,
    api: &dyn ContentApi,
    domain: &str,
    file: File,
    filename: &str,
    sha256: &str,
    size: u64,
) -> Result<Artifact> {
    let envelope = Envelope::new(FILE_FIELD, filename);
    let expected = envelope.content_length(size);
    let (reader, writer) = tokio::io::duplex(CHUNK_SIZE);

    let feeder = tokio::spawn(feed(writer, file, envelope.clone(), size));

    let upload = ArtifactUpload {
        sha256: sha256.to_string(),
        content_type: envelope.content_type(),
        content_length: expected,
        body: Box::pin(reader),
    };
    let sent = api.upload_artifact(ctx, domain, upload).await;

    let (written, fed) = match feeder.await {
        Ok(outcome) => outcome,
        Err(join) => (0, Err(std::io::Error::other(join.to_string()))),
    };

    match (sent, fed) {
        (Ok(artifact), Ok(())) => Ok(artifact),
        // The service answered; its verdict is more precise than a broken pipe.
        (
            Err(err @ (ContentError::Status { .. }
            | ContentError::AlreadyExists(_)
            | ContentError::Context(_))),
            _,
        ) => Err(err),
        (sent, fed) => {
            let mut parts = Vec::new();
            if let Err(err) = &sent {
                parts.push(format!("request: {err}"));
            }
            if let Err(err) = &fed {
                parts.push(format!("writer: {err}"));
            }
            warn!(written, expected, "artifact upload failed");
            Err(ContentError::Upload {
                written,
                expected,
                message: parts.join("; "),
            })
        }
    }
}

/// Write head, file bytes and tail into the pipe. Returns bytes written.
async fn feed(
    mut pipe: DuplexStream,
    mut file: File,
    envelope: Envelope,
    size: u64,
) -> (u64, std::io::Result<()>) {
    let mut written = 0u64;
    let result = async {
        let head = envelope.head();
        pipe.write_all(&head).await?;
        written += head.len() as u64;

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            pipe.write_all(&buf[..n]).await?;
            copied += n as u64;
            written += n as u64;
        }
        if copied != size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("file changed during upload: read {copied} of {size} bytes"),
            ));
        }

        let tail = envelope.tail();
        pipe.write_all(&tail).await?;
        written += tail.len() as u64;
        pipe.shutdown().await
    }
    .await;
    (written, result)
}
