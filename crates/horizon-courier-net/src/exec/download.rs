//! Streaming file download with bounded retry.
//!
//! The destination is only ever left on disk when the download succeeded.
//! A timeout (on connect, on the response head or between body chunks)
//! restarts the whole request from an empty file, up to
//! [`DownloadPolicy::max_retries`] times. Any other failure, exhaustion of
//! the retries, or cancellation removes whatever was written.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use horizon_courier_core::CancellationToken;
use horizon_courier_core::logging::targets;
use tracing::{debug, warn};

use super::send_checked;
use crate::error::{NetworkError, Result};
use crate::operation::DownloadProgress;
use crate::transport::{HttpMethod, Transport, TransportRequest};

/// Chunking and retry settings for downloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DownloadPolicy {
    /// Bytes written per progress report.
    pub(crate) chunk_size: usize,
    /// Retries after the first attempt when it times out.
    pub(crate) max_retries: u32,
}

pub(crate) fn download(
    transport: &mut dyn Transport,
    url: &str,
    destination: &Path,
    policy: DownloadPolicy,
    report: &dyn Fn(DownloadProgress),
    interrupt: &CancellationToken,
) -> Result<PathBuf> {
    let outcome = prepare_parent(destination).and_then(|()| {
        let mut retries = 0;
        loop {
            match attempt(transport, url, destination, policy, report, interrupt) {
                Err(err) if err.is_timeout() && retries < policy.max_retries => {
                    retries += 1;
                    warn!(
                        target: targets::WORKER,
                        url,
                        retry = retries,
                        max_retries = policy.max_retries,
                        "download timed out, retrying"
                    );
                }
                outcome => break outcome,
            }
        }
    });

    match outcome {
        Ok(()) => Ok(destination.to_path_buf()),
        Err(err) => {
            discard_partial(destination);
            Err(err)
        }
    }
}

fn prepare_parent(destination: &Path) -> Result<()> {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(NetworkError::from)
        }
        _ => Ok(()),
    }
}

fn attempt(
    transport: &mut dyn Transport,
    url: &str,
    destination: &Path,
    policy: DownloadPolicy,
    report: &dyn Fn(DownloadProgress),
    interrupt: &CancellationToken,
) -> Result<()> {
    let mut response = send_checked(
        transport,
        TransportRequest::new(HttpMethod::Get, url),
        interrupt,
    )?;
    let expected_bytes = response.content_length();
    let mut file = BufWriter::new(File::create(destination)?);
    let mut total_bytes = 0u64;
    let chunk_size = policy.chunk_size.max(1);

    while let Some(chunk) = response.next_chunk()? {
        for piece in chunk.chunks(chunk_size) {
            file.write_all(piece)?;
            total_bytes += piece.len() as u64;
            report(DownloadProgress {
                chunk_bytes: piece.len() as u64,
                total_bytes,
                expected_bytes,
            });
        }
        if interrupt.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }
    }

    if let Some(expected) = expected_bytes
        && total_bytes < expected
    {
        return Err(NetworkError::InvalidBody(format!(
            "body ended after {total_bytes} of {expected} bytes"
        )));
    }

    file.into_inner()
        .map_err(|e| NetworkError::from(e.into_error()))?
        .sync_all()?;
    debug!(target: targets::WORKER, url, bytes = total_bytes, "download complete");
    Ok(())
}

fn discard_partial(destination: &Path) {
    match fs::remove_file(destination) {
        Ok(()) => debug!(
            target: targets::WORKER,
            path = %destination.display(),
            "removed partial download"
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            target: targets::WORKER,
            path = %destination.display(),
            error = %err,
            "failed to remove partial download"
        ),
    }
}
