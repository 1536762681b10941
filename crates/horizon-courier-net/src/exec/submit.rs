//! POST executors: JSON documents and multipart uploads.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use horizon_courier_core::CancellationToken;
use horizon_courier_core::logging::targets;
use tracing::debug;

use crate::error::{NetworkError, Result};
use crate::operation::MultipartInput;
use crate::transport::{
    HttpMethod, MultipartPart, RequestBody, Transport, TransportRequest,
};

/// Prefix of generated multipart field names; the part index is appended.
pub(crate) const PART_NAME_PREFIX: &str = "courier-part-";

/// POST a serialized JSON document.
///
/// The response body is always read and logged; it is returned only when the
/// status is 2xx.
pub(crate) fn post_json(
    transport: &mut dyn Transport,
    url: &str,
    payload: Bytes,
    interrupt: &CancellationToken,
) -> Result<String> {
    let request = TransportRequest::new(HttpMethod::Post, url)
        .header(http::header::ACCEPT, "application/json")
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(RequestBody::Json(payload));
    let response = transport.execute(request, interrupt)?;
    let status = response.status();
    let success = response.is_success();
    let body = response.text()?;
    debug!(target: targets::WORKER, status, body = %body, "post_json response");

    if success {
        Ok(body)
    } else {
        Err(NetworkError::HttpStatus {
            status,
            message: Some(body).filter(|b| !b.trim().is_empty()),
        })
    }
}

/// POST every input as one part of a `multipart/form-data` body.
///
/// `report` receives the number of bytes read from all parts so far, after
/// every read that produced data.
pub(crate) fn post_multipart(
    transport: &mut dyn Transport,
    url: &str,
    inputs: Vec<MultipartInput>,
    report: Arc<dyn Fn(u64) + Send + Sync>,
    interrupt: &CancellationToken,
) -> Result<String> {
    let sent = Arc::new(AtomicU64::new(0));
    let parts = inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| MultipartPart {
            name: format!("{PART_NAME_PREFIX}{index}"),
            file_name: input.file_name,
            mime_type: input.mime_type,
            reader: Box::new(CountingReader {
                inner: input.reader,
                sent: sent.clone(),
                report: report.clone(),
            }),
        })
        .collect();

    let request = TransportRequest::new(HttpMethod::Post, url).body(RequestBody::Multipart(parts));
    let response = super::send_checked(transport, request, interrupt)?;
    let body = response.text()?;
    debug!(
        target: targets::WORKER,
        bytes_sent = sent.load(Ordering::Acquire),
        "post_multipart complete"
    );
    Ok(body)
}

/// Counts bytes as the transport pulls them and reports the running total
/// across every part of the upload.
struct CountingReader {
    inner: Box<dyn Read + Send>,
    sent: Arc<AtomicU64>,
    report: Arc<dyn Fn(u64) + Send + Sync>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            let total = self.sent.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
            (self.report)(total);
        }
        Ok(n)
    }
}
