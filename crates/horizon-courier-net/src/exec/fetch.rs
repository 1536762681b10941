//! Buffered GET executors.

use bytes::Bytes;
use horizon_courier_core::CancellationToken;
use horizon_courier_core::logging::targets;
use tracing::trace;

use super::send_checked;
use crate::error::Result;
use crate::transport::{HttpMethod, Transport, TransportRequest};

pub(crate) fn text(
    transport: &mut dyn Transport,
    url: &str,
    interrupt: &CancellationToken,
) -> Result<String> {
    let text =
        send_checked(transport, TransportRequest::new(HttpMethod::Get, url), interrupt)?.text()?;
    trace!(target: targets::WORKER, body = %text, "response body");
    Ok(text)
}

pub(crate) fn json(
    transport: &mut dyn Transport,
    url: &str,
    interrupt: &CancellationToken,
) -> Result<serde_json::Value> {
    let request = TransportRequest::new(HttpMethod::Get, url)
        .header(http::header::ACCEPT, "application/json");
    let value = send_checked(transport, request, interrupt)?.json()?;
    trace!(target: targets::WORKER, body = %value, "response body");
    Ok(value)
}

pub(crate) fn raw(
    transport: &mut dyn Transport,
    url: &str,
    interrupt: &CancellationToken,
) -> Result<Bytes> {
    let bytes =
        send_checked(transport, TransportRequest::new(HttpMethod::Get, url), interrupt)?.bytes()?;
    trace!(target: targets::WORKER, len = bytes.len(), "response body");
    Ok(bytes)
}
