//! Remote size aggregation.

use horizon_courier_core::CancellationToken;

use super::send_checked;
use crate::error::{NetworkError, Result};
use crate::transport::{HttpMethod, Transport, TransportRequest};

/// HEAD each URL in order and sum the declared `Content-Length` values.
///
/// All or nothing: the first failed request, missing header or overflow
/// fails the whole query, however many URLs already succeeded.
pub(crate) fn total(
    transport: &mut dyn Transport,
    urls: &[String],
    interrupt: &CancellationToken,
) -> Result<i64> {
    let mut total: i64 = 0;
    for url in urls {
        let response = send_checked(
            transport,
            TransportRequest::new(HttpMethod::Head, url.as_str()),
            interrupt,
        )?;
        let length = response
            .content_length()
            .ok_or_else(|| NetworkError::InvalidBody(format!("no Content-Length for {url}")))?;
        total = i64::try_from(length)
            .ok()
            .and_then(|length| total.checked_add(length))
            .ok_or_else(|| NetworkError::InvalidBody("size total overflows".to_string()))?;
    }
    Ok(total)
}
