//! Per-kind executors run by the worker.
//!
//! Each executor performs the network exchange for one operation kind and
//! returns a typed `Result`. Executors do not log failures or touch
//! listeners; the worker turns their errors into the kind's failure value.

pub(crate) mod download;
pub(crate) mod fetch;
pub(crate) mod size;
pub(crate) mod submit;

use horizon_courier_core::CancellationToken;

use crate::error::{NetworkError, Result};
use crate::transport::{Transport, TransportRequest, TransportResponse};

/// Execute `request`, turning a non-2xx response into [`NetworkError::HttpStatus`].
///
/// The body of a rejected response is read as diagnostic text.
pub(crate) fn send_checked(
    transport: &mut dyn Transport,
    request: TransportRequest,
    interrupt: &CancellationToken,
) -> Result<TransportResponse> {
    let response = transport.execute(request, interrupt)?;
    if response.is_success() {
        return Ok(response);
    }
    let status = response.status();
    let message = response
        .text()
        .ok()
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    Err(NetworkError::HttpStatus { status, message })
}
