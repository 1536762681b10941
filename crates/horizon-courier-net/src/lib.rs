//! Networking engine for Horizon Courier.
//!
//! This crate runs HTTP operations on a single background worker and hands
//! their results back to whichever thread the caller chooses:
//!
//! - **Serial execution**: operations run one at a time, in submission order
//! - **Callback dispatch**: listeners are posted to an [`ExecutionContext`]
//! - **Cancellation**: [`RestClient::cancel_all`] guarantees no stale listener runs
//! - **Session**: one cookie jar, connection pool and TLS trust per client
//!
//! # Operations
//!
//! | Method | Listener receives |
//! |--------|-------------------|
//! | [`RestClient::get_string`] | `Option<String>` |
//! | [`RestClient::get_json`] | `Option<serde_json::Value>` |
//! | [`RestClient::get_raw_data`] | `Option<Bytes>` |
//! | [`RestClient::get_file`] | `Option<PathBuf>` |
//! | [`RestClient::post_json`] | `Option<String>` |
//! | [`RestClient::post_multipart`] | `Option<String>` |
//! | [`RestClient::get_size`] | `i64`, or [`SIZE_ERROR`] |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use horizon_courier_core::ContextThread;
//! use horizon_courier_net::{MultipartInput, RestClient};
//!
//! let callbacks = Arc::new(ContextThread::spawn("callbacks")?);
//! let client = RestClient::builder()
//!     .timeout(Duration::from_secs(60))
//!     .build()?;
//!
//! client.get_file_with_progress(
//!     callbacks.clone(),
//!     "https://cdn.example.com/archive.zip",
//!     "/tmp/archive.zip",
//!     |progress| println!("{:?}", progress.fraction()),
//!     |path| println!("saved to {path:?}"),
//! );
//!
//! client.post_multipart_with_progress(
//!     callbacks.clone(),
//!     "https://api.example.com/upload",
//!     vec![MultipartInput::from_file("photo.jpg")?.mime_type("image/jpeg")],
//!     |sent| println!("{sent} bytes sent"),
//!     |reply| println!("server said {reply:?}"),
//! );
//!
//! // Abandon everything, e.g. when the view goes away.
//! client.cancel_all();
//! ```
//!
//! [`ExecutionContext`]: horizon_courier_core::ExecutionContext
//! [`Bytes`]: bytes::Bytes

pub mod client;
mod dispatch;
mod error;
mod exec;
pub mod operation;
pub mod session;
pub mod tls;
pub mod transport;
pub mod urls;
mod worker;

pub use error::{NetworkError, Result};

// Re-export commonly used types at the crate root
pub use client::{ClientConfig, ClientStatus, Credentials, RestClient, RestClientBuilder};
pub use dispatch::CancelSummary;
pub use operation::{DownloadProgress, MultipartInput, OperationId, OperationKind, SIZE_ERROR};
pub use session::{CookieJar, CookieSnapshot, Session};
pub use tls::{Certificate, TlsConfig, TlsVersion};
pub use transport::{
    BodyStream, BufferedBody, HttpMethod, HttpTransport, MultipartPart, RequestBody, Transport,
    TransportRequest, TransportResponse,
};
pub use urls::{encode_component, sanitize_url};
