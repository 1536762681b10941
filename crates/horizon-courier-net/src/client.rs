//! The client facade.
//!
//! [`RestClient`] owns the operation queue, the worker thread and the
//! session. Every enqueue method returns immediately; the listener runs
//! later on the execution context passed with the call.
//!
//! ```ignore
//! use std::sync::Arc;
//! use horizon_courier_core::InvocationQueue;
//! use horizon_courier_net::RestClient;
//!
//! let ui = Arc::new(InvocationQueue::new());
//! let client = RestClient::builder()
//!     .user_agent("Catalog/2.1")
//!     .build()?;
//!
//! client.get_json(ui.clone(), "https://api.example.com/items", |items| {
//!     match items {
//!         Some(items) => println!("{} items", items.as_array().map_or(0, Vec::len)),
//!         None => println!("request failed"),
//!     }
//! });
//!
//! // Later, from the UI loop:
//! ui.run_pending();
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use horizon_courier_core::logging::targets;
use horizon_courier_core::{DispatchTag, ExecutionContext};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::dispatch::{CancelSummary, Dispatcher};
use crate::error::{NetworkError, Result};
use crate::exec::download::DownloadPolicy;
use crate::operation::{DownloadProgress, MultipartInput, OperationId, Request};
use crate::session::{CookieJar, CookieSnapshot, Session};
use crate::tls::{Certificate, TlsConfig, TlsVersion};
use crate::transport::{HttpTransport, Transport};
use crate::urls::sanitize_url;
use crate::worker::{self, WorkerSettings};

/// Outcome of the most recently completed operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientStatus {
    /// The last operation produced a result.
    #[default]
    Ok,
    /// The last operation failed.
    Error,
}

impl ClientStatus {
    /// Whether this is [`ClientStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// HTTP basic authentication credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password (optional).
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Configuration for the client, its worker and its session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Name of the worker thread.
    pub thread_name: String,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Maximum wait for each read from the socket.
    pub read_timeout: Option<Duration>,
    /// Timeout for a whole request, body included.
    pub timeout: Option<Duration>,
    /// User agent sent with every request.
    pub user_agent: Option<String>,
    /// Proxy URL.
    pub proxy: Option<String>,
    /// Basic authentication applied to every request.
    pub credentials: Option<Credentials>,
    /// TLS trust configuration.
    pub tls: TlsConfig,
    /// Bytes written to disk between download progress reports.
    pub download_chunk_size: usize,
    /// Bytes read from an upload source at a time.
    pub upload_chunk_size: usize,
    /// Retries of a download that timed out.
    pub max_download_retries: u32,
    /// Drop pooled connections after every operation.
    pub release_idle_connections: bool,
    /// Strip spaces and doubled slashes from enqueued URLs (size probes excepted).
    pub sanitize_urls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            thread_name: "horizon-courier-worker".to_string(),
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(10)),
            timeout: None,
            user_agent: Some(format!(
                "HorizonCourier/{} (Rust)",
                env!("CARGO_PKG_VERSION")
            )),
            proxy: None,
            credentials: None,
            tls: TlsConfig::default(),
            download_chunk_size: 8192,
            upload_chunk_size: 8192,
            max_download_retries: 3,
            release_idle_connections: false,
            sanitize_urls: true,
        }
    }
}

/// Builder for creating a [`RestClient`] with custom configuration.
#[derive(Debug, Default)]
pub struct RestClientBuilder {
    config: ClientConfig,
}

impl RestClientBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the worker thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the per-read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Set a timeout for whole requests.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Set a proxy URL.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.config.proxy = Some(proxy_url.into());
        self
    }

    /// Authenticate every request with HTTP basic auth.
    pub fn basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.config.credentials = Some(Credentials {
            username: username.into(),
            password,
        });
        self
    }

    /// Add a custom root certificate to trust.
    pub fn add_root_certificate(mut self, cert: Certificate) -> Self {
        self.config.tls.root_certificates.push(cert);
        self
    }

    /// Use only the provided root certificates, ignoring system certificates.
    pub fn tls_certs_only(mut self) -> Self {
        self.config.tls.use_only_custom_roots = true;
        self
    }

    /// Set the minimum TLS version.
    pub fn min_tls_version(mut self, version: TlsVersion) -> Self {
        self.config.tls.min_version = version;
        self
    }

    /// Set the complete TLS configuration.
    pub fn tls_config(mut self, config: TlsConfig) -> Self {
        self.config.tls = config;
        self
    }

    /// Accept invalid TLS certificates.
    ///
    /// # Warning
    ///
    /// This is insecure and should only be used for testing.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.config.tls.danger_accept_invalid_certs = true;
        self
    }

    /// Set how many bytes are written between download progress reports.
    pub fn download_chunk_size(mut self, bytes: usize) -> Self {
        self.config.download_chunk_size = bytes.max(1);
        self
    }

    /// Set how many bytes are read from an upload source at a time.
    pub fn upload_chunk_size(mut self, bytes: usize) -> Self {
        self.config.upload_chunk_size = bytes.max(1);
        self
    }

    /// Set how many times a timed-out download is retried.
    pub fn max_download_retries(mut self, retries: u32) -> Self {
        self.config.max_download_retries = retries;
        self
    }

    /// Drop pooled connections after every operation.
    pub fn release_idle_connections(mut self, enabled: bool) -> Self {
        self.config.release_idle_connections = enabled;
        self
    }

    /// Enable or disable URL clean-up at enqueue time.
    pub fn sanitize_urls(mut self, enabled: bool) -> Self {
        self.config.sanitize_urls = enabled;
        self
    }

    /// Build the client on the reqwest transport and start its worker.
    pub fn build(self) -> Result<RestClient> {
        self.build_with(HttpTransport::new)
    }

    /// Build the client on a ready-made transport.
    ///
    /// The transport does not see the client's cookie jar; use
    /// [`build_with`](Self::build_with) if it needs to.
    pub fn build_with_transport<T: Transport>(self, transport: T) -> Result<RestClient> {
        self.build_with(move |_, _| Ok(transport))
    }

    /// Build the client on a transport created from the configuration and
    /// the session's cookie jar.
    pub fn build_with<T, F>(self, make_transport: F) -> Result<RestClient>
    where
        T: Transport,
        F: FnOnce(&ClientConfig, Arc<CookieJar>) -> Result<T>,
    {
        let config = self.config;
        let cookies = Arc::new(CookieJar::new());
        let transport = make_transport(&config, cookies.clone())?;
        let session = Session::new(Box::new(transport), cookies.clone());
        let dispatcher = Arc::new(Dispatcher::new());

        let settings = WorkerSettings {
            thread_name: config.thread_name.clone(),
            download: DownloadPolicy {
                chunk_size: config.download_chunk_size.max(1),
                max_retries: config.max_download_retries,
            },
            release_idle_connections: config.release_idle_connections,
        };
        let handle = worker::spawn(settings, session, dispatcher.clone())?;

        info!(
            target: targets::CLIENT,
            thread = %config.thread_name,
            tag = dispatcher.tag().as_u64(),
            "client started"
        );

        Ok(RestClient {
            config,
            dispatcher,
            cookies,
            handle: Mutex::new(Some(handle)),
        })
    }
}

/// Asynchronous HTTP client executing operations serially on one worker.
///
/// All methods can be called from any thread. Operations run strictly in the
/// order they were enqueued, one at a time. Listeners never run on the
/// worker; they are posted to the execution context given with each call.
///
/// Dropping the client requests a [`quit`](Self::quit) without waiting for
/// the worker.
pub struct RestClient {
    config: ClientConfig,
    dispatcher: Arc<Dispatcher>,
    cookies: Arc<CookieJar>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RestClient {
    /// Create a client with default configuration.
    pub fn new() -> Result<Self> {
        RestClientBuilder::new().build()
    }

    /// Create a builder for configuring a new client.
    pub fn builder() -> RestClientBuilder {
        RestClientBuilder::new()
    }

    /// Get the client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The tag attached to every invocation this client posts.
    pub fn dispatch_tag(&self) -> DispatchTag {
        self.dispatcher.tag()
    }

    fn prepare_url(&self, url: &str) -> String {
        if self.config.sanitize_urls {
            sanitize_url(url)
        } else {
            url.to_string()
        }
    }

    /// GET `url` as text.
    pub fn get_string(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        on_complete: impl FnOnce(Option<String>) + Send + 'static,
    ) -> Option<OperationId> {
        let request = Request::GetString {
            url: self.prepare_url(url),
            on_complete: Box::new(on_complete),
        };
        self.dispatcher.submit(context, request)
    }

    /// GET `url` and parse the body as JSON.
    pub fn get_json(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        on_complete: impl FnOnce(Option<serde_json::Value>) + Send + 'static,
    ) -> Option<OperationId> {
        let request = Request::GetJson {
            url: self.prepare_url(url),
            on_complete: Box::new(on_complete),
        };
        self.dispatcher.submit(context, request)
    }

    /// GET `url` as raw bytes.
    pub fn get_raw_data(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        on_complete: impl FnOnce(Option<Bytes>) + Send + 'static,
    ) -> Option<OperationId> {
        let request = Request::GetRawData {
            url: self.prepare_url(url),
            on_complete: Box::new(on_complete),
        };
        self.dispatcher.submit(context, request)
    }

    /// Download `url` into `destination`.
    ///
    /// Missing parent directories are created. On failure the destination
    /// is removed and the listener receives `None`. If the filesystem
    /// refuses the delete, the partial file stays on disk and a warning is
    /// logged.
    pub fn get_file(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        destination: impl Into<PathBuf>,
        on_complete: impl FnOnce(Option<PathBuf>) + Send + 'static,
    ) -> Option<OperationId> {
        self.submit_download(context, url, destination.into(), None, Box::new(on_complete))
    }

    /// Download `url` into `destination`, reporting progress after every chunk.
    pub fn get_file_with_progress(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        destination: impl Into<PathBuf>,
        on_progress: impl Fn(DownloadProgress) + Send + Sync + 'static,
        on_complete: impl FnOnce(Option<PathBuf>) + Send + 'static,
    ) -> Option<OperationId> {
        self.submit_download(
            context,
            url,
            destination.into(),
            Some(Arc::new(on_progress)),
            Box::new(on_complete),
        )
    }

    fn submit_download(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        destination: PathBuf,
        on_progress: Option<crate::operation::DownloadProgressListener>,
        on_complete: crate::operation::FileListener,
    ) -> Option<OperationId> {
        let request = Request::GetFile {
            url: self.prepare_url(url),
            destination,
            on_progress,
            on_complete,
        };
        self.dispatcher.submit(context, request)
    }

    /// POST `payload` as JSON.
    ///
    /// The listener receives the response body on a 2xx status and `None`
    /// otherwise. A payload that fails to serialize resolves to `None`.
    pub fn post_json<P: Serialize + ?Sized>(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        payload: &P,
        on_complete: impl FnOnce(Option<String>) + Send + 'static,
    ) -> Option<OperationId> {
        let payload = serde_json::to_vec(payload)
            .map(Bytes::from)
            .map_err(NetworkError::from);
        let request = Request::PostJson {
            url: self.prepare_url(url),
            payload,
            on_complete: Box::new(on_complete),
        };
        self.dispatcher.submit(context, request)
    }

    /// POST the inputs as a `multipart/form-data` body, one part each.
    pub fn post_multipart(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        parts: Vec<MultipartInput>,
        on_complete: impl FnOnce(Option<String>) + Send + 'static,
    ) -> Option<OperationId> {
        let request = Request::PostMultipart {
            url: self.prepare_url(url),
            parts,
            on_progress: None,
            on_complete: Box::new(on_complete),
        };
        self.dispatcher.submit(context, request)
    }

    /// POST the inputs as `multipart/form-data`, reporting progress.
    ///
    /// `on_progress` receives the number of bytes read from all parts so
    /// far. The count never decreases and ends at the combined size of the
    /// inputs.
    pub fn post_multipart_with_progress(
        &self,
        context: Arc<dyn ExecutionContext>,
        url: &str,
        parts: Vec<MultipartInput>,
        on_progress: impl Fn(u64) + Send + Sync + 'static,
        on_complete: impl FnOnce(Option<String>) + Send + 'static,
    ) -> Option<OperationId> {
        let request = Request::PostMultipart {
            url: self.prepare_url(url),
            parts,
            on_progress: Some(Arc::new(on_progress)),
            on_complete: Box::new(on_complete),
        };
        self.dispatcher.submit(context, request)
    }

    /// Sum the `Content-Length` of every URL via HEAD requests.
    ///
    /// The listener receives [`SIZE_ERROR`](crate::SIZE_ERROR) if any single
    /// request fails. These URLs are sent as given, without
    /// [`sanitize_url`].
    pub fn get_size<I, S>(
        &self,
        context: Arc<dyn ExecutionContext>,
        urls: I,
        on_complete: impl FnOnce(i64) + Send + 'static,
    ) -> Option<OperationId>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let request = Request::GetSize {
            urls: urls
                .into_iter()
                .map(|url| url.as_ref().to_string())
                .collect(),
            on_complete: Box::new(on_complete),
        };
        self.dispatcher.submit(context, request)
    }

    /// Cancel every queued operation and detach the running one.
    ///
    /// When this returns, no listener of any operation enqueued before the
    /// call will run, including invocations already posted to a context.
    /// The running request is interrupted asynchronously.
    pub fn cancel_all(&self) -> CancelSummary {
        self.dispatcher.cancel_all()
    }

    /// Outcome of the most recently completed operation.
    pub fn status(&self) -> ClientStatus {
        self.dispatcher.status()
    }

    /// Number of operations waiting to start.
    pub fn pending_operations(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Snapshot of the session's cookies.
    pub fn cookies(&self) -> Vec<CookieSnapshot> {
        self.cookies.snapshot()
    }

    /// Add a cookie for `domain` with path `/`.
    pub fn set_cookie(&self, domain: &str, name: &str, value: &str) -> bool {
        self.cookies.set_cookie(domain, name, value)
    }

    /// Forget every session cookie.
    pub fn reset_session(&self) {
        self.cookies.clear();
        debug!(target: targets::CLIENT, "session cookies reset");
    }

    /// Stop the worker after every operation already enqueued has run.
    ///
    /// Operations enqueued afterwards are refused. Returns `false` if quit
    /// was already requested.
    pub fn quit(&self) -> bool {
        self.dispatcher.request_quit()
    }

    /// Wait for the worker thread to finish.
    ///
    /// Call [`quit`](Self::quit) first. Returns `false` if already joined or
    /// the worker panicked.
    pub fn join(&self) -> bool {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle.join().is_ok(),
            None => false,
        }
    }

    /// Request quit and wait for the worker.
    pub fn quit_and_join(&self) -> bool {
        self.quit();
        self.join()
    }
}

impl Drop for RestClient {
    fn drop(&mut self) {
        self.dispatcher.request_quit();
        // Don't block in drop - just request shutdown
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("config", &self.config)
            .field("pending", &self.pending_operations())
            .field("status", &self.status())
            .finish()
    }
}

static_assertions::assert_impl_all!(RestClient: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.read_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.download_chunk_size, 8192);
        assert_eq!(config.max_download_retries, 3);
        assert!(config.sanitize_urls);
        assert!(config.user_agent.unwrap().starts_with("HorizonCourier/"));
    }

    #[test]
    fn test_builder_setters() {
        let builder = RestClient::builder()
            .thread_name("catalog-sync")
            .basic_auth("ada", Some("secret".to_string()))
            .download_chunk_size(0)
            .max_download_retries(5)
            .release_idle_connections(true)
            .sanitize_urls(false);
        let config = builder.config;
        assert_eq!(config.thread_name, "catalog-sync");
        assert_eq!(config.download_chunk_size, 1);
        assert_eq!(config.max_download_retries, 5);
        assert!(config.release_idle_connections);
        assert!(!config.sanitize_urls);
        assert_eq!(config.credentials.unwrap().username, "ada");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            username: "ada".to_string(),
            password: Some("hunter2".to_string()),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_status_helpers() {
        assert!(ClientStatus::default().is_ok());
        assert!(!ClientStatus::Error.is_ok());
    }
}
