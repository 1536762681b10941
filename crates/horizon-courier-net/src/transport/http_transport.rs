//! reqwest-backed transport.

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use horizon_courier_core::CancellationToken;
use horizon_courier_core::logging::{span_names, targets};
use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tracing::{debug, trace, warn};

use super::{
    BodyStream, MultipartPart, RequestBody, Transport, TransportRequest, TransportResponse,
};
use crate::client::{ClientConfig, Credentials};
use crate::error::{NetworkError, Result};
use crate::session::CookieJar;

/// Transport that drives a reqwest client on a private single-threaded runtime.
///
/// The runtime is only ever entered from the worker thread through
/// `block_on`, so every request, body read and multipart upload is executed
/// inline on that thread. Cookies go through the session's shared
/// [`CookieJar`].
pub struct HttpTransport {
    runtime: Arc<Runtime>,
    client: reqwest::Client,
    config: ClientConfig,
    cookies: Arc<CookieJar>,
}

impl HttpTransport {
    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig, cookies: Arc<CookieJar>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NetworkError::Worker(format!("failed to create runtime: {e}")))?;
        let client = build_client(config, &cookies)?;

        Ok(Self {
            runtime: Arc::new(runtime),
            client,
            config: config.clone(),
            cookies,
        })
    }

    fn prepare(&self, request: TransportRequest) -> Result<reqwest::RequestBuilder> {
        let mut builder = self
            .client
            .request(request.method.to_reqwest(), request.url.as_str())
            .headers(request.headers);

        if let Some(Credentials { username, password }) = &self.config.credentials {
            builder = builder.basic_auth(username, password.as_deref());
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder.body(bytes),
            RequestBody::Multipart(parts) => {
                builder.multipart(multipart_form(parts, self.config.upload_chunk_size)?)
            }
        };
        Ok(builder)
    }
}

impl Transport for HttpTransport {
    fn execute(
        &mut self,
        request: TransportRequest,
        interrupt: &CancellationToken,
    ) -> Result<TransportResponse> {
        let span = tracing::trace_span!(
            target: targets::TRANSPORT,
            span_names::REQUEST,
            method = %request.method,
            url = %request.url
        );
        let _entered = span.enter();
        trace!(target: targets::TRANSPORT, "sending request");
        let builder = self.prepare(request)?;

        let response = self.runtime.block_on(async {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => Err(NetworkError::Cancelled),
                result = builder.send() => result.map_err(NetworkError::from),
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        trace!(target: targets::TRANSPORT, status, "response head received");

        Ok(TransportResponse::new(
            status,
            headers,
            ReqwestBody {
                runtime: self.runtime.clone(),
                response,
                interrupt: interrupt.clone(),
            },
        ))
    }

    fn close_idle_connections(&mut self) {
        // reqwest exposes no pool eviction; a fresh client starts with an
        // empty pool while the jar carries the session's cookies over.
        match build_client(&self.config, &self.cookies) {
            Ok(client) => {
                self.client = client;
                debug!(target: targets::TRANSPORT, "connection pool released");
            }
            Err(err) => {
                warn!(target: targets::TRANSPORT, error = %err, "failed to rebuild HTTP client");
            }
        }
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("user_agent", &self.config.user_agent)
            .field("connect_timeout", &self.config.connect_timeout)
            .field("read_timeout", &self.config.read_timeout)
            .finish_non_exhaustive()
    }
}

fn build_client(config: &ClientConfig, cookies: &Arc<CookieJar>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().cookie_provider(cookies.clone());

    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(connect_timeout) = config.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }
    if let Some(read_timeout) = config.read_timeout {
        builder = builder.read_timeout(read_timeout);
    }
    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua);
    }
    if let Some(ref proxy_url) = config.proxy {
        let proxy =
            reqwest::Proxy::all(proxy_url).map_err(|e| NetworkError::Proxy(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder = config.tls.apply(builder)?;

    builder
        .build()
        .map_err(|e| NetworkError::Tls(format!("failed to build HTTP client: {e}")))
}

fn multipart_form(parts: Vec<MultipartPart>, chunk_size: usize) -> Result<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        let chunks = ReaderChunks {
            reader: Mutex::new(part.reader),
            chunk_size: chunk_size.max(1),
            finished: false,
        };
        let body = reqwest::Body::wrap_stream(futures_util::stream::iter(chunks));
        let mut wire_part = reqwest::multipart::Part::stream(body);
        if let Some(file_name) = part.file_name {
            wire_part = wire_part.file_name(file_name);
        }
        if let Some(mime) = part.mime_type {
            wire_part = wire_part
                .mime_str(&mime)
                .map_err(|e| NetworkError::InvalidHeader(format!("MIME type '{mime}': {e}")))?;
        }
        form = form.part(part.name, wire_part);
    }
    Ok(form)
}

/// Adapts a blocking reader into the chunk iterator reqwest streams from.
struct ReaderChunks {
    reader: Mutex<Box<dyn Read + Send>>,
    chunk_size: usize,
    finished: bool,
}

impl Iterator for ReaderChunks {
    type Item = std::io::Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut buffer = vec![0u8; self.chunk_size];
        match self.reader.get_mut().read(&mut buffer) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(n) => {
                buffer.truncate(n);
                Some(Ok(Bytes::from(buffer)))
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

struct ReqwestBody {
    runtime: Arc<Runtime>,
    response: reqwest::Response,
    interrupt: CancellationToken,
}

impl BodyStream for ReqwestBody {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let response = &mut self.response;
        let interrupt = &self.interrupt;
        self.runtime.block_on(async move {
            tokio::select! {
                biased;
                _ = interrupt.cancelled() => Err(NetworkError::Cancelled),
                chunk = response.chunk() => chunk.map_err(NetworkError::from),
            }
        })
    }
}
