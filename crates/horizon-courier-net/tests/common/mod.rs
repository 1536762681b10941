//! Shared fixtures for the engine tests.
//!
//! [`ScriptedTransport`] replays per-URL behaviors instead of touching the
//! network, and records every request it was asked to execute.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::Sender;
use horizon_courier_core::{CancellationToken, InvocationQueue};
use horizon_courier_net::{
    BodyStream, BufferedBody, HttpMethod, NetworkError, RequestBody, Result, Transport,
    TransportRequest, TransportResponse,
};
use http::HeaderMap;
use parking_lot::Mutex;

/// Route engine logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How long tests wait for an expected callback.
pub const WAIT: Duration = Duration::from_secs(5);

/// What the transport does when a URL is requested.
pub enum Behavior {
    /// Reply with a status and a body split into the given chunks.
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
        chunks: Vec<Bytes>,
    },
    /// Reply with a body that yields `chunks` and then fails with `error`.
    BreakBody {
        chunks: Vec<Bytes>,
        declared_length: Option<u64>,
        error: NetworkError,
    },
    /// Fail before any response arrives.
    Fail(NetworkError),
    /// Announce the call, then hold it until the worker is interrupted.
    BlockUntilInterrupt { started: Sender<()> },
    /// Announce the call, then hold it until `release` receives a message.
    Hold {
        started: Sender<()>,
        release: crossbeam_channel::Receiver<()>,
        body: Bytes,
    },
    /// Panic inside the transport.
    Panic,
}

impl Behavior {
    /// 200 with `body` in one chunk.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    /// `status` with `body` in one chunk.
    pub fn status(status: u16, body: impl Into<Bytes>) -> Self {
        Self::Respond {
            status,
            headers: Vec::new(),
            chunks: vec![body.into()],
        }
    }

    /// 200 with a declared `Content-Length` and no body, as a HEAD reply.
    pub fn length(bytes: u64) -> Self {
        Self::Respond {
            status: 200,
            headers: vec![("content-length", bytes.to_string())],
            chunks: Vec::new(),
        }
    }

    /// 200 whose body arrives in the given chunks, with its length declared.
    pub fn chunked(chunks: Vec<Bytes>) -> Self {
        let total: usize = chunks.iter().map(Bytes::len).sum();
        Self::Respond {
            status: 200,
            headers: vec![("content-length", total.to_string())],
            chunks,
        }
    }

    pub fn timeout() -> Self {
        Self::Fail(NetworkError::Timeout)
    }
}

/// One request the transport executed.
#[derive(Clone, Debug)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub url: String,
    pub content_type: Option<String>,
    /// JSON payload, or the concatenated contents of every multipart part.
    pub body: Vec<u8>,
    pub part_names: Vec<String>,
}

#[derive(Default)]
struct ScriptState {
    behaviors: HashMap<String, VecDeque<Behavior>>,
    calls: Vec<RecordedCall>,
    in_flight: usize,
    max_in_flight: usize,
    idle_closes: usize,
}

/// Test-side handle to the transport's script and recordings.
#[derive(Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `behavior` for the next request to `url`.
    ///
    /// Behaviors for one URL are consumed in order. A URL with nothing
    /// queued answers 404.
    pub fn on(&self, url: &str, behavior: Behavior) -> &Self {
        self.state
            .lock()
            .behaviors
            .entry(url.to_string())
            .or_default()
            .push_back(behavior);
        self
    }

    pub fn transport(&self) -> ScriptedTransport {
        ScriptedTransport {
            script: self.clone(),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|c| c.url.clone()).collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| c.url == url).count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn idle_closes(&self) -> usize {
        self.state.lock().idle_closes
    }
}

pub struct ScriptedTransport {
    script: Script,
}

impl ScriptedTransport {
    fn record(&self, request: TransportRequest) -> Result<RecordedCall> {
        let content_type = request
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let mut call = RecordedCall {
            method: request.method,
            url: request.url,
            content_type,
            body: Vec::new(),
            part_names: Vec::new(),
        };
        match request.body {
            RequestBody::Empty => {}
            RequestBody::Json(bytes) => call.body = bytes.to_vec(),
            RequestBody::Multipart(parts) => {
                for mut part in parts {
                    call.part_names.push(part.name.clone());
                    // Small reads so progress is reported several times per part.
                    let mut buffer = [0u8; 4];
                    loop {
                        let n = part.reader.read(&mut buffer)?;
                        if n == 0 {
                            break;
                        }
                        call.body.extend_from_slice(&buffer[..n]);
                    }
                }
            }
        }
        Ok(call)
    }

    fn respond(behavior: Behavior, interrupt: &CancellationToken) -> Result<TransportResponse> {
        match behavior {
            Behavior::Respond {
                status,
                headers,
                chunks,
            } => Ok(TransportResponse::new(
                status,
                header_map(&headers),
                BufferedBody::new(chunks),
            )),
            Behavior::BreakBody {
                chunks,
                declared_length,
                error,
            } => {
                let headers = declared_length
                    .map(|len| vec![("content-length", len.to_string())])
                    .unwrap_or_default();
                Ok(TransportResponse::new(
                    200,
                    header_map(&headers),
                    BrokenBody {
                        chunks: chunks.into(),
                        error: Some(error),
                    },
                ))
            }
            Behavior::Fail(error) => Err(error),
            Behavior::BlockUntilInterrupt { started } => {
                let _ = started.send(());
                while !interrupt.is_cancelled() {
                    thread::sleep(Duration::from_millis(2));
                }
                Err(NetworkError::Cancelled)
            }
            Behavior::Hold {
                started,
                release,
                body,
            } => {
                let _ = started.send(());
                let _ = release.recv_timeout(WAIT);
                Ok(TransportResponse::from_bytes(200, HeaderMap::new(), body))
            }
            Behavior::Panic => unreachable!("handled before dispatch"),
        }
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &mut self,
        request: TransportRequest,
        interrupt: &CancellationToken,
    ) -> Result<TransportResponse> {
        let url = request.url.clone();
        let call = self.record(request)?;
        let behavior = {
            let mut state = self.script.state.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.behaviors.get_mut(&url).and_then(VecDeque::pop_front)
        };

        let result = match behavior {
            Some(Behavior::Panic) => {
                self.script.state.lock().in_flight -= 1;
                panic!("scripted transport panic");
            }
            Some(behavior) => Self::respond(behavior, interrupt),
            None => Ok(TransportResponse::from_bytes(404, HeaderMap::new(), "no script")),
        };
        self.script.state.lock().in_flight -= 1;
        result
    }

    fn close_idle_connections(&mut self) {
        self.script.state.lock().idle_closes += 1;
    }
}

struct BrokenBody {
    chunks: VecDeque<Bytes>,
    error: Option<NetworkError>,
}

impl BodyStream for BrokenBody {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

fn header_map(headers: &[(&'static str, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, value.parse().expect("valid header value"));
    }
    map
}

/// Pump `context` until `done` holds or [`WAIT`] elapses.
pub fn pump_until(context: &InvocationQueue, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while !done() {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        context.wait_and_run((deadline - now).min(Duration::from_millis(20)));
    }
    true
}

/// Pump `context` for `period`, running whatever arrives.
pub fn pump_for(context: &InvocationQueue, period: Duration) -> usize {
    let deadline = Instant::now() + period;
    let mut executed = 0;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return executed;
        }
        if context.wait_and_run(deadline - now) {
            executed += 1;
        }
    }
}

/// A slot a listener fills once.
pub struct Slot<T>(Arc<Mutex<Option<T>>>);

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Send + 'static> Slot<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    pub fn fill(&self, value: T) {
        *self.0.lock() = Some(value);
    }

    pub fn is_filled(&self) -> bool {
        self.0.lock().is_some()
    }

    pub fn take(&self) -> Option<T> {
        self.0.lock().take()
    }

    /// A listener that stores its argument here.
    pub fn listener(&self) -> impl FnOnce(T) + Send + 'static {
        let slot = self.clone();
        move |value| slot.fill(value)
    }
}
