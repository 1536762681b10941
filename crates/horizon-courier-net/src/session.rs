//! Shared HTTP session state.
//!
//! A [`Session`] pairs the transport with the cookie jar. It is moved into
//! the worker thread when the client starts, so every request goes out from
//! that one thread. The jar is the only piece other threads can reach: the
//! client keeps a handle to it for inspection and for the occasional manual
//! cookie, and [`CookieJar`] guards the store with its own lock.

use std::sync::Arc;

use bytes::Bytes;
use cookie_store::CookieStore as Store;
use horizon_courier_core::logging::targets;
use http::HeaderValue;
use parking_lot::RwLock;
use tracing::{enabled, trace, warn, Level};
use url::Url;

use crate::transport::Transport;

/// A point-in-time copy of one stored cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieSnapshot {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain attribute, if the cookie carried one.
    pub domain: Option<String>,
    /// Path attribute, if the cookie carried one.
    pub path: Option<String>,
}

/// Cookie storage shared by the transport and the client facade.
#[derive(Default)]
pub struct CookieJar {
    store: RwLock<Store>,
}

impl CookieJar {
    /// Create an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out every unexpired cookie.
    pub fn snapshot(&self) -> Vec<CookieSnapshot> {
        self.store
            .read()
            .iter_unexpired()
            .map(|cookie| CookieSnapshot {
                name: cookie.name().to_string(),
                value: cookie.value().to_string(),
                domain: cookie.domain().map(str::to_string),
                path: cookie.path().map(str::to_string),
            })
            .collect()
    }

    /// Store a cookie for `domain` with path `/`.
    ///
    /// Returns `false` if the store rejected the cookie (for example an
    /// empty or malformed domain).
    pub fn set_cookie(&self, domain: &str, name: &str, value: &str) -> bool {
        let Ok(url) = Url::parse(&format!("http://{domain}/")) else {
            warn!(target: targets::SESSION, domain, "cannot build cookie origin");
            return false;
        };
        let cookie = cookie::Cookie::build((name.to_string(), value.to_string()))
            .domain(domain.to_string())
            .path("/")
            .build();

        match self.store.write().insert_raw(&cookie, &url) {
            Ok(_) => true,
            Err(err) => {
                warn!(target: targets::SESSION, domain, name, error = %err, "cookie rejected");
                false
            }
        }
    }

    /// Forget every cookie.
    pub fn clear(&self) {
        *self.store.write() = Store::default();
    }

    /// Number of unexpired cookies.
    pub fn len(&self) -> usize {
        self.store.read().iter_unexpired().count()
    }

    /// Whether the jar holds no unexpired cookie.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let cookies: Vec<_> = cookie_headers
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| cookie::Cookie::parse(value).ok())
            .map(cookie::Cookie::into_owned)
            .collect();
        self.store
            .write()
            .store_response_cookies(cookies.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let header = self
            .store
            .read()
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");

        if header.is_empty() {
            return None;
        }
        HeaderValue::from_maybe_shared(Bytes::from(header)).ok()
    }
}

impl std::fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieJar").field("len", &self.len()).finish()
    }
}

/// The transport and cookie jar used by the worker.
pub struct Session {
    transport: Box<dyn Transport>,
    cookies: Arc<CookieJar>,
}

impl Session {
    /// Pair a transport with the jar it was configured with.
    pub fn new(transport: Box<dyn Transport>, cookies: Arc<CookieJar>) -> Self {
        Self { transport, cookies }
    }

    /// The transport.
    pub fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// The shared cookie jar.
    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.cookies
    }

    /// Trace every stored cookie.
    pub fn log_cookies(&self) {
        if !enabled!(target: targets::SESSION, Level::TRACE) {
            return;
        }
        for cookie in self.cookies.snapshot() {
            trace!(
                target: targets::SESSION,
                name = %cookie.name,
                value = %cookie.value,
                domain = ?cookie.domain,
                "session cookie"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &self.cookies)
            .finish_non_exhaustive()
    }
}
