//! Operation data model.
//!
//! An operation is one queued unit of network work: its kind, its inputs,
//! the listeners to notify and the execution context those listeners run on.
//! Callers never build operations directly; each enqueue method on
//! [`RestClient`](crate::RestClient) assembles one and hands it to the queue.

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use horizon_courier_core::ExecutionContext;

use crate::error::NetworkError;

/// Global operation counter for unique IDs.
static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Result delivered by a failed size query.
pub const SIZE_ERROR: i64 = -1;

/// Identifies one enqueued operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    pub(crate) fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw identifier.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// The closed set of operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// GET a resource as text.
    GetString,
    /// GET a resource and parse it as JSON.
    GetJson,
    /// GET a resource as raw bytes.
    GetRawData,
    /// GET a resource and stream it into a file.
    GetFile,
    /// POST a JSON document.
    PostJson,
    /// POST a `multipart/form-data` body.
    PostMultipart,
    /// HEAD a list of resources and sum their sizes.
    GetSize,
    /// Stop the worker once everything queued before it has run.
    Quit,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GetString => "get_string",
            Self::GetJson => "get_json",
            Self::GetRawData => "get_raw_data",
            Self::GetFile => "get_file",
            Self::PostJson => "post_json",
            Self::PostMultipart => "post_multipart",
            Self::GetSize => "get_size",
            Self::Quit => "quit",
        };
        f.write_str(name)
    }
}

/// Completion listener receiving text (`None` on failure).
pub type TextListener = Box<dyn FnOnce(Option<String>) + Send>;
/// Completion listener receiving a JSON document (`None` on failure).
pub type JsonListener = Box<dyn FnOnce(Option<serde_json::Value>) + Send>;
/// Completion listener receiving raw bytes (`None` on failure).
pub type BytesListener = Box<dyn FnOnce(Option<Bytes>) + Send>;
/// Completion listener receiving the written file path (`None` on failure).
pub type FileListener = Box<dyn FnOnce(Option<PathBuf>) + Send>;
/// Completion listener receiving a byte total ([`SIZE_ERROR`] on failure).
pub type SizeListener = Box<dyn FnOnce(i64) + Send>;
/// Progress listener for file downloads.
pub type DownloadProgressListener = Arc<dyn Fn(DownloadProgress) + Send + Sync>;
/// Progress listener for multipart uploads, receiving the cumulative byte count.
pub type UploadProgressListener = Arc<dyn Fn(u64) + Send + Sync>;

/// Progress of a file download, reported after every chunk written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes written by this chunk.
    pub chunk_bytes: u64,
    /// Bytes written so far in the current attempt.
    pub total_bytes: u64,
    /// Declared body length, if the server sent one.
    pub expected_bytes: Option<u64>,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`, when the total is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.expected_bytes {
            Some(0) => Some(1.0),
            Some(expected) => Some((self.total_bytes as f64 / expected as f64).min(1.0)),
            None => None,
        }
    }
}

/// One input stream of a multipart upload.
pub struct MultipartInput {
    pub(crate) reader: Box<dyn Read + Send>,
    pub(crate) mime_type: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl MultipartInput {
    /// Upload everything `reader` yields.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            mime_type: None,
            file_name: None,
        }
    }

    /// Upload an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(Cursor::new(bytes.into()))
    }

    /// Upload a file, using its name as the part's file name.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut input = Self::new(file);
        input.file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(input)
    }

    /// Set the part's MIME type.
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the part's file name.
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

impl std::fmt::Debug for MultipartInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartInput")
            .field("mime_type", &self.mime_type)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Kind-specific inputs and listeners.
pub(crate) enum Request {
    GetString {
        url: String,
        on_complete: TextListener,
    },
    GetJson {
        url: String,
        on_complete: JsonListener,
    },
    GetRawData {
        url: String,
        on_complete: BytesListener,
    },
    GetFile {
        url: String,
        destination: PathBuf,
        on_progress: Option<DownloadProgressListener>,
        on_complete: FileListener,
    },
    PostJson {
        url: String,
        /// Serialized at enqueue time; a serialization failure resolves the
        /// operation through the normal failure path.
        payload: Result<Bytes, NetworkError>,
        on_complete: TextListener,
    },
    PostMultipart {
        url: String,
        parts: Vec<MultipartInput>,
        on_progress: Option<UploadProgressListener>,
        on_complete: TextListener,
    },
    GetSize {
        urls: Vec<String>,
        on_complete: SizeListener,
    },
}

impl Request {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            Self::GetString { .. } => OperationKind::GetString,
            Self::GetJson { .. } => OperationKind::GetJson,
            Self::GetRawData { .. } => OperationKind::GetRawData,
            Self::GetFile { .. } => OperationKind::GetFile,
            Self::PostJson { .. } => OperationKind::PostJson,
            Self::PostMultipart { .. } => OperationKind::PostMultipart,
            Self::GetSize { .. } => OperationKind::GetSize,
        }
    }

    /// The URL this request targets, or the first one for size queries.
    pub(crate) fn target(&self) -> &str {
        match self {
            Self::GetString { url, .. }
            | Self::GetJson { url, .. }
            | Self::GetRawData { url, .. }
            | Self::GetFile { url, .. }
            | Self::PostJson { url, .. }
            | Self::PostMultipart { url, .. } => url,
            Self::GetSize { urls, .. } => urls.first().map(String::as_str).unwrap_or(""),
        }
    }
}

/// One queued unit of work.
pub(crate) struct Operation {
    pub(crate) id: OperationId,
    /// Cancellation epoch current when the operation was enqueued.
    pub(crate) epoch: u64,
    pub(crate) context: Arc<dyn ExecutionContext>,
    pub(crate) request: Request,
}

/// Entries of the operation queue.
pub(crate) enum Queued {
    Operation(Operation),
    Quit,
}

impl Queued {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            Self::Operation(op) => op.request.kind(),
            Self::Quit => OperationKind::Quit,
        }
    }
}
