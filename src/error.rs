//! Error types for the quiz analysis server

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between receiving a source and returning a quiz report.
///
/// `Display` carries full detail for logs; [`Error::client_message`] is what tool callers see.
#[derive(Error, Debug)]
pub enum Error {
    // Opening the document
    #[error("no PDF at {path}")]
    PdfNotFound { path: String },

    /// Bytes are not a PDF (header check failed)
    #[error("not a PDF: {reason}")]
    InvalidPdf { reason: String },

    #[error("document requires a password")]
    PasswordRequired,

    /// The rendering engine rejected the document
    #[error("document could not be opened: {reason}")]
    DocumentUnreadable { reason: String },

    #[error("PDFium unavailable: {reason}")]
    Pdfium { reason: String },

    // Per-page failures. The orchestrator records these and moves on.
    #[error("page {page} is outside the document ({total} pages)")]
    PageOutOfBounds { page: u32, total: u32 },

    #[error("page {page} failed: {reason}")]
    PageRender { page: u32, reason: String },

    // Caller-supplied options
    #[error("bad page range {range:?}")]
    InvalidPageRange { range: String },

    /// Ink color is not a `#RRGGBB` hex string
    #[error("bad ink color {value:?}")]
    InvalidInkColor { value: String },

    #[error("bad render scale: {detail}")]
    InvalidRenderScale { detail: String },

    // Sources and the upload cache
    /// Never uploaded, evicted, or expired
    #[error("no upload under key {key}")]
    CacheKeyNotFound { key: String },

    #[error("source resolution failed: {reason}")]
    SourceResolution { reason: String },

    /// Path falls outside the configured resource directories
    #[error("{path} is outside the resource directories")]
    PathAccessDenied { path: String },

    /// URL host resolves to a private or reserved address
    #[error("refusing to fetch private address behind {url}")]
    SsrfBlocked { url: String },

    #[error("download of {size} bytes exceeds limit of {max_size}")]
    DownloadTooLarge { size: u64, max_size: u64 },

    /// Upload is larger than the whole upload cache budget
    #[error("upload of {size} bytes exceeds cache budget of {max_size}")]
    UploadTooLarge { size: u64, max_size: u64 },

    // Wrapped library errors
    #[error(transparent)]
    Base64Decode(#[from] base64::DecodeError),

    #[error(transparent)]
    HttpRequest(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Overlay PNG encoding
    #[error(transparent)]
    ImageEncode(#[from] image::ImageError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Message safe to return to a tool caller.
    ///
    /// Paths, library messages and resolved addresses are left out; only values the caller
    /// supplied themselves are echoed back. Log the `Display` form before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".into(),
            Error::InvalidPdf { .. } => "Invalid PDF file".into(),
            Error::PasswordRequired => "PDF is password protected".into(),
            Error::DocumentUnreadable { .. } => "Document unreadable".into(),
            Error::Pdfium { .. } => "PDF engine unavailable".into(),
            Error::PageOutOfBounds { page, total } => {
                format!("Page {} out of range (document has {})", page, total)
            }
            Error::PageRender { page, .. } => format!("Failed to render page {}", page),
            Error::InvalidPageRange { range } => format!("Invalid page range: {}", range),
            Error::InvalidInkColor { value } => format!("Invalid ink color: {}", value),
            Error::InvalidRenderScale { detail } => format!("Invalid render scale: {}", detail),
            Error::CacheKeyNotFound { .. } => "Upload not found or expired".into(),
            Error::SourceResolution { .. } => "Could not resolve PDF source".into(),
            Error::PathAccessDenied { .. } => "Access denied".into(),
            Error::SsrfBlocked { .. } => "URL not allowed".into(),
            Error::DownloadTooLarge { max_size, .. } => {
                format!("Download exceeds maximum size of {} bytes", max_size)
            }
            Error::UploadTooLarge { max_size, .. } => {
                format!("Upload exceeds maximum size of {} bytes", max_size)
            }
            Error::Base64Decode(_) => "Invalid base64 data".into(),
            Error::HttpRequest(_) => "Download failed".into(),
            Error::Io(_) => "I/O error".into(),
            Error::ImageEncode(_) => "Overlay encoding failed".into(),
            Error::Serialization(_) => "Serialization error".into(),
        }
    }
}
