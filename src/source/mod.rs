//! Source resolution and the upload cache

pub mod cache;
pub mod resolver;

pub use cache::{CacheManager, CachedPdf, DEFAULT_UPLOAD_TTL};
pub use resolver::{
    resolve_base64, resolve_cache, resolve_path, resolve_url, store_upload, upload_file_name,
    ResolvedPdf, StoredUpload, UrlPolicy,
};
