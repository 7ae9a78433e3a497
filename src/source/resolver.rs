//! Source resolution for quiz PDFs: paths, base64 payloads, URLs, and uploads

use crate::error::{Error, Result};
use crate::pdf::check_pdf_header;
use crate::source::CacheManager;
use base64::Engine;
use futures_util::StreamExt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Resolved PDF data
#[derive(Debug)]
pub struct ResolvedPdf {
    pub data: Vec<u8>,
    pub source_name: String,
}

/// An upload accepted into the cache
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub cache_key: String,
    pub file_name: String,
}

/// Outbound fetch limits for URL sources
#[derive(Debug, Clone)]
pub struct UrlPolicy {
    /// Permit hosts that resolve to loopback, private, or link-local addresses
    pub allow_private: bool,
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self {
            allow_private: false,
            max_bytes: 100 * 1024 * 1024,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Read a quiz PDF from disk
pub fn resolve_path<P: AsRef<Path>>(path: P) -> Result<ResolvedPdf> {
    let path = path.as_ref();
    let source_name = path.display().to_string();

    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::PdfNotFound { path: source_name })
        }
        Err(e) => return Err(e.into()),
    };

    validated(data, source_name)
}

/// Decode an inline base64 payload
pub fn resolve_base64(payload: &str) -> Result<ResolvedPdf> {
    let data = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    validated(data, "<base64>".to_string())
}

fn validated(data: Vec<u8>, source_name: String) -> Result<ResolvedPdf> {
    check_pdf_header(&data)?;
    Ok(ResolvedPdf { data, source_name })
}

/// Whether an address must not be fetched when private URLs are disallowed
fn is_blocked_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            let carrier_grade_nat = a == 100 && (64..128).contains(&b);
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || carrier_grade_nat
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            let unique_local = first & 0xfe00 == 0xfc00;
            let link_local = first & 0xffc0 == 0xfe80;
            v6.is_loopback() || v6.is_unspecified() || unique_local || link_local
        }
    }
}

/// Parse the URL and, unless private hosts are allowed, make sure every address its host
/// resolves to is public
async fn checked_url(raw: &str, policy: &UrlPolicy) -> Result<url::Url> {
    let url = url::Url::parse(raw).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid URL: {}", e),
    })?;
    if policy.allow_private {
        return Ok(url);
    }

    let host = url.host_str().ok_or_else(|| Error::SourceResolution {
        reason: "URL has no host".to_string(),
    })?;
    let port = url.port_or_known_default().unwrap_or(443);

    let blocked = tokio::net::lookup_host(format!("{}:{}", host, port))
        .await
        .map_err(|e| Error::SourceResolution {
            reason: format!("DNS resolution failed for {}: {}", host, e),
        })?
        .any(|addr| is_blocked_address(addr.ip()));

    if blocked {
        tracing::warn!(url = raw, "blocked fetch of private address");
        return Err(Error::SsrfBlocked {
            url: raw.to_string(),
        });
    }
    Ok(url)
}

/// Download a quiz PDF, enforcing the policy's address and size limits
pub async fn resolve_url(raw: &str, policy: &UrlPolicy) -> Result<ResolvedPdf> {
    let url = checked_url(raw, policy).await?;

    let client = reqwest::Client::builder()
        .timeout(policy.timeout)
        .build()
        .map_err(Error::HttpRequest)?;
    let response = client.get(url).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::SourceResolution {
            reason: format!("HTTP request failed with status: {}", status),
        });
    }

    let too_large = |size: u64| Error::DownloadTooLarge {
        size,
        max_size: policy.max_bytes,
    };
    if let Some(declared) = response.content_length().filter(|&n| n > policy.max_bytes) {
        return Err(too_large(declared));
    }

    let mut data = Vec::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk?);
        if data.len() as u64 > policy.max_bytes {
            return Err(too_large(data.len() as u64));
        }
    }

    validated(data, raw.to_string())
}

/// Resolve an upload cache key to PDF data
pub fn resolve_cache(cache_key: &str, cache: &CacheManager) -> Result<ResolvedPdf> {
    let entry = cache.get(cache_key).ok_or_else(|| Error::CacheKeyNotFound {
        key: cache_key.to_string(),
    })?;

    Ok(ResolvedPdf {
        data: entry.data,
        source_name: entry.file_name,
    })
}

/// Decode and validate an uploaded PDF, then store it under a fresh cache key
pub fn store_upload(cache: &CacheManager, name: &str, base64_data: &str) -> Result<StoredUpload> {
    let resolved = resolve_base64(base64_data)?;
    let file_name = upload_file_name(name, chrono::Utc::now().timestamp_millis());
    let size = resolved.data.len();
    let cache_key = cache
        .insert(file_name.clone(), resolved.data)
        .ok_or(Error::UploadTooLarge {
            size: size as u64,
            max_size: cache.max_bytes() as u64,
        })?;

    tracing::info!(key = %cache_key, file = %file_name, bytes = size, "upload stored");
    Ok(StoredUpload {
        cache_key,
        file_name,
    })
}

/// `{timestamp}-{name}` with path separators and control characters replaced
pub fn upload_file_name(name: &str, timestamp_millis: i64) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let sanitized = match sanitized.trim() {
        "" | "." | ".." => "upload.pdf".to_string(),
        other => other.to_string(),
    };
    format!("{}-{}", timestamp_millis, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_resolve_base64_rejects_non_pdf() {
        // "Hello World"
        assert!(matches!(
            resolve_base64("SGVsbG8gV29ybGQ="),
            Err(Error::InvalidPdf { .. })
        ));
        assert!(matches!(
            resolve_base64("not valid base64!!!"),
            Err(Error::Base64Decode(_))
        ));
    }

    #[test]
    fn test_upload_file_name() {
        assert_eq!(upload_file_name("quiz.pdf", 1700000000000), "1700000000000-quiz.pdf");
        assert_eq!(upload_file_name("../../etc/quiz.pdf", 5), "5-quiz.pdf");
        assert_eq!(upload_file_name("C:\\tmp\\a b.pdf", 5), "5-a b.pdf");
        assert_eq!(upload_file_name("", 5), "5-upload.pdf");
        assert_eq!(upload_file_name("..", 5), "5-upload.pdf");
    }

    #[test]
    fn test_store_and_resolve_upload() {
        let cache = CacheManager::new(10, 1024);
        let payload = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4 quiz");

        let stored = store_upload(&cache, "exam.pdf", &payload).unwrap();
        assert!(stored.file_name.ends_with("-exam.pdf"));

        let resolved = resolve_cache(&stored.cache_key, &cache).unwrap();
        assert_eq!(resolved.data, b"%PDF-1.4 quiz");
        assert_eq!(resolved.source_name, stored.file_name);
    }

    #[test]
    fn test_store_upload_rejects_non_pdf() {
        let cache = CacheManager::new(10, 1024);
        let payload = base64::engine::general_purpose::STANDARD.encode(b"Hello World");
        assert!(matches!(
            store_upload(&cache, "x.pdf", &payload),
            Err(Error::InvalidPdf { .. })
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_upload_over_budget() {
        let cache = CacheManager::new(10, 8);
        let payload = base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.4 too large");
        assert!(matches!(
            store_upload(&cache, "x.pdf", &payload),
            Err(Error::UploadTooLarge { .. })
        ));
    }

    #[test]
    fn test_resolve_cache_missing_key() {
        let cache = CacheManager::new(10, 1024);
        assert!(matches!(
            resolve_cache("missing", &cache),
            Err(Error::CacheKeyNotFound { .. })
        ));
    }

    #[test]
    fn test_resolve_path_not_found() {
        let result = resolve_path("/nonexistent/path/file.pdf");
        assert!(matches!(result, Err(Error::PdfNotFound { .. })));
    }

    #[rstest]
    #[case::loopback("127.0.0.2")]
    #[case::private_10("10.0.0.1")]
    #[case::private_172("172.31.255.255")]
    #[case::private_192("192.168.1.1")]
    #[case::metadata_endpoint("169.254.169.254")]
    #[case::cgnat_low("100.64.0.1")]
    #[case::cgnat_high("100.127.255.255")]
    #[case::unspecified("0.0.0.0")]
    #[case::broadcast("255.255.255.255")]
    #[case::v6_loopback("::1")]
    #[case::v6_unspecified("::")]
    #[case::v6_unique_local("fd00::1")]
    #[case::v6_link_local("fe80::1")]
    fn test_blocked_addresses(#[case] addr: &str) {
        assert!(is_blocked_address(addr.parse().unwrap()));
    }

    #[rstest]
    #[case("8.8.8.8")]
    #[case("100.128.0.1")]
    #[case("203.0.113.1")]
    #[case("2607:f8b0:4004:800::200e")]
    fn test_public_addresses(#[case] addr: &str) {
        assert!(!is_blocked_address(addr.parse().unwrap()));
    }

    #[tokio::test]
    async fn test_private_url_blocked() {
        let result = resolve_url("http://127.0.0.1:9/quiz.pdf", &UrlPolicy::default()).await;
        assert!(matches!(result, Err(Error::SsrfBlocked { .. })));
    }

    #[tokio::test]
    async fn test_private_ipv6_url_blocked() {
        let result = resolve_url("http://[::1]:9/quiz.pdf", &UrlPolicy::default()).await;
        assert!(matches!(result, Err(Error::SsrfBlocked { .. })));
    }

    #[tokio::test]
    async fn test_malformed_url() {
        let result = resolve_url("not a url", &UrlPolicy::default()).await;
        assert!(matches!(result, Err(Error::SourceResolution { .. })));
    }

    #[test]
    fn test_resolve_path_reads_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quiz.pdf");
        std::fs::write(&path, b"%PDF-1.7 quiz").unwrap();

        let resolved = resolve_path(&path).unwrap();
        assert_eq!(resolved.data, b"%PDF-1.7 quiz");
        assert_eq!(resolved.source_name, path.display().to_string());
    }
}
