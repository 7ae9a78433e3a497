//! MCP Server implementation using rmcp

use crate::error::Error;
use crate::pdf::analyze_pdf_bytes;
use crate::quiz::{
    render_page_overlay, AlignmentMode, AnalysisConfig, Checkbox, PageOverlay, QuizAnalysis,
    QuizAnalyzer, QuizReport,
};
use crate::source::{
    resolve_base64, resolve_cache, resolve_path, resolve_url, store_upload, CacheManager,
    ResolvedPdf, UrlPolicy, DEFAULT_UPLOAD_TTL,
};
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, service::RequestContext, tool, tool_handler, tool_router, RoleServer,
    ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SOURCE_KEYS: [&str; 4] = ["path", "base64", "url", "cache_key"];

/// Where to read a PDF from
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum PdfSource {
    /// A quiz PDF on the server's filesystem
    Path {
        /// Absolute or working-directory-relative path
        path: String,
    },
    /// A quiz PDF sent inline
    Base64 {
        /// The file, base64 encoded
        base64: String,
    },
    /// A quiz PDF fetched over HTTP(S)
    Url {
        /// Location of the file
        url: String,
    },
    /// Reference to an uploaded or cached PDF
    CacheRef {
        /// Cache key returned by `upload_pdf` or a previous `analyze_quiz` call
        cache_key: String,
    },
}

impl<'de> Deserialize<'de> for PdfSource {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let value = serde_json::Value::deserialize(deserializer)?;
        let Some(obj) = value.as_object() else {
            return Err(D::Error::custom(format!(
                "Invalid source: expected an object with one of {:?}, got {}",
                SOURCE_KEYS, value
            )));
        };

        for key in SOURCE_KEYS {
            let Some(field) = obj.get(key) else {
                continue;
            };
            let value = field
                .as_str()
                .ok_or_else(|| D::Error::custom(format!("\"{}\" must be a string", key)))?
                .to_string();

            return Ok(match key {
                "path" => PdfSource::Path { path: value },
                "base64" => PdfSource::Base64 { base64: value },
                "url" => PdfSource::Url { url: value },
                _ => PdfSource::CacheRef { cache_key: value },
            });
        }

        Err(D::Error::custom(format!(
            "Invalid source: expected one of {:?}, got keys {:?}",
            SOURCE_KEYS,
            obj.keys().collect::<Vec<_>>()
        )))
    }
}

/// Security, resource, and pipeline configuration for the quiz server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Quiz directories listed as resources; when non-empty, path sources must live inside them
    pub resource_dirs: Vec<String>,
    /// Let URL sources reach loopback, private, and link-local hosts
    pub allow_private_urls: bool,
    /// Cap on a URL source's body, in bytes
    pub max_download_bytes: u64,
    /// Maximum total bytes in the upload cache (default: 512MB)
    pub cache_max_bytes: usize,
    /// Maximum number of upload cache entries (default: 100)
    pub cache_max_entries: usize,
    /// How long an upload stays resolvable (default: 60s)
    pub upload_ttl: Duration,
    /// Largest render scale a caller may request (default: 5.0)
    pub max_render_scale: f32,
    /// Pipeline heuristics used when a call does not override them
    pub analysis: AnalysisConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            resource_dirs: Vec::new(),
            allow_private_urls: false,
            max_download_bytes: 100 * 1024 * 1024,
            cache_max_bytes: 512 * 1024 * 1024,
            cache_max_entries: 100,
            upload_ttl: DEFAULT_UPLOAD_TTL,
            max_render_scale: 5.0,
            analysis: AnalysisConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `QUIZ_RESOURCE_DIRS`, `QUIZ_ALLOW_PRIVATE_URLS` and
    /// `QUIZ_UPLOAD_TTL_SECS`
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dirs) = var("QUIZ_RESOURCE_DIRS") {
            config.resource_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
        }

        if let Some(flag) = var("QUIZ_ALLOW_PRIVATE_URLS") {
            config.allow_private_urls =
                matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        match var("QUIZ_UPLOAD_TTL_SECS").map(|v| v.trim().parse::<u64>()) {
            Some(Ok(secs)) => config.upload_ttl = Duration::from_secs(secs),
            Some(Err(e)) => tracing::warn!(error = %e, "ignoring invalid QUIZ_UPLOAD_TTL_SECS"),
            None => {}
        }

        config
    }
}

/// Quiz analysis MCP server
#[derive(Clone)]
pub struct QuizServer {
    cache: Arc<CacheManager>,
    analyzer: Arc<QuizAnalyzer>,
    tool_router: ToolRouter<Self>,
    config: Arc<ServerConfig>,
}

// ============================================================================
// Request/Response types for analyze_quiz
// ============================================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct AnalyzeQuizParams {
    /// PDF sources to analyze
    pub sources: Vec<PdfSource>,
    /// Page selection (e.g., "1-3,5"). All pages when omitted.
    #[serde(default)]
    pub pages: Option<String>,
    /// Password for encrypted PDFs
    #[serde(default)]
    pub password: Option<String>,
    /// Checkbox ink color as "#RRGGBB" (default "#32B09C")
    #[serde(default)]
    pub ink_color: Option<String>,
    /// Rasterization scale (default 1.3). Pixel heuristics are rescaled to match.
    #[serde(default)]
    pub render_scale: Option<f32>,
    /// Which answers consume checkboxes (default "image_answers_only")
    #[serde(default)]
    pub alignment: Option<AlignmentMode>,
    /// Full heuristics override. The explicit options above still take precedence.
    #[serde(default)]
    pub tuning: Option<AnalysisConfig>,
    /// Include every detected checkbox in the result
    #[serde(default)]
    pub include_checkboxes: bool,
    /// Include a debug overlay PNG per page
    #[serde(default)]
    pub include_overlay: bool,
    /// Keep the PDF in the cache and return its key
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
    /// Another analysis held the slot; this trigger was ignored
    AlreadyRunning,
    Failed,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeQuizResult {
    pub source: String,
    pub status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// The quiz document: `{ totalQuestions, questions }`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz: Option<QuizReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkboxes: Option<Vec<Checkbox>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlays: Option<Vec<PageOverlay>>,
    /// Pages skipped because the engine could not render or read them
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_pages: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalyzeQuizResult {
    fn new(source: String, status: AnalysisStatus) -> Self {
        Self {
            source,
            status,
            cache_key: None,
            quiz: None,
            checkboxes: None,
            overlays: None,
            failed_pages: Vec::new(),
            error: None,
        }
    }

    fn completed(
        source: String,
        analysis: &QuizAnalysis,
        include_checkboxes: bool,
        include_overlay: bool,
    ) -> crate::error::Result<Self> {
        let overlays = if include_overlay {
            Some(
                analysis
                    .pages
                    .iter()
                    .filter_map(render_page_overlay)
                    .collect::<crate::error::Result<Vec<_>>>()?,
            )
        } else {
            None
        };

        Ok(Self {
            quiz: Some(analysis.report()),
            checkboxes: include_checkboxes.then(|| analysis.checkboxes()),
            overlays,
            failed_pages: analysis.failed_pages.iter().map(|f| f.page_num).collect(),
            ..Self::new(source, AnalysisStatus::Completed)
        })
    }
}

// ============================================================================
// Request/Response types for upload_pdf
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadPdfParams {
    /// Original file name
    pub name: String,
    /// Base64 encoded PDF content
    pub base64: String,
}

#[derive(Debug, Serialize)]
pub struct UploadPdfResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    /// Stored name, `{timestamp}-{name}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Request/Response types for list_pdfs
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListPdfsParams {
    /// Directory to search for PDF files
    pub directory: String,
    /// Search subdirectories recursively (default: false)
    #[serde(default)]
    pub recursive: bool,
    /// Filename pattern to filter (e.g., "exam*.pdf"). Supports glob patterns.
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PdfFileInfo {
    /// Full path to the PDF file
    pub path: String,
    /// Filename only
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (ISO 8601 format)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ListPdfsResult {
    /// Directory that was searched
    pub directory: String,
    /// List of PDF files found
    pub files: Vec<PdfFileInfo>,
    /// Total number of files found
    pub total_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Tool implementations
// ============================================================================

#[tool_router]
impl QuizServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new QuizServer with full configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let cache = CacheManager::new(config.cache_max_entries, config.cache_max_bytes)
            .with_ttl(config.upload_ttl);
        Self {
            cache: Arc::new(cache),
            analyzer: Arc::new(QuizAnalyzer::new(config.analysis.clone())),
            tool_router: Self::tool_router(),
            config: Arc::new(config),
        }
    }

    /// Analyze quiz PDFs into questions, answers, and checkbox state
    #[tool(
        description = "Analyze quiz PDFs: detect checkbox glyphs in each rendered page, decide which are filled, group the page text into questions and answers, and report which answers are checked.

Returns per source a quiz document {\"totalQuestions\": n, \"questions\": [{\"text\", \"index\", \"points\", \"pageNum\", \"answers\": [{\"text\", \"checked\", \"isImage\"}]}]}.
Only one analysis runs at a time; a call made while one is in progress returns status \"already_running\".

Source format: each element must be one of {\"path\": \"/absolute/path.pdf\"}, {\"url\": \"https://...\"}, {\"base64\": \"...\"}, or {\"cache_key\": \"...\"}"
    )]
    async fn analyze_quiz(&self, Parameters(params): Parameters<AnalyzeQuizParams>) -> String {
        let mut results = Vec::new();

        for source in &params.sources {
            let result = self
                .process_analyze_quiz(source, &params)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "analyze_quiz failed");
                    AnalyzeQuizResult {
                        error: Some(e.client_message()),
                        ..AnalyzeQuizResult::new(Self::source_name(source), AnalysisStatus::Failed)
                    }
                });
            results.push(result);
        }

        let response = serde_json::json!({ "results": results });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// Store an uploaded PDF for later analysis
    #[tool(
        description = "Upload a quiz PDF as base64. The PDF is kept for a limited time; use the returned cache_key as a source for analyze_quiz."
    )]
    async fn upload_pdf(&self, Parameters(params): Parameters<UploadPdfParams>) -> String {
        let purged = self.cache.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired uploads removed");
        }

        let result = match store_upload(&self.cache, &params.name, &params.base64) {
            Ok(stored) => UploadPdfResult {
                name: params.name.clone(),
                cache_key: Some(stored.cache_key),
                file_name: Some(stored.file_name),
                expires_in_secs: Some(self.cache.ttl().as_secs()),
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "upload_pdf failed");
                UploadPdfResult {
                    name: params.name.clone(),
                    cache_key: None,
                    file_name: None,
                    expires_in_secs: None,
                    error: Some(e.client_message()),
                }
            }
        };

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }

    /// List PDF files in a directory
    #[tool(
        description = "List PDF files in a directory. Useful for picking a quiz PDF before analyzing it.

Returns for each file:
- Full path (can be used directly as an analyze_quiz source)
- Filename
- File size in bytes
- Last modified time

Supports recursive search and glob pattern filtering."
    )]
    async fn list_pdfs(&self, Parameters(params): Parameters<ListPdfsParams>) -> String {
        let result = self.process_list_pdfs(&params).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "list_pdfs failed");
            ListPdfsResult {
                directory: params.directory.clone(),
                files: vec![],
                total_count: 0,
                error: Some(e.client_message()),
            }
        });

        let response = serde_json::json!({ "results": [result] });
        serde_json::to_string_pretty(&response).unwrap_or_default()
    }
}

impl QuizServer {
    /// The shared analyzer whose slot guards against concurrent runs
    pub fn analyzer(&self) -> &Arc<QuizAnalyzer> {
        &self.analyzer
    }

    fn source_name(source: &PdfSource) -> String {
        match source {
            PdfSource::Path { path } => path.clone(),
            PdfSource::Base64 { .. } => "<base64>".to_string(),
            PdfSource::Url { url } => url.clone(),
            PdfSource::CacheRef { cache_key } => format!("<cache:{}>", cache_key),
        }
    }

    async fn resolve_source(&self, source: &PdfSource) -> crate::error::Result<ResolvedPdf> {
        match source {
            PdfSource::Path { path } => {
                self.validate_path_access(path)?;
                resolve_path(path)
            }
            PdfSource::Base64 { base64 } => resolve_base64(base64),
            PdfSource::Url { url } => {
                let policy = UrlPolicy {
                    allow_private: self.config.allow_private_urls,
                    max_bytes: self.config.max_download_bytes,
                    ..UrlPolicy::default()
                };
                resolve_url(url, &policy).await
            }
            PdfSource::CacheRef { cache_key } => resolve_cache(cache_key, &self.cache),
        }
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    fn validate_path_access(&self, path: &str) -> crate::error::Result<std::path::PathBuf> {
        if self.config.resource_dirs.is_empty() {
            return Ok(std::path::PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;

        if self.is_within_resource_dirs(&canonical) {
            Ok(canonical)
        } else {
            Err(Error::PathAccessDenied {
                path: path.to_string(),
            })
        }
    }

    fn is_within_resource_dirs(&self, canonical: &Path) -> bool {
        self.config.resource_dirs.iter().any(|dir| {
            std::fs::canonicalize(dir)
                .map(|cd| canonical.starts_with(&cd))
                .unwrap_or(false)
        })
    }

    fn check_render_scale(&self, scale: f32) -> crate::error::Result<()> {
        let max = self.config.max_render_scale;
        if scale > 0.0 && scale <= max {
            Ok(())
        } else {
            Err(Error::InvalidRenderScale {
                detail: format!("{} is outside (0, {}]", scale, max),
            })
        }
    }

    /// Effective heuristics for one call
    fn analysis_config(&self, params: &AnalyzeQuizParams) -> crate::error::Result<AnalysisConfig> {
        let mut config = params
            .tuning
            .clone()
            .unwrap_or_else(|| self.config.analysis.clone());
        self.check_render_scale(config.render_scale)?;

        if let Some(scale) = params.render_scale {
            self.check_render_scale(scale)?;
            config = config.rescaled(scale);
        }
        if let Some(color) = &params.ink_color {
            config.ink_color = color.parse()?;
        }
        if let Some(alignment) = params.alignment {
            config.alignment = alignment;
        }

        Ok(config)
    }

    async fn process_analyze_quiz(
        &self,
        source: &PdfSource,
        params: &AnalyzeQuizParams,
    ) -> crate::error::Result<AnalyzeQuizResult> {
        let config = self.analysis_config(params)?;

        if self.analyzer.is_running() {
            tracing::info!(source = %Self::source_name(source), "analysis already running, trigger ignored");
            return Ok(AnalyzeQuizResult::new(
                Self::source_name(source),
                AnalysisStatus::AlreadyRunning,
            ));
        }

        let resolved = self.resolve_source(source).await?;
        let source_name = resolved.source_name.clone();

        let cache_key = if params.cache {
            self.cache.insert(source_name.clone(), resolved.data.clone())
        } else {
            None
        };

        let analyzer = Arc::clone(&self.analyzer);
        let data = resolved.data;
        let password = params.password.clone();
        let pages = params.pages.clone();
        let include_checkboxes = params.include_checkboxes;
        let include_overlay = params.include_overlay;

        let mut result = tokio::task::spawn_blocking(move || {
            let Some(session) = analyzer.try_begin() else {
                tracing::info!(source = %source_name, "analysis already running, trigger ignored");
                return Ok(AnalyzeQuizResult::new(
                    source_name,
                    AnalysisStatus::AlreadyRunning,
                ));
            };
            let session = session.with_config(config).retain_rasters(include_overlay);

            let analysis = analyze_pdf_bytes(session, &data, password.as_deref(), pages.as_deref())?;
            AnalyzeQuizResult::completed(source_name, &analysis, include_checkboxes, include_overlay)
        })
        .await
        .map_err(|e| Error::Pdfium {
            reason: format!("Task join error: {}", e),
        })??;

        result.cache_key = cache_key;
        Ok(result)
    }

    /// Quiz JSON for a `file://` resource.
    ///
    /// A read that lands while another analysis holds the slot gets the `already_running` result
    /// back instead of a report; the caller can read again later.
    async fn resource_json(&self, uri: &str) -> Result<String, ErrorData> {
        let Some(path) = uri.strip_prefix("file://") else {
            return Err(ErrorData::invalid_params(
                "Only file:// URIs are supported",
                None,
            ));
        };

        if !self.config.resource_dirs.is_empty() && self.validate_path_access(path).is_err() {
            return Err(ErrorData::invalid_params(
                "Resource not found in configured directories",
                None,
            ));
        }

        let source = PdfSource::Path {
            path: path.to_string(),
        };
        let result = self
            .process_analyze_quiz(&source, &AnalyzeQuizParams::default())
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "read_resource failed");
                ErrorData::internal_error(e.client_message(), None)
            })?;

        let json = match &result.quiz {
            Some(quiz) => quiz.to_json(),
            None => serde_json::to_string_pretty(&result).map_err(Error::from),
        };
        json.map_err(|e| {
            tracing::warn!(error = %e, "read_resource serialization failed");
            ErrorData::internal_error(e.client_message(), None)
        })
    }

    fn process_list_pdfs(&self, params: &ListPdfsParams) -> crate::error::Result<ListPdfsResult> {
        let directory = params.directory.as_str();
        let denied = || Error::PathAccessDenied {
            path: directory.to_string(),
        };
        if !self.config.resource_dirs.is_empty() {
            let canonical = std::fs::canonicalize(directory).map_err(|_| denied())?;
            if !self.is_within_resource_dirs(&canonical) {
                return Err(denied());
            }
        }

        match std::fs::metadata(directory) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::SourceResolution {
                    reason: format!("{} is not a directory", directory),
                })
            }
            Err(_) => {
                return Err(Error::PdfNotFound {
                    path: directory.to_string(),
                })
            }
        }

        let name_filter = match params.pattern.as_deref() {
            Some(p) => Some(glob::Pattern::new(p).map_err(|e| Error::SourceResolution {
                reason: format!("Invalid pattern {:?}: {}", p, e),
            })?),
            None => None,
        };

        let mut files = pdf_files_in(Path::new(directory), params.recursive)?
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                if name_filter.as_ref().is_some_and(|f| !f.matches(&name)) {
                    return None;
                }
                Some(pdf_file_info(&path, name))
            })
            .collect::<Vec<_>>();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(ListPdfsResult {
            directory: directory.to_string(),
            total_count: files.len() as u32,
            files,
            error: None,
        })
    }
}

/// Regular files with a `.pdf` extension (any case) directly under `dir`, or at any depth
fn pdf_files_in(dir: &Path, recursive: bool) -> crate::error::Result<Vec<std::path::PathBuf>> {
    let root = glob::Pattern::escape(&dir.to_string_lossy());
    let walk = if recursive { "**/*" } else { "*" };
    let paths = glob::glob(&format!("{}/{}", root, walk)).map_err(|e| Error::SourceResolution {
        reason: format!("Invalid directory pattern: {}", e),
    })?;

    Ok(paths
        .filter_map(|entry| entry.ok())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect())
}

fn pdf_file_info(path: &Path, name: String) -> PdfFileInfo {
    let metadata = std::fs::metadata(path).ok();
    PdfFileInfo {
        path: path.to_string_lossy().into_owned(),
        name,
        size: metadata.as_ref().map_or(0, |m| m.len()),
        modified: metadata
            .and_then(|m| m.modified().ok())
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339()),
    }
}

impl Default for QuizServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tool_handler]
impl ServerHandler for QuizServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Quiz PDF server: analyze_quiz extracts questions, answers, and checked \
                 checkboxes from quiz PDFs. PDF files in configured directories are also \
                 exposed as resources whose content is the quiz JSON."
                    .into(),
            ),
        }
    }

    /// List quiz PDFs from configured directories
    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let mut resources = Vec::new();

        for dir in self.config.resource_dirs.iter() {
            let params = ListPdfsParams {
                directory: dir.clone(),
                recursive: true,
                pattern: None,
            };

            let Ok(listing) = self.process_list_pdfs(&params) else {
                continue;
            };
            for file in listing.files {
                let mut resource = RawResource::new(format!("file://{}", file.path), file.name);
                resource.mime_type = Some("application/pdf".to_string());
                resource.description = Some(format!("Quiz PDF ({} bytes)", file.size));
                resource.size = Some(file.size as u32);

                resources.push(Annotated {
                    raw: resource,
                    annotations: None,
                });
            }
        }

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: Default::default(),
        })
    }

    /// Read a PDF resource as its quiz JSON
    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let uri = &request.uri;
        let text = self.resource_json(uri).await?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: uri.clone(),
                mime_type: Some("application/json".to_string()),
                text,
                meta: Default::default(),
            }],
        })
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    tracing::info!(
        resource_dirs = config.resource_dirs.len(),
        upload_ttl_secs = config.upload_ttl.as_secs(),
        "Quiz MCP Server ready, waiting for connections..."
    );

    let server = QuizServer::with_config(config);
    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::{Answer, PageAnalysis, PageFailure, Question};
    use base64::Engine;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn encode(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    fn parse_results(response: &str) -> Vec<serde_json::Value> {
        let value: serde_json::Value = serde_json::from_str(response).unwrap();
        value["results"].as_array().unwrap().clone()
    }

    fn base64_params(payload: &[u8]) -> AnalyzeQuizParams {
        AnalyzeQuizParams {
            sources: vec![PdfSource::Base64 {
                base64: encode(payload),
            }],
            ..AnalyzeQuizParams::default()
        }
    }

    #[test]
    fn test_source_name() {
        assert_eq!(
            QuizServer::source_name(&PdfSource::Path {
                path: "/quiz.pdf".to_string()
            }),
            "/quiz.pdf"
        );
        assert_eq!(
            QuizServer::source_name(&PdfSource::Base64 {
                base64: "...".to_string()
            }),
            "<base64>"
        );
        assert_eq!(
            QuizServer::source_name(&PdfSource::CacheRef {
                cache_key: "abc123".to_string()
            }),
            "<cache:abc123>"
        );
    }

    #[test]
    fn test_pdf_source_deserialization() {
        let source: PdfSource = serde_json::from_str(r#"{"path": "/quiz.pdf"}"#).unwrap();
        assert!(matches!(source, PdfSource::Path { .. }));

        let source: PdfSource = serde_json::from_str(r#"{"base64": "JVBERi0xLjQ="}"#).unwrap();
        assert!(matches!(source, PdfSource::Base64 { .. }));

        let source: PdfSource =
            serde_json::from_str(r#"{"url": "https://example.com/quiz.pdf"}"#).unwrap();
        assert!(matches!(source, PdfSource::Url { .. }));

        let source: PdfSource = serde_json::from_str(r#"{"cache_key": "abc123"}"#).unwrap();
        assert!(matches!(source, PdfSource::CacheRef { .. }));
    }

    #[test]
    fn test_pdf_source_deserialization_errors() {
        let err = serde_json::from_str::<PdfSource>(r#""/quiz.pdf""#).unwrap_err();
        assert!(err.to_string().contains("got \"/quiz.pdf\""));

        let err = serde_json::from_str::<PdfSource>(r#"{"path": 3}"#).unwrap_err();
        assert!(err.to_string().contains("\"path\" must be a string"));

        let err = serde_json::from_str::<PdfSource>(r#"{"file": "/quiz.pdf"}"#).unwrap_err();
        assert!(err.to_string().contains("file"));
    }

    #[test]
    fn test_analyze_params_deserialization() {
        let json = r##"{
            "sources": [{"path": "/quiz.pdf"}],
            "pages": "1-2",
            "ink_color": "#FF0000",
            "alignment": "compatible",
            "include_overlay": true
        }"##;
        let params: AnalyzeQuizParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.pages, Some("1-2".to_string()));
        assert_eq!(params.alignment, Some(AlignmentMode::Compatible));
        assert!(params.include_overlay);
        assert!(!params.include_checkboxes);
        assert!(!params.cache);
        assert!(params.tuning.is_none());
    }

    #[test]
    fn test_server_config_from_vars() {
        let dirs = std::env::join_paths(["/srv/quizzes", "/tmp/uploads"]).unwrap();
        let vars: HashMap<&str, String> = HashMap::from([
            ("QUIZ_RESOURCE_DIRS", dirs.to_string_lossy().into_owned()),
            ("QUIZ_ALLOW_PRIVATE_URLS", "true".to_string()),
            ("QUIZ_UPLOAD_TTL_SECS", "120".to_string()),
        ]);

        let config = ServerConfig::from_vars(|name| vars.get(name).cloned());
        assert_eq!(config.resource_dirs, vec!["/srv/quizzes", "/tmp/uploads"]);
        assert!(config.allow_private_urls);
        assert_eq!(config.upload_ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_server_config_from_vars_defaults() {
        let config = ServerConfig::from_vars(|name| {
            (name == "QUIZ_UPLOAD_TTL_SECS").then(|| "soon".to_string())
        });
        assert!(config.resource_dirs.is_empty());
        assert!(!config.allow_private_urls);
        assert_eq!(config.upload_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_analysis_config_overrides() {
        let server = QuizServer::new();
        let params = AnalyzeQuizParams {
            ink_color: Some("#FF0000".to_string()),
            render_scale: Some(2.6),
            alignment: Some(AlignmentMode::Compatible),
            ..AnalyzeQuizParams::default()
        };

        let config = server.analysis_config(&params).unwrap();
        assert_eq!(config.ink_color.to_hex(), "#FF0000");
        assert_eq!(config.render_scale, 2.6);
        assert_eq!(config.expected_box_size, 36);
        assert_eq!(config.alignment, AlignmentMode::Compatible);

        let defaults = server.analysis_config(&AnalyzeQuizParams::default()).unwrap();
        assert_eq!(defaults, AnalysisConfig::default());
    }

    #[test]
    fn test_analysis_config_tuning_base() {
        let server = QuizServer::new();
        let params = AnalyzeQuizParams {
            tuning: Some(AnalysisConfig {
                fill_threshold: 0.8,
                ..AnalysisConfig::default()
            }),
            alignment: Some(AlignmentMode::Compatible),
            ..AnalyzeQuizParams::default()
        };

        let config = server.analysis_config(&params).unwrap();
        assert_eq!(config.fill_threshold, 0.8);
        assert_eq!(config.alignment, AlignmentMode::Compatible);
    }

    #[test]
    fn test_analysis_config_rejects_bad_input() {
        let server = QuizServer::new();
        for scale in [0.0, -1.0, 50.0, f32::NAN] {
            let params = AnalyzeQuizParams {
                render_scale: Some(scale),
                ..AnalyzeQuizParams::default()
            };
            assert!(matches!(
                server.analysis_config(&params),
                Err(Error::InvalidRenderScale { .. })
            ));
        }

        let params = AnalyzeQuizParams {
            ink_color: Some("teal".to_string()),
            ..AnalyzeQuizParams::default()
        };
        assert!(matches!(
            server.analysis_config(&params),
            Err(Error::InvalidInkColor { .. })
        ));
    }

    #[test]
    fn test_completed_result() {
        let raster = image::RgbaImage::from_pixel(30, 30, image::Rgba([255, 255, 255, 255]));
        let analysis = QuizAnalysis {
            pages: vec![PageAnalysis {
                page_num: 1,
                checkboxes: vec![Checkbox {
                    page_num: 1,
                    x: 12.0,
                    y: 12.0,
                    width: 18,
                    height: 18,
                    filled: true,
                }],
                questions: vec![Question {
                    text: "Pick one".to_string(),
                    index: "1/1".to_string(),
                    points: "2".to_string(),
                    page_num: 1,
                    answers: vec![Answer {
                        checked: true,
                        ..Answer::image(1)
                    }],
                }],
                raster: Some(raster),
            }],
            failed_pages: vec![PageFailure {
                page_num: 2,
                reason: "render failed".to_string(),
            }],
        };

        let result =
            AnalyzeQuizResult::completed("quiz.pdf".to_string(), &analysis, true, true).unwrap();
        assert_eq!(result.status, AnalysisStatus::Completed);
        assert_eq!(result.quiz.as_ref().unwrap().total_questions, 1);
        assert_eq!(result.checkboxes.as_ref().unwrap().len(), 1);
        assert_eq!(result.overlays.as_ref().unwrap()[0].page, 1);
        assert_eq!(result.failed_pages, vec![2]);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["quiz"]["totalQuestions"], 1);
        assert_eq!(json["quiz"]["questions"][0]["answers"][0]["isImage"], true);

        let bare =
            AnalyzeQuizResult::completed("quiz.pdf".to_string(), &analysis, false, false).unwrap();
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("checkboxes").is_none());
        assert!(json.get("overlays").is_none());
    }

    #[tokio::test]
    async fn test_analyze_quiz_rejects_non_pdf() {
        let server = QuizServer::new();
        let response = server
            .analyze_quiz(Parameters(base64_params(b"Hello World")))
            .await;

        let results = parse_results(&response);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["status"], "failed");
        assert_eq!(results[0]["source"], "<base64>");
        assert_eq!(results[0]["error"], "Invalid PDF file");
        assert!(!server.analyzer().is_running());
    }

    #[tokio::test]
    async fn test_analyze_quiz_while_running() {
        let server = QuizServer::new();
        let _session = server.analyzer().try_begin().unwrap();

        let response = server
            .analyze_quiz(Parameters(base64_params(b"%PDF-1.4 quiz")))
            .await;

        let results = parse_results(&response);
        assert_eq!(results[0]["status"], "already_running");
        assert!(results[0].get("quiz").is_none());
        assert!(results[0].get("error").is_none());
    }

    #[tokio::test]
    async fn test_resource_read_while_running() {
        let server = QuizServer::new();
        let _session = server.analyzer().try_begin().unwrap();

        let text = server.resource_json("file:///srv/quizzes/week1.pdf").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "already_running");
        assert_eq!(value["source"], "/srv/quizzes/week1.pdf");
        assert!(value.get("quiz").is_none());
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn test_resource_read_rejects_non_file_uri() {
        let server = QuizServer::new();
        assert!(server.resource_json("https://example.com/q.pdf").await.is_err());
    }

    #[tokio::test]
    async fn test_analyze_quiz_invalid_override() {
        let server = QuizServer::new();
        let params = AnalyzeQuizParams {
            ink_color: Some("#12".to_string()),
            ..base64_params(b"%PDF-1.4 quiz")
        };

        let results = parse_results(&server.analyze_quiz(Parameters(params)).await);
        assert_eq!(results[0]["status"], "failed");
        assert_eq!(results[0]["error"], "Invalid ink color: #12");
    }

    #[tokio::test]
    async fn test_upload_then_resolve() {
        let server = QuizServer::new();
        let response = server
            .upload_pdf(Parameters(UploadPdfParams {
                name: "exam.pdf".to_string(),
                base64: encode(b"%PDF-1.4 exam"),
            }))
            .await;

        let results = parse_results(&response);
        assert!(results[0].get("error").is_none());
        assert_eq!(results[0]["expires_in_secs"], 60);
        assert!(results[0]["file_name"].as_str().unwrap().ends_with("-exam.pdf"));

        let cache_key = results[0]["cache_key"].as_str().unwrap().to_string();
        let resolved = server
            .resolve_source(&PdfSource::CacheRef { cache_key })
            .await
            .unwrap();
        assert_eq!(resolved.data, b"%PDF-1.4 exam");
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf() {
        let server = QuizServer::new();
        let response = server
            .upload_pdf(Parameters(UploadPdfParams {
                name: "notes.txt".to_string(),
                base64: encode(b"just text"),
            }))
            .await;

        let results = parse_results(&response);
        assert_eq!(results[0]["error"], "Invalid PDF file");
        assert!(results[0].get("cache_key").is_none());
    }

    #[test]
    fn test_expired_upload_not_resolvable() {
        let server = QuizServer::with_config(ServerConfig {
            upload_ttl: Duration::ZERO,
            ..ServerConfig::default()
        });
        let stored = store_upload(&server.cache, "exam.pdf", &encode(b"%PDF-1.4")).unwrap();

        let result = tokio_test::block_on(server.resolve_source(&PdfSource::CacheRef {
            cache_key: stored.cache_key,
        }));
        assert!(matches!(result, Err(Error::CacheKeyNotFound { .. })));
    }

    #[test]
    fn test_list_pdfs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("exam1.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("Exam2.PDF"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"notes").unwrap();
        std::fs::create_dir(dir.path().join("archive")).unwrap();
        std::fs::write(dir.path().join("archive/old.pdf"), b"%PDF-1.4").unwrap();

        let server = QuizServer::new();
        let directory = dir.path().to_string_lossy().to_string();

        let flat = server
            .process_list_pdfs(&ListPdfsParams {
                directory: directory.clone(),
                recursive: false,
                pattern: None,
            })
            .unwrap();
        assert_eq!(flat.total_count, 2);
        assert!(flat.files.iter().all(|f| f.size == 8 && f.modified.is_some()));

        let recursive = server
            .process_list_pdfs(&ListPdfsParams {
                directory: directory.clone(),
                recursive: true,
                pattern: None,
            })
            .unwrap();
        assert_eq!(recursive.total_count, 3);

        let filtered = server
            .process_list_pdfs(&ListPdfsParams {
                directory,
                recursive: true,
                pattern: Some("exam*".to_string()),
            })
            .unwrap();
        assert_eq!(filtered.total_count, 1);
        assert_eq!(filtered.files[0].name, "exam1.pdf");
    }

    #[test]
    fn test_list_pdfs_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("quiz.pdf");
        std::fs::write(&file, b"%PDF-1.4").unwrap();
        let server = QuizServer::new();

        let list = |directory: &Path, pattern: Option<&str>| {
            server.process_list_pdfs(&ListPdfsParams {
                directory: directory.to_string_lossy().to_string(),
                recursive: false,
                pattern: pattern.map(str::to_string),
            })
        };

        assert!(matches!(list(&file, None), Err(Error::SourceResolution { .. })));
        assert!(matches!(
            list(&dir.path().join("missing"), None),
            Err(Error::PdfNotFound { .. })
        ));
        assert!(matches!(
            list(dir.path(), Some("[unclosed")),
            Err(Error::SourceResolution { .. })
        ));
    }

    #[test]
    fn test_list_pdfs_outside_resource_dirs() {
        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let server = QuizServer::with_config(ServerConfig {
            resource_dirs: vec![allowed.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });

        let result = server.process_list_pdfs(&ListPdfsParams {
            directory: other.path().to_string_lossy().to_string(),
            recursive: false,
            pattern: None,
        });
        assert!(matches!(result, Err(Error::PathAccessDenied { .. })));

        let result = server.process_list_pdfs(&ListPdfsParams {
            directory: allowed.path().to_string_lossy().to_string(),
            recursive: false,
            pattern: None,
        });
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_path_source_outside_resource_dirs() {
        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("quiz.pdf");
        std::fs::write(&outside, b"%PDF-1.4").unwrap();

        let server = QuizServer::with_config(ServerConfig {
            resource_dirs: vec![allowed.path().to_string_lossy().to_string()],
            ..ServerConfig::default()
        });
        let params = AnalyzeQuizParams {
            sources: vec![PdfSource::Path {
                path: outside.to_string_lossy().to_string(),
            }],
            ..AnalyzeQuizParams::default()
        };

        let results = parse_results(&server.analyze_quiz(Parameters(params)).await);
        assert_eq!(results[0]["status"], "failed");
        assert_eq!(results[0]["error"], "Access denied");
    }
}
