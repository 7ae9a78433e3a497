//! Quiz PDF analysis server library
//!
//! Renders quiz PDFs, detects checkbox glyphs and their fill state, and groups the page text
//! into questions and answers. Exposed as MCP tools:
//! - `analyze_quiz`: Analyze PDFs into a `{ totalQuestions, questions }` document
//! - `upload_pdf`: Store a PDF for a limited time and get a cache key back
//! - `list_pdfs`: List PDF files in a directory

pub mod error;
pub mod pdf;
pub mod quiz;
pub mod server;
pub mod source;

pub use error::{Error, Result};
pub use quiz::{AlignmentMode, AnalysisConfig, QuizAnalyzer, QuizReport};
pub use server::{
    run_server, run_server_with_config, AnalysisStatus, AnalyzeQuizParams, AnalyzeQuizResult,
    ListPdfsParams, ListPdfsResult, PdfFileInfo, PdfSource, QuizServer, ServerConfig,
    UploadPdfParams, UploadPdfResult,
};
