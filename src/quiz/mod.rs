//! Quiz analysis pipeline
//!
//! Turns rendered PDF pages into structured quiz data:
//! - `scanner` + `checkbox`: find checkbox glyphs in a page raster and decide whether they are filled
//! - `grouper`: stitch the page's text tokens into questions and answers
//! - `aligner`: copy checkbox fill state onto the answers, page by page
//! - `analyzer`: drive the pages through the pipeline and guard against re-entrant runs
//!
//! The rendering engine is abstracted behind [`PageSource`] so the pipeline can run against
//! PDFium (see [`crate::pdf`]) or synthetic pages.

pub mod aligner;
pub mod analyzer;
pub mod checkbox;
pub mod color;
pub mod config;
pub mod grouper;
pub mod model;
pub mod overlay;
pub mod scanner;

pub use aligner::{align_document, align_page};
pub use analyzer::{
    AnalysisOutcome, AnalysisPhase, AnalysisSession, PageFailure, PageSource, QuizAnalysis,
    QuizAnalyzer,
};
pub use checkbox::{classify_candidate, detect_checkboxes};
pub use color::{ColorMatcher, InkColor};
pub use config::{AlignmentMode, AnalysisConfig};
pub use grouper::{find_anchors, group_questions, Anchor};
pub use model::{Answer, Checkbox, PageAnalysis, Question, QuizReport, TextToken};
pub use overlay::{draw_overlay, overlay_marks, render_page_overlay, OverlayMark, PageOverlay};
pub use scanner::{scan_candidates, BoundingBox, InkMask};
