//! Page orchestration and the single-slot analysis guard

use crate::error::Result;
use crate::quiz::aligner::align_document;
use crate::quiz::checkbox::detect_checkboxes;
use crate::quiz::config::AnalysisConfig;
use crate::quiz::grouper::group_questions;
use crate::quiz::model::{Checkbox, PageAnalysis, QuizReport, TextToken};
use image::RgbaImage;
use parking_lot::Mutex;

/// Rendering engine seen by the pipeline.
///
/// Pages are 1-indexed.
pub trait PageSource {
    fn page_count(&self) -> u32;

    /// Rasterize a page at `scale`
    fn render_page(&self, page_num: u32, scale: f32) -> Result<RgbaImage>;

    /// Positioned text tokens of a page, in the engine's reading order
    fn text_tokens(&self, page_num: u32) -> Result<Vec<TextToken>>;
}

/// Where an analysis currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPhase {
    Idle,
    Rendering { page: u32 },
    Scanning { page: u32 },
    Extracting { page: u32 },
    Aligning,
    Done,
}

/// A page that contributed nothing because the engine failed on it
#[derive(Debug, Clone, PartialEq)]
pub struct PageFailure {
    pub page_num: u32,
    pub reason: String,
}

/// Result of one full document run
#[derive(Debug, Clone, Default)]
pub struct QuizAnalysis {
    /// Successfully analyzed pages, in processing order
    pub pages: Vec<PageAnalysis>,
    pub failed_pages: Vec<PageFailure>,
}

impl QuizAnalysis {
    /// Build the output artifact
    pub fn report(&self) -> QuizReport {
        QuizReport::new(
            self.pages
                .iter()
                .flat_map(|page| page.questions.iter().cloned())
                .collect(),
        )
    }

    pub fn checkboxes(&self) -> Vec<Checkbox> {
        self.pages
            .iter()
            .flat_map(|page| page.checkboxes.iter().copied())
            .collect()
    }

    pub fn question_count(&self) -> usize {
        self.pages.iter().map(|page| page.questions.len()).sum()
    }
}

/// Outcome of triggering an analysis
#[derive(Debug)]
pub enum AnalysisOutcome {
    Completed(QuizAnalysis),
    /// Another analysis held the slot; nothing was done
    AlreadyRunning,
}

/// Owns the analysis slot: at most one document is analyzed at a time.
pub struct QuizAnalyzer {
    config: AnalysisConfig,
    phase: Mutex<AnalysisPhase>,
}

impl QuizAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            phase: Mutex::new(AnalysisPhase::Idle),
        }
    }

    /// Default configuration for sessions started on this analyzer
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn phase(&self) -> AnalysisPhase {
        *self.phase.lock()
    }

    pub fn is_running(&self) -> bool {
        self.phase() != AnalysisPhase::Idle
    }

    /// Claim the slot. Returns `None` while another session holds it.
    pub fn try_begin(&self) -> Option<AnalysisSession<'_>> {
        let mut phase = self.phase.lock();
        if *phase != AnalysisPhase::Idle {
            tracing::debug!(phase = ?*phase, "analysis already in progress, trigger ignored");
            return None;
        }
        *phase = AnalysisPhase::Rendering { page: 1 };
        drop(phase);

        Some(AnalysisSession {
            analyzer: self,
            config: self.config.clone(),
            retain_rasters: false,
        })
    }

    /// Analyze every page of `source` with the default configuration
    pub fn analyze<S: PageSource + ?Sized>(&self, source: &S) -> AnalysisOutcome {
        match self.try_begin() {
            Some(session) => AnalysisOutcome::Completed(session.run(source, None)),
            None => AnalysisOutcome::AlreadyRunning,
        }
    }
}

impl Default for QuizAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisConfig::default())
    }
}

/// A claimed analysis slot. The slot is released when the session is dropped.
pub struct AnalysisSession<'a> {
    analyzer: &'a QuizAnalyzer,
    config: AnalysisConfig,
    retain_rasters: bool,
}

impl<'a> AnalysisSession<'a> {
    /// Use `config` instead of the analyzer's default for this run
    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep page rasters in the result (for debug overlays)
    pub fn retain_rasters(mut self, retain: bool) -> Self {
        self.retain_rasters = retain;
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run the pipeline over `pages` (all pages when `None`), strictly in the given order.
    ///
    /// Engine failures on a page are logged and leave that page out; they never abort the run.
    pub fn run<S: PageSource + ?Sized>(self, source: &S, pages: Option<&[u32]>) -> QuizAnalysis {
        let page_numbers: Vec<u32> = match pages {
            Some(pages) => pages.to_vec(),
            None => (1..=source.page_count()).collect(),
        };

        tracing::info!(pages = page_numbers.len(), "quiz analysis started");
        let mut analysis = QuizAnalysis::default();

        for page_num in page_numbers {
            match self.analyze_page(source, page_num) {
                Ok(page) => analysis.pages.push(page),
                Err(e) => {
                    tracing::warn!(page = page_num, error = %e, "page skipped");
                    analysis.failed_pages.push(PageFailure {
                        page_num,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.set_phase(AnalysisPhase::Aligning);
        align_document(&mut analysis.pages, self.config.alignment);
        self.set_phase(AnalysisPhase::Done);

        tracing::info!(
            questions = analysis.question_count(),
            failed_pages = analysis.failed_pages.len(),
            "quiz analysis finished"
        );
        analysis
    }

    fn analyze_page<S: PageSource + ?Sized>(&self, source: &S, page_num: u32) -> Result<PageAnalysis> {
        self.set_phase(AnalysisPhase::Rendering { page: page_num });
        let raster = source.render_page(page_num, self.config.render_scale)?;

        self.set_phase(AnalysisPhase::Scanning { page: page_num });
        let checkboxes = detect_checkboxes(&raster, page_num, &self.config);
        let raster = self.retain_rasters.then_some(raster);

        self.set_phase(AnalysisPhase::Extracting { page: page_num });
        let tokens = source.text_tokens(page_num)?;
        let questions = group_questions(&tokens, page_num, &checkboxes, &self.config);

        Ok(PageAnalysis {
            page_num,
            checkboxes,
            questions,
            raster,
        })
    }

    fn set_phase(&self, phase: AnalysisPhase) {
        tracing::debug!(?phase, "analysis phase");
        *self.analyzer.phase.lock() = phase;
    }
}

impl Drop for AnalysisSession<'_> {
    fn drop(&mut self) {
        *self.analyzer.phase.lock() = AnalysisPhase::Idle;
    }
}
