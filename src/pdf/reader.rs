//! PDFium-backed page source for quiz analysis

use crate::error::{Error, Result};
use crate::quiz::{AnalysisSession, PageSource, QuizAnalysis, TextToken};
use image::RgbaImage;
use pdfium_render::prelude::*;

/// Bind a PDFium instance (a new one per document; PDFium is not thread-safe)
pub fn create_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Reject buffers that do not start with the PDF magic bytes
pub fn check_pdf_header(data: &[u8]) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    Ok(())
}

/// An open PDF document that can be rasterized and read page by page
pub struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumDocument<'a> {
    /// Open a document from bytes
    pub fn open(pdfium: &'a Pdfium, data: &'a [u8], password: Option<&'a str>) -> Result<Self> {
        check_pdf_header(data)?;

        let document = pdfium
            .load_pdf_from_byte_slice(data, password)
            .map_err(map_open_error)?;

        Ok(Self { document })
    }

    fn page(&self, page_num: u32) -> Result<PdfPage<'a>> {
        let total = self.page_count();
        if page_num < 1 || page_num > total {
            return Err(Error::PageOutOfBounds {
                page: page_num,
                total,
            });
        }

        self.document
            .pages()
            .get((page_num - 1) as u16)
            .map_err(|e| Error::PageRender {
                page: page_num,
                reason: format!("Failed to get page: {}", e),
            })
    }
}

impl PageSource for PdfiumDocument<'_> {
    fn page_count(&self) -> u32 {
        self.document.pages().len() as u32
    }

    fn render_page(&self, page_num: u32, scale: f32) -> Result<RgbaImage> {
        let page = self.page(page_num)?;
        let config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .render_form_data(true)
            .render_annotations(true);

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| Error::PageRender {
                page: page_num,
                reason: e.to_string(),
            })?;

        Ok(bitmap.as_image().to_rgba8())
    }

    fn text_tokens(&self, page_num: u32) -> Result<Vec<TextToken>> {
        let page = self.page(page_num)?;
        let text = page.text().map_err(|e| Error::PageRender {
            page: page_num,
            reason: format!("Failed to read text layer: {}", e),
        })?;

        let segments = text.segments();
        let runs = segments.iter().map(|segment| {
            let bounds = segment.bounds();
            TextRun {
                text: segment.text(),
                x: bounds.left().value,
                y: bounds.bottom().value,
            }
        });

        Ok(runs_to_tokens(runs))
    }
}

/// Baseline shift, in PDF units, that starts a new text line
const LINE_CHANGE: f32 = 2.0;

/// One run of the text layer: characters PDFium reports as a single rectangle
#[derive(Debug, Clone, PartialEq)]
struct TextRun {
    text: String,
    x: f32,
    y: f32,
}

/// One token per non-empty run, in engine order, with a blank token closing every line
fn runs_to_tokens(runs: impl IntoIterator<Item = TextRun>) -> Vec<TextToken> {
    let mut tokens: Vec<TextToken> = Vec::new();

    for run in runs {
        let text = run.text.trim();
        if text.is_empty() {
            continue;
        }
        if let Some((x, y)) = tokens.last().map(|prev| (prev.x, prev.y)) {
            if (y - run.y).abs() > LINE_CHANGE {
                tokens.push(TextToken::new(x, y, ""));
            }
        }
        tokens.push(TextToken::new(run.x, run.y, text));
    }

    tokens
}

fn map_open_error(err: PdfiumError) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            Error::PasswordRequired
        }
        _ => Error::DocumentUnreadable {
            reason: err.to_string(),
        },
    }
}

/// Run a quiz analysis over PDF bytes inside an already-acquired session.
///
/// `pages` is a page range string such as "1-3,5"; all pages are analyzed when absent.
pub fn analyze_pdf_bytes(
    session: AnalysisSession<'_>,
    data: &[u8],
    password: Option<&str>,
    pages: Option<&str>,
) -> Result<QuizAnalysis> {
    let pdfium = create_pdfium()?;
    let document = PdfiumDocument::open(&pdfium, data, password)?;

    let selected = pages
        .map(|range| parse_page_range(range, document.page_count()))
        .transpose()?;

    Ok(session.run(&document, selected.as_deref()))
}

/// Expand a page range such as `"1-3,5"` into sorted, distinct 1-based page numbers.
///
/// Every span must lie within `1..=max_pages`; empty parts are ignored.
pub fn parse_page_range(range: &str, max_pages: u32) -> Result<Vec<u32>> {
    let invalid = || Error::InvalidPageRange {
        range: range.to_string(),
    };

    let mut pages = Vec::new();
    for part in range.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let span = parse_span(part).ok_or_else(invalid)?;
        if *span.start() == 0 || *span.end() > max_pages || span.is_empty() {
            return Err(invalid());
        }
        pages.extend(span);
    }

    pages.sort_unstable();
    pages.dedup();
    Ok(pages)
}

fn parse_span(part: &str) -> Option<std::ops::RangeInclusive<u32>> {
    let number = |s: &str| s.trim().parse::<u32>().ok();
    match part.split_once('-') {
        Some((start, end)) => Some(number(start)?..=number(end)?),
        None => number(part).map(|page| page..=page),
    }
}
