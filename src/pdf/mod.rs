//! PDF processing layer
//!
//! Rasterization and text-layer extraction through PDFium.

mod reader;

pub use reader::{
    analyze_pdf_bytes, check_pdf_header, create_pdfium, parse_page_range, PdfiumDocument,
};
