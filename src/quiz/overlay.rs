//! Debug overlay: detected checkboxes drawn over the page raster

use crate::error::Result;
use crate::quiz::model::{Checkbox, PageAnalysis};
use base64::Engine;
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::Serialize;

const FILLED_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
const EMPTY_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const LINE_THICKNESS: u32 = 2;

/// One checkbox rectangle as drawn on the overlay.
///
/// The rectangle is derived from the checkbox center: `left = x - width/2`, `top = y - height/2`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayMark {
    /// Per-page detection index, shown as the mark's label
    pub index: usize,
    pub page_num: u32,
    pub left: f32,
    pub top: f32,
    pub width: u32,
    pub height: u32,
    pub filled: bool,
    /// "blue" for filled, "red" for empty
    pub color: &'static str,
    pub label_x: f32,
    pub label_y: f32,
}

/// A rendered overlay for one page
#[derive(Debug, Clone, Serialize)]
pub struct PageOverlay {
    pub page: u32,
    pub width: u32,
    pub height: u32,
    pub marks: Vec<OverlayMark>,
    /// Base64-encoded PNG
    pub data_base64: String,
    pub mime_type: String,
}

/// Overlay marks for one page's checkboxes, indexed in detection order
pub fn overlay_marks(checkboxes: &[Checkbox]) -> Vec<OverlayMark> {
    checkboxes
        .iter()
        .enumerate()
        .map(|(index, cb)| {
            let left = cb.x - cb.width as f32 / 2.0;
            let top = cb.y - cb.height as f32 / 2.0;
            OverlayMark {
                index,
                page_num: cb.page_num,
                left,
                top,
                width: cb.width,
                height: cb.height,
                filled: cb.filled,
                color: if cb.filled { "blue" } else { "red" },
                label_x: left - 15.0,
                label_y: top + 12.0,
            }
        })
        .collect()
}

/// Draw the marks over a copy of the raster
pub fn draw_overlay(raster: &RgbaImage, marks: &[OverlayMark]) -> RgbaImage {
    let mut img = raster.clone();

    for mark in marks {
        let color = if mark.filled { FILLED_COLOR } else { EMPTY_COLOR };
        let x = mark.left.floor() as i32;
        let y = mark.top.floor() as i32;

        for t in 0..LINE_THICKNESS {
            let inner_w = mark.width.saturating_sub(2 * t);
            let inner_h = mark.height.saturating_sub(2 * t);
            if inner_w > 0 && inner_h > 0 {
                let rect = Rect::at(x + t as i32, y + t as i32).of_size(inner_w, inner_h);
                draw_hollow_rect_mut(&mut img, rect, color);
            }
        }
    }

    img
}

/// Render the overlay for a page whose raster was retained.
///
/// Returns `None` when the page was analyzed without keeping its raster.
pub fn render_page_overlay(page: &PageAnalysis) -> Option<Result<PageOverlay>> {
    let raster = page.raster.as_ref()?;
    let marks = overlay_marks(&page.checkboxes);
    let img = draw_overlay(raster, &marks);

    Some(encode_png_base64(&img).map(|data_base64| PageOverlay {
        page: page.page_num,
        width: img.width(),
        height: img.height(),
        marks,
        data_base64,
        mime_type: "image/png".to_string(),
    }))
}

fn encode_png_base64(img: &RgbaImage) -> Result<String> {
    let mut png_bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut png_bytes),
        image::ImageFormat::Png,
    )?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&png_bytes))
}
