//! Checkbox classification: border validation, fill detection, deduplication

use crate::quiz::config::AnalysisConfig;
use crate::quiz::model::Checkbox;
use crate::quiz::scanner::{scan_candidates, BoundingBox, InkMask};
use image::RgbaImage;

/// Detect every checkbox on a page raster, in scan order.
pub fn detect_checkboxes(image: &RgbaImage, page_num: u32, config: &AnalysisConfig) -> Vec<Checkbox> {
    let mask = InkMask::from_image(image, &config.color_matcher());
    let candidates = scan_candidates(&mask, config);
    let candidate_count = candidates.len();

    let mut checkboxes = Vec::new();
    for candidate in &candidates {
        if let Some(checkbox) = classify_candidate(candidate, &mask, &checkboxes, page_num, config) {
            checkboxes.push(checkbox);
        }
    }

    tracing::debug!(
        page = page_num,
        candidates = candidate_count,
        checkboxes = checkboxes.len(),
        filled = checkboxes.iter().filter(|c| c.filled).count(),
        "checkbox detection finished"
    );
    checkboxes
}

/// Turn a candidate component into a checkbox, or drop it.
///
/// A candidate is dropped when too little of its edge ring is ink, or when its center lies
/// within `duplicate_distance` of a checkbox already accepted on the same page.
pub fn classify_candidate(
    candidate: &BoundingBox,
    mask: &InkMask,
    accepted: &[Checkbox],
    page_num: u32,
    config: &AnalysisConfig,
) -> Option<Checkbox> {
    if border_ratio(candidate, mask) < config.border_match_threshold {
        return None;
    }

    let filled = fill_ratio(candidate, mask) > config.fill_threshold;
    let (center_x, center_y) = candidate.center();

    let is_duplicate = accepted.iter().any(|checkbox| {
        checkbox.page_num == page_num
            && checkbox.distance_to(center_x, center_y) < config.duplicate_distance
    });
    if is_duplicate {
        return None;
    }

    Some(Checkbox {
        page_num,
        x: center_x,
        y: center_y,
        width: candidate.width(),
        height: candidate.height(),
        filled,
    })
}

/// Share of the one-pixel edge ring that is ink
fn border_ratio(b: &BoundingBox, mask: &InkMask) -> f32 {
    let (w, h) = (b.width(), b.height());
    let total = 2 * (w + h) - 4;
    if total == 0 {
        return 0.0;
    }

    let mut matched = (b.min_x..=b.max_x)
        .map(|x| mask.is_ink(x, b.min_y) as usize + mask.is_ink(x, b.max_y) as usize)
        .sum::<usize>();
    if b.max_y > b.min_y + 1 {
        matched += (b.min_y + 1..b.max_y)
            .map(|y| mask.is_ink(b.min_x, y) as usize + mask.is_ink(b.max_x, y) as usize)
            .sum::<usize>();
    }

    matched as f32 / total as f32
}

/// Share of the strict interior (edge ring excluded) that is ink
fn fill_ratio(b: &BoundingBox, mask: &InkMask) -> f32 {
    let (w, h) = (b.width(), b.height());
    if w < 3 || h < 3 {
        return 0.0;
    }

    let area = (w - 2) * (h - 2);
    let count = mask.count_ink(b.min_x + 1, b.max_x - 1, b.min_y + 1, b.max_y - 1);
    count as f32 / area as f32
}
