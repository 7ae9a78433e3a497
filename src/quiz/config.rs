//! Tuning parameters for the analysis pipeline

use crate::quiz::color::{ColorMatcher, InkColor, DEFAULT_COLOR_TOLERANCE, DEFAULT_INK_COLOR};
use crate::quiz::model::Answer;
use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Render scale the pixel-space defaults were tuned for
pub const BASELINE_RENDER_SCALE: f32 = 1.3;

const BASELINE_BOX_SIZE: u32 = 18;
const BASELINE_BOX_TOLERANCE: u32 = 5;
const BASELINE_DUPLICATE_DISTANCE: f32 = 10.0;
const BASELINE_ROW_CLUSTER_THRESHOLD: f32 = 20.0;

/// Which answers take a checkbox slot when checkboxes are handed out in detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentMode {
    /// Only checkbox (image) answers consume checkboxes. Text answers keep `checked = false`.
    #[default]
    ImageAnswersOnly,
    /// Every answer consumes a checkbox, text answers included. Pages that mix text and
    /// checkbox questions can shift fill state onto the wrong answers.
    Compatible,
}

impl AlignmentMode {
    pub fn consumes_checkbox(&self, answer: &Answer) -> bool {
        match self {
            AlignmentMode::ImageAnswersOnly => answer.is_image(),
            AlignmentMode::Compatible => true,
        }
    }
}

/// Heuristics injected into the scanner, classifier and grouper.
///
/// Pixel-space values are relative to a raster rendered at `render_scale`;
/// text-space values are in the rendering engine's text units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Scale factor pages are rasterized at
    pub render_scale: f32,
    /// Accent color of checkbox glyphs, as `#RRGGBB`
    #[schemars(with = "String")]
    pub ink_color: InkColor,
    /// Per-channel tolerance for ink matching (exclusive)
    pub color_tolerance: u8,
    /// Expected checkbox edge length in pixels
    pub expected_box_size: u32,
    /// Accepted deviation from `expected_box_size` (inclusive)
    pub box_size_tolerance: u32,
    /// Minimum share of edge pixels that must be ink
    pub border_match_threshold: f32,
    /// Interior ink share above which a checkbox counts as filled
    pub fill_threshold: f32,
    /// Detections whose centers are closer than this are duplicates
    pub duplicate_distance: f32,
    /// Maximum vertical gap between consecutive checkboxes of one question
    pub row_cluster_threshold: f32,
    /// Vertical drift that ends a line of question text (text units)
    pub line_break_tolerance: f32,
    pub alignment: AlignmentMode,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            render_scale: BASELINE_RENDER_SCALE,
            ink_color: DEFAULT_INK_COLOR,
            color_tolerance: DEFAULT_COLOR_TOLERANCE,
            expected_box_size: BASELINE_BOX_SIZE,
            box_size_tolerance: BASELINE_BOX_TOLERANCE,
            border_match_threshold: 0.3,
            fill_threshold: 0.5,
            duplicate_distance: BASELINE_DUPLICATE_DISTANCE,
            row_cluster_threshold: BASELINE_ROW_CLUSTER_THRESHOLD,
            line_break_tolerance: 2.0,
            alignment: AlignmentMode::default(),
        }
    }
}

impl AnalysisConfig {
    /// Defaults rescaled for rasters rendered at `scale` instead of the 1.3 baseline.
    pub fn for_scale(scale: f32) -> Self {
        Self::default().rescaled(scale)
    }

    /// Move to a new render scale, rescaling the pixel-space parameters proportionally.
    pub fn rescaled(self, scale: f32) -> Self {
        let factor = scale / self.render_scale;
        Self {
            render_scale: scale,
            expected_box_size: (self.expected_box_size as f32 * factor).round().max(3.0) as u32,
            box_size_tolerance: (self.box_size_tolerance as f32 * factor).round().max(1.0) as u32,
            duplicate_distance: self.duplicate_distance * factor,
            row_cluster_threshold: self.row_cluster_threshold * factor,
            ..self
        }
    }

    pub fn color_matcher(&self) -> ColorMatcher {
        ColorMatcher::new(self.ink_color, self.color_tolerance)
    }

    /// Inclusive range of accepted component edge lengths
    pub fn box_size_range(&self) -> std::ops::RangeInclusive<u32> {
        self.expected_box_size.saturating_sub(self.box_size_tolerance)
            ..=self.expected_box_size + self.box_size_tolerance
    }
}
