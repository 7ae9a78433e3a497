//! Quiz data model and the serialized output artifact

use crate::error::Result;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// A positioned text token from a page's text layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextToken {
    pub x: f32,
    pub y: f32,
    pub text: String,
}

impl TextToken {
    pub fn new(x: f32, y: f32, text: impl Into<String>) -> Self {
        Self {
            x,
            y,
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A detected checkbox glyph.
///
/// `x`/`y` is the bounding-box center in raster pixels; `width`/`height` the box extents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkbox {
    pub page_num: u32,
    pub x: f32,
    pub y: f32,
    pub width: u32,
    pub height: u32,
    pub filled: bool,
}

impl Checkbox {
    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub text: String,
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_image: Option<bool>,
}

impl Answer {
    /// Answer taken verbatim from a text token
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            checked: false,
            is_image: None,
        }
    }

    /// Placeholder answer standing in for the `position`-th checkbox of a question (1-based)
    pub fn image(position: usize) -> Self {
        Self {
            text: format!("[Image {}]", position),
            checked: false,
            is_image: Some(true),
        }
    }

    pub fn is_image(&self) -> bool {
        self.is_image.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub text: String,
    /// Raw `m/n` marker text
    pub index: String,
    /// Raw point-value text
    pub points: String,
    pub page_num: u32,
    pub answers: Vec<Answer>,
}

/// Everything one page contributed to an analysis
#[derive(Debug, Clone, Default)]
pub struct PageAnalysis {
    pub page_num: u32,
    /// In detection order
    pub checkboxes: Vec<Checkbox>,
    /// In emission order
    pub questions: Vec<Question>,
    /// Page raster, kept only when debug overlays were requested
    pub raster: Option<RgbaImage>,
}

/// The output artifact: `{ totalQuestions, questions }`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizReport {
    pub total_questions: usize,
    pub questions: Vec<Question>,
}

impl QuizReport {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            total_questions: questions.len(),
            questions,
        }
    }

    /// Pretty-printed JSON with two-space indentation
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
