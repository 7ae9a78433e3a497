//! Text token grouping: anchors, question text, and answer runs
//!
//! A question starts at an *anchor*: a purely numeric point-value token followed, somewhere
//! later on the page, by an `m/n` index token. The tokens after the index token form the
//! question text (up to the first blank token or line break) and then its answers, up to the
//! next anchor's point-value token.
//!
//! Tokens are consumed in the order the rendering engine returns them, which is assumed to be
//! top-to-bottom, left-to-right. Multi-column layouts are not supported.

use crate::quiz::config::AnalysisConfig;
use crate::quiz::model::{Answer, Checkbox, Question, TextToken};

/// A `(points, index)` token pair marking the start of one question
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    /// Position of the point-value token
    pub points_index: usize,
    /// Position of the `m/n` token
    pub index_index: usize,
    pub points: String,
    pub index: String,
    pub y: f32,
}

fn is_points_token(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

fn is_index_token(text: &str) -> bool {
    text.split_once('/')
        .map(|(m, n)| is_points_token(m) && is_points_token(n))
        .unwrap_or(false)
}

/// Locate every anchor on a page, in token order.
///
/// Each numeric token pairs with the nearest index token after it; a numeric token with no
/// index token anywhere after it is not an anchor.
pub fn find_anchors(tokens: &[TextToken]) -> Vec<Anchor> {
    tokens
        .iter()
        .enumerate()
        .filter(|(_, token)| is_points_token(&token.text))
        .filter_map(|(points_index, token)| {
            let offset = tokens[points_index + 1..]
                .iter()
                .position(|t| is_index_token(&t.text))?;
            let index_index = points_index + 1 + offset;
            Some(Anchor {
                points_index,
                index_index,
                points: token.text.clone(),
                index: tokens[index_index].text.clone(),
                y: token.y,
            })
        })
        .collect()
}

/// Group a page's tokens into questions.
///
/// `checkboxes` are the page's checkboxes in detection order; questions without text answers
/// take a run of them as image answers, starting after the checkboxes already taken by earlier
/// questions on the page.
pub fn group_questions(
    tokens: &[TextToken],
    page_num: u32,
    checkboxes: &[Checkbox],
    config: &AnalysisConfig,
) -> Vec<Question> {
    let anchors = find_anchors(tokens);
    let mut questions: Vec<Question> = Vec::new();
    let mut checkbox_offset = 0usize;

    for (i, anchor) in anchors.iter().enumerate() {
        let end = anchors
            .get(i + 1)
            .map(|next| next.points_index)
            .unwrap_or(tokens.len())
            .min(tokens.len());

        let mut cursor = anchor.index_index + 1;
        let text = question_text(tokens, &mut cursor, end, config.line_break_tolerance);
        if text.is_empty() {
            continue;
        }

        while cursor < end && tokens[cursor].is_blank() {
            cursor += 1;
        }

        let remaining = tokens.get(cursor..end).unwrap_or_default();
        let answers: Vec<Answer> = if remaining.iter().any(|t| !t.is_blank()) {
            remaining
                .iter()
                .filter(|t| !t.is_blank())
                .map(|t| Answer::text(t.text.clone()))
                .collect()
        } else {
            let available = checkboxes.get(checkbox_offset..).unwrap_or_default();
            let run = checkbox_run_len(available, config.row_cluster_threshold);
            (1..=run).map(Answer::image).collect()
        };

        if answers.is_empty() {
            tracing::trace!(page = page_num, index = %anchor.index, "question without answers dropped");
            continue;
        }

        checkbox_offset += answers
            .iter()
            .filter(|a| config.alignment.consumes_checkbox(a))
            .count();

        questions.push(Question {
            text,
            index: anchor.index.clone(),
            points: anchor.points.clone(),
            page_num,
            answers,
        });
    }

    tracing::debug!(
        page = page_num,
        anchors = anchors.len(),
        questions = questions.len(),
        "token grouping finished"
    );
    questions
}

/// Space-join the non-blank tokens of the question's first line, advancing `cursor` past them.
fn question_text(tokens: &[TextToken], cursor: &mut usize, end: usize, line_break: f32) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut line_y: Option<f32> = None;

    while *cursor < end {
        let token = &tokens[*cursor];
        if token.is_blank() {
            break;
        }
        match line_y {
            Some(y) if (token.y - y).abs() > line_break => break,
            None => line_y = Some(token.y),
            _ => {}
        }
        parts.push(&token.text);
        *cursor += 1;
    }

    parts.join(" ")
}

/// Length of the leading run of vertically clustered checkboxes.
///
/// Each checkbox must sit within `threshold` of the previous one in the run.
fn checkbox_run_len(checkboxes: &[Checkbox], threshold: f32) -> usize {
    let mut last_y: Option<f32> = None;
    let mut len = 0;

    for checkbox in checkboxes {
        match last_y {
            Some(y) if (checkbox.y - y).abs() >= threshold => break,
            _ => {
                last_y = Some(checkbox.y);
                len += 1;
            }
        }
    }

    len
}
