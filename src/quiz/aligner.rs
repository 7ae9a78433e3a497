//! Checkbox-to-answer alignment

use crate::quiz::config::AlignmentMode;
use crate::quiz::model::{Checkbox, PageAnalysis, Question};

/// Copy fill state onto one page's answers.
///
/// Answers that take a checkbox slot (per `mode`) are zipped, in question then answer order,
/// with the page's checkboxes in detection order. Once the checkboxes run out the remaining
/// answers keep `checked = false`. Returns the number of answers that received a checkbox.
pub fn align_page(questions: &mut [Question], checkboxes: &[Checkbox], mode: AlignmentMode) -> usize {
    let slots = questions
        .iter_mut()
        .flat_map(|q| q.answers.iter_mut())
        .filter(|answer| mode.consumes_checkbox(answer));

    let mut aligned = 0;
    for (answer, checkbox) in slots.zip(checkboxes) {
        answer.checked = checkbox.filled;
        aligned += 1;
    }
    aligned
}

/// Align every page of a document. Pages never share checkboxes.
pub fn align_document(pages: &mut [PageAnalysis], mode: AlignmentMode) {
    for page in pages.iter_mut() {
        let aligned = align_page(&mut page.questions, &page.checkboxes, mode);
        tracing::debug!(
            page = page.page_num,
            aligned,
            checkboxes = page.checkboxes.len(),
            "alignment finished"
        );
    }
}
