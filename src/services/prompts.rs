//! 提示词模板

use crate::models::{ContentKind, ExamType};

pub const CLASSIFIER_SYSTEM: &str = "You classify exam papers from sample page images. \
Respond with a single JSON object and nothing else.";

pub const CLASSIFIER_USER: &str = r#"Decide how candidates answer this exam.

- "type1": candidates write in a SEPARATE answer booklet. Questions are labelled like 10(a), 10(b), 11(a); the question pages contain little or no answer space.
- "type2": candidates answer ON the paper itself. Questions are labelled "Question 1", "Question 2"; pages contain answer lines or boxes.

Return exactly:
{"exam_type": "type1" | "type2", "reasoning": "<one or two sentences>", "confidence": <number between 0 and 1>}"#;

pub const LISTER_SYSTEM: &str = "You enumerate the questions of an exam paper PDF. \
Respond with a single JSON object and nothing else.";

const TYPE1_RULES: &str = r#"Splitting rules (type1, separate answer booklet):
- Every lettered part is its own question: 10(a), 10(b), 11(a) ...
- Roman-numeral sub-parts such as (i), (ii) belong to their lettered part and are NOT separate questions.
- A numbered question without lettered parts is labelled by its number alone, e.g. "12".
- Labels are written exactly as digits followed by a lowercase letter in parentheses, without spaces."#;

const TYPE2_RULES: &str = r#"Splitting rules (type2, answer on paper):
- Every top-level "Question N" is one question; all of its parts stay inside it.
- Labels are written exactly as "Question N".
- Never emit labels like 10(a) for this exam type."#;

const EMPHASIS: &str = "IMPORTANT: a previous answer used the wrong label format. \
Follow the label format rules above exactly; every label must match them.";

pub fn lister_user(exam_type: ExamType, emphasize_format: bool) -> String {
    let rules = match exam_type {
        ExamType::Type1 => TYPE1_RULES,
        ExamType::Type2 => TYPE2_RULES,
    };
    let emphasis = if emphasize_format { EMPHASIS } else { "" };
    format!(
        r#"List every question in the attached exam paper, in paper order.

{rules}
{emphasis}

Return exactly:
{{"exam_type": "{exam_type}", "total_questions": <count>, "questions": [{{"question_index": 1, "question_label": "<label>"}}, ...]}}
question_index starts at 1 and increases by 1."#
    )
}

pub const EXTRACTOR_SYSTEM: &str = "You transcribe one exam question and its official answer into LaTeX. \
Respond with a single JSON object and nothing else.";

pub fn extractor_user(exam_type: ExamType, label: &str) -> String {
    format!(
        r#"The first attached PDF is the exam paper ({exam_type}); the second is the solution.
Transcribe ONLY question "{label}".

Rules:
- question_content must start with \item and be compilable LaTeX inside an enumerate environment.
- answer_content is compilable LaTeX (no preamble).
- For every figure, add an entry to question_images / answer_images with the 1-based PDF page number and bbox [x1, y1, x2, y2] in points, origin top-left, and reference it as \includegraphics{{Figures/idPLACEHOLDER{{n}}.png}}.
- marks is the total mark for the question if printed, otherwise omit it.

Return exactly:
{{"question_label": "{label}", "question_content": "...", "answer_content": "...", "question_images": [], "answer_images": [], "marks": <int>, "reasoning": "..."}}"#
    )
}

pub fn revision_user(
    exam_type: ExamType,
    label: &str,
    kind: ContentKind,
    previous: &str,
    error: &str,
) -> String {
    format!(
        r#"Question "{label}" ({exam_type}): the {kind} LaTeX below failed to compile.

Error:
{error}

Previous {kind} LaTeX:
{previous}

Fix the LaTeX so it compiles, keeping the content faithful to the PDFs.
Return exactly:
{{"content": "<fixed LaTeX>", "images": null}}
Only set "images" to a new list if the figure annotations must change."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lister_prompt_selects_ruleset() {
        let p1 = lister_user(ExamType::Type1, false);
        assert!(p1.contains("separate answer booklet"));
        assert!(!p1.contains("IMPORTANT"));

        let p2 = lister_user(ExamType::Type2, true);
        assert!(p2.contains("\"Question N\""));
        assert!(p2.contains("IMPORTANT"));
        assert!(p2.contains("\"exam_type\": \"type2\""));
    }
}
