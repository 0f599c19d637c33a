//! Prompts for VLM-based exam-question extraction.
//!
//! The system prompt fixes the response contract (skip object, item array or
//! wrapper object); the per-unit instructions carry the page range and the
//! exam context. Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`], but the unit
//! instructions are always generated here because the reconciler relies on
//! the page-numbering rule they state.

use crate::config::ExtractionContext;
use crate::pipeline::segment::PageRange;

/// Default system prompt for extracting questions from exam page images.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert exam digitiser. You receive consecutive page images from one exam paper and return every question on them as structured JSON.

Follow these rules precisely:

1. WHAT TO EXTRACT
   - Every question that is fully or partly visible on the given pages
   - The complete question text, including any passage, table or formula it depends on
   - All answer options, in order, without their letter labels
   - The correct answer only if it is printed on the page

2. FIELDS PER QUESTION
   - "text": the question text (required)
   - "options": list of option strings (omit for non-choice questions)
   - "answer": the correct answer if shown
   - "type": one of "MCQ", "Descriptive", "TrueFalse", "FillIn", "Integer", "Matching"
   - "subject", "topics" (list), "difficulty" ("easy" | "medium" | "hard")
   - "page": the page number the question starts on
   - "confidence": your confidence in the transcription, 0.0 to 1.0

3. FORMULAS
   - Render mathematical expressions using LaTeX: $inline$ and $$display$$

4. SCOPE CHECK
   - If the pages clearly belong to a different exam or to a year that is not allowed, return
     {"skip": true, "scope": "document", "reason": "<short reason>"}
   - If only these pages carry no questions (cover page, instructions, answer key, blank pages), return
     {"skip": true, "scope": "chunk", "reason": "<short reason>"}

5. OUTPUT FORMAT
   - Output ONLY JSON: either the skip object or {"questions": [ ... ]}
   - Do NOT add commentary or explanations"#;

/// Build the per-unit instruction text.
///
/// The absolute page range is embedded so the model can report document
/// page numbers directly; the reconciler still remaps unit-relative numbers
/// when the model ignores this.
pub fn unit_instructions(context: &ExtractionContext, range: PageRange, total_pages: usize) -> String {
    let mut out = format!(
        "These images are pages {} to {} of a {}-page document. \
Report each question's \"page\" as the absolute page number in that document ({}–{}).\n\n",
        range.from_page,
        range.to_page,
        total_pages,
        range.from_page,
        range.to_page
    );

    out.push_str(&format!("Target exam: {}\n", context.display_name()));
    if !context.subjects.is_empty() {
        out.push_str(&format!("Known subjects: {}\n", context.subjects.join(", ")));
    }
    if context.allowed_years.is_empty() {
        out.push_str("Allowed years: any\n");
    } else {
        let years: Vec<&str> = context.allowed_years.iter().map(String::as_str).collect();
        out.push_str(&format!("Allowed years: {}\n", years.join(", ")));
    }

    out.push_str(
        "\nIf the visible content does not belong to the target exam and an allowed year, \
return the skip object described in the rules instead of questions.",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryKey;

    #[test]
    fn instructions_embed_absolute_range() {
        let ctx = ExtractionContext::new("JEE Main", CategoryKey::new(["jee", "main"]))
            .with_allowed_years(["2023"])
            .unwrap()
            .with_subjects(["Physics", "Chemistry"]);
        let text = unit_instructions(&ctx, PageRange::new(9, 16), 20);
        assert!(text.contains("pages 9 to 16 of a 20-page document"));
        assert!(text.contains("Target exam: JEE Main"));
        assert!(text.contains("Physics, Chemistry"));
        assert!(text.contains("Allowed years: 2023"));
    }

    #[test]
    fn instructions_without_years_allow_any() {
        let text = unit_instructions(&ExtractionContext::default(), PageRange::new(1, 1), 1);
        assert!(text.contains("Allowed years: any"));
        assert!(text.contains("the target exam"));
    }

    #[test]
    fn system_prompt_states_skip_contract() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"skip\": true"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"scope\": \"document\""));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("\"scope\": \"chunk\""));
    }
}
