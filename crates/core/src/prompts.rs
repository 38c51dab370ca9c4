use crate::models::QuestionKind;

pub const NO_ANSWER_FOUND: &str = "no answer found";

const ANSWER_INSTRUCTION: &str = "You are a question-answering system over company annual reports and \
research notes. Answer only from the retrieved context below. Do not fabricate facts. Cite the page \
numbers that directly support your answer.";

/// Prefix of at most `max_chars` characters, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map(|(offset, _)| &text[..offset])
        .unwrap_or(text)
}

pub fn relevance_prompt(query: &str, page_excerpt: &str) -> String {
    format!(
        "You re-rank retrieved pages for a retrieval-augmented QA system.\n\
         Rate how relevant the page is to the query with a score between 0 and 1 in steps of 0.1 \
         (0 = unrelated, 1 = directly answers it) and justify the score briefly.\n\
         Query: {query}\n\
         Page content: {page_excerpt}\n\
         Respond with JSON only: {{\"reasoning\": \"<short justification>\", \"relevance_score\": 0.0}}"
    )
}

pub fn schema_name(kind: QuestionKind) -> &'static str {
    match kind {
        QuestionKind::Boolean => "BooleanAnswer",
        QuestionKind::Number => "NumberAnswer",
        QuestionKind::Text => "TextAnswer",
    }
}

fn final_answer_rule(kind: QuestionKind) -> String {
    match kind {
        QuestionKind::Boolean => {
            "\"final_answer\": true or false; answer false when the event did not happen.".to_string()
        }
        QuestionKind::Number => "\"final_answer\": a number matching the exact metric asked for, or the \
             string \"N/A\" when no such metric is reported. Do not accept proxy metrics or derived \
             calculations."
            .to_string(),
        QuestionKind::Text => format!(
            "\"final_answer\": a complete, coherent text answer, or \"{NO_ANSWER_FOUND}\" when the \
             context holds no supporting evidence."
        ),
    }
}

pub fn answer_prompt(kind: QuestionKind, context: &str, question: &str) -> String {
    format!(
        "{ANSWER_INSTRUCTION}\n\n\
         Context (each block starts with its page number):\n{context}\n\n\
         Question:\n{question}\n\n\
         Respond with a single JSON object following the {schema} schema:\n\
         \"step_by_step_analysis\": at least five reasoning steps; do not be misled by similar but \
         different figures.\n\
         \"reasoning_summary\": a summary of the reasoning in about fifty words.\n\
         \"relevant_pages\": a non-empty list of page numbers from the context that directly support \
         the answer.\n\
         {final_rule}",
        schema = schema_name(kind),
        final_rule = final_answer_rule(kind),
    )
}
