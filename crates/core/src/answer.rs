use crate::error::QueryError;
use crate::llm::{extract_json_object, LanguageModel};
use crate::models::{Answer, FinalAnswer, QuestionKind, RankedPage};
use crate::prompts::{answer_prompt, schema_name, truncate_chars};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisOptions {
    pub page_context_chars: usize,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            page_context_chars: 1500,
        }
    }
}

pub fn build_context(pages: &[RankedPage], page_context_chars: usize) -> String {
    pages
        .iter()
        .map(|ranked| {
            format!(
                "page {}: {}",
                ranked.page.page_num,
                truncate_chars(&ranked.page.full_text, page_context_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct AnswerSynthesizer<'a, L: ?Sized> {
    model: &'a L,
    options: SynthesisOptions,
}

impl<'a, L> AnswerSynthesizer<'a, L>
where
    L: LanguageModel + ?Sized,
{
    pub fn new(model: &'a L, options: SynthesisOptions) -> Self {
        Self { model, options }
    }

    /// Asks the model for a cited answer of the given kind. Without ranked
    /// pages the model is never called.
    pub async fn synthesize(
        &self,
        query: &str,
        kind: QuestionKind,
        pages: &[RankedPage],
    ) -> Result<Answer, QueryError> {
        if pages.is_empty() {
            return Err(QueryError::NoEvidence);
        }

        let context = build_context(pages, self.options.page_context_chars);
        let response = self
            .model
            .complete(&answer_prompt(kind, &context, query))
            .await
            .map_err(QueryError::LanguageModel)?;

        let context_pages: Vec<u32> = pages.iter().map(|ranked| ranked.page.page_num).collect();
        let answer = parse_answer(kind, &response, &context_pages)?;
        info!(
            kind = %kind,
            relevant_pages = ?answer.relevant_pages,
            final_answer = %answer.final_answer,
            "answer synthesized"
        );
        Ok(answer)
    }
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    step_by_step_analysis: String,
    reasoning_summary: String,
    relevant_pages: Vec<u32>,
    final_answer: Value,
}

/// Parses a model response and checks it against the schema of `kind`:
/// cited pages must be non-empty and drawn from `context_pages`.
pub fn parse_answer(
    kind: QuestionKind,
    response: &str,
    context_pages: &[u32],
) -> Result<Answer, QueryError> {
    let schema = schema_name(kind);
    let invalid = |details: String| QueryError::AnswerParse {
        schema: schema.to_string(),
        details,
    };

    let object = extract_json_object(response)
        .ok_or_else(|| invalid("response contains no JSON object".to_string()))?;
    let raw: RawAnswer = serde_json::from_str(object).map_err(|error| invalid(error.to_string()))?;

    if raw.relevant_pages.is_empty() {
        return Err(invalid("relevant_pages is empty".to_string()));
    }
    let mut relevant_pages = Vec::with_capacity(raw.relevant_pages.len());
    for page in raw.relevant_pages {
        if !context_pages.contains(&page) {
            return Err(invalid(format!("page {page} is not part of the context")));
        }
        if !relevant_pages.contains(&page) {
            relevant_pages.push(page);
        }
    }

    let final_answer = match (kind, raw.final_answer) {
        (QuestionKind::Boolean, Value::Bool(value)) => FinalAnswer::Boolean(value),
        (QuestionKind::Number, Value::Number(number)) => number
            .as_f64()
            .map(FinalAnswer::Number)
            .ok_or_else(|| invalid(format!("{number} is not a finite number")))?,
        (QuestionKind::Number, Value::String(text)) if text.trim().eq_ignore_ascii_case("n/a") => {
            FinalAnswer::NotAvailable
        }
        (QuestionKind::Text, Value::String(text)) if !text.trim().is_empty() => FinalAnswer::Text(text),
        (kind, other) => {
            return Err(invalid(format!(
                "final_answer {other} does not fit a {kind} question"
            )))
        }
    };

    Ok(Answer {
        step_by_step_analysis: raw.step_by_step_analysis,
        reasoning_summary: raw.reasoning_summary,
        relevant_pages,
        final_answer,
    })
}
