use crate::error::QueryError;
use crate::llm::{extract_json_object, LanguageModel};
use crate::models::{ParentPage, RankedPage, RetrievedChunk};
use crate::prompts::{relevance_prompt, truncate_chars};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankOptions {
    pub page_prefix_chars: usize,
    pub vector_weight: f64,
    pub llm_weight: f64,
    pub keep: usize,
    /// Relevance judgments in flight at once; 1 scores pages sequentially.
    pub concurrency: usize,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            page_prefix_chars: 1000,
            vector_weight: 0.3,
            llm_weight: 0.7,
            keep: 10,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelevanceJudgment {
    reasoning: String,
    relevance_score: f64,
}

pub struct PageReranker<'a, L: ?Sized> {
    model: &'a L,
    options: RerankOptions,
}

impl<'a, L> PageReranker<'a, L>
where
    L: LanguageModel + ?Sized,
{
    pub fn new(model: &'a L, options: RerankOptions) -> Self {
        Self { model, options }
    }

    /// Scores every page, then returns the best `keep` by weighted score.
    /// Equal scores keep their input order. Any page failing aborts the call.
    pub async fn rerank(
        &self,
        query: &str,
        pages: Vec<ParentPage>,
        chunks: &[RetrievedChunk],
    ) -> Result<Vec<RankedPage>, QueryError> {
        let candidates = pages.len();
        let similarity = mean_similarity_by_page(chunks);
        let similarity = &similarity;

        let mut ranked: Vec<RankedPage> = stream::iter(pages.into_iter().map(move |page| {
            let vector_similarity = similarity.get(&page.page_num).copied().unwrap_or(0.0);
            self.score_page(query, page, vector_similarity)
        }))
        .buffered(self.options.concurrency.max(1))
        .try_collect()
        .await?;

        ranked.sort_by(|left, right| right.weighted_score.total_cmp(&left.weighted_score));
        ranked.truncate(self.options.keep);

        info!(
            candidates,
            kept = ranked.len(),
            top_score = ranked.first().map(|page| page.weighted_score),
            "pages re-ranked"
        );
        Ok(ranked)
    }

    async fn score_page(
        &self,
        query: &str,
        page: ParentPage,
        vector_similarity: f64,
    ) -> Result<RankedPage, QueryError> {
        let page_num = page.page_num;
        let excerpt = truncate_chars(&page.full_text, self.options.page_prefix_chars);
        let response = self
            .model
            .complete(&relevance_prompt(query, excerpt))
            .await
            .map_err(|error| QueryError::RerankService {
                page: page_num,
                details: error.to_string(),
            })?;
        let judgment = parse_judgment(&response).map_err(|details| QueryError::RerankService {
            page: page_num,
            details,
        })?;

        let weighted = weighted_score(
            vector_similarity,
            judgment.relevance_score,
            self.options.vector_weight,
            self.options.llm_weight,
        );
        debug!(
            page = page_num,
            vector_similarity,
            llm_score = judgment.relevance_score,
            weighted,
            "page scored"
        );

        Ok(RankedPage {
            page,
            vector_similarity,
            llm_reasoning: judgment.reasoning,
            llm_score: judgment.relevance_score,
            weighted_score: weighted,
        })
    }
}

fn parse_judgment(response: &str) -> Result<RelevanceJudgment, String> {
    let object = extract_json_object(response)
        .ok_or_else(|| format!("no JSON object in relevance response: {response}"))?;
    let judgment: RelevanceJudgment =
        serde_json::from_str(object).map_err(|error| format!("unexpected relevance shape: {error}"))?;
    if !(0.0..=1.0).contains(&judgment.relevance_score) {
        return Err(format!(
            "relevance_score {} is outside [0, 1]",
            judgment.relevance_score
        ));
    }
    Ok(judgment)
}

pub fn mean_similarity_by_page(chunks: &[RetrievedChunk]) -> HashMap<u32, f64> {
    let mut sums: HashMap<u32, (f64, usize)> = HashMap::new();
    for retrieved in chunks {
        let entry = sums.entry(retrieved.chunk.parent_page).or_insert((0.0, 0));
        entry.0 += retrieved.similarity_score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(page, (sum, count))| (page, sum / count as f64))
        .collect()
}

/// `vector_weight * similarity + llm_weight * relevance`, rounded to two decimals.
pub fn weighted_score(vector_similarity: f64, llm_relevance: f64, vector_weight: f64, llm_weight: f64) -> f64 {
    let blended = vector_weight * vector_similarity + llm_weight * llm_relevance;
    ((blended * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedModel;
    use crate::models::Chunk;

    fn page(page_num: u32, text: &str) -> ParentPage {
        ParentPage {
            page_num,
            full_text: text.to_string(),
            source_chunk_ids: vec![format!("acme_page{page_num}_chunk0")],
        }
    }

    fn retrieved(page: u32, index: usize, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                chunk_id: format!("acme_page{page}_chunk{index}"),
                parent_page: page,
                text: String::new(),
                token_count: 0,
            },
            similarity_score: score,
        }
    }

    fn judgment(score: f64) -> String {
        format!("{{\"reasoning\": \"scored {score}\", \"relevance_score\": {score}}}")
    }

    #[test]
    fn weighted_score_matches_reference_value() {
        let score = weighted_score(0.8, 0.5, 0.3, 0.7);
        assert!((score - 0.59).abs() < 1e-9);
    }

    #[test]
    fn weighted_score_stays_in_unit_range() {
        for vector in [0.0, 0.25, 0.5, 1.0] {
            for llm in [0.0, 0.1, 0.7, 1.0] {
                let score = weighted_score(vector, llm, 0.3, 0.7);
                assert!((0.0..=1.0).contains(&score));
            }
        }
    }

    #[test]
    fn mean_similarity_averages_citing_chunks() {
        let means = mean_similarity_by_page(&[
            retrieved(1, 0, 0.9),
            retrieved(1, 1, 0.5),
            retrieved(2, 0, 0.4),
        ]);
        assert!((means[&1] - 0.7).abs() < 1e-9);
        assert!((means[&2] - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pages_sort_by_weighted_score_with_stable_ties() {
        let first = judgment(0.5);
        let second = judgment(0.9);
        let third = judgment(0.5);
        let model = ScriptedModel::new(&[
            ("alpha text", first.as_str()),
            ("beta text", second.as_str()),
            ("gamma text", third.as_str()),
        ]);
        let reranker = PageReranker::new(&model, RerankOptions::default());
        let chunks = vec![retrieved(1, 0, 0.6), retrieved(2, 0, 0.6), retrieved(3, 0, 0.6)];
        let pages = vec![page(1, "alpha text"), page(2, "beta text"), page(3, "gamma text")];

        let ranked = reranker.rerank("profit?", pages, &chunks).await.unwrap();

        let order: Vec<_> = ranked.iter().map(|page| page.page.page_num).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert!((ranked[0].weighted_score - 0.81).abs() < 1e-9);
        assert_eq!(ranked[0].llm_reasoning, "scored 0.9");
    }

    #[tokio::test]
    async fn reranking_twice_is_identical() {
        let low = judgment(0.2);
        let high = judgment(0.8);
        let model = ScriptedModel::new(&[("low page", low.as_str()), ("high page", high.as_str())]);
        let chunks = vec![retrieved(4, 0, 0.3), retrieved(9, 0, 0.9)];
        let pages = vec![page(4, "low page"), page(9, "high page")];

        for concurrency in [1, 4] {
            let options = RerankOptions {
                concurrency,
                ..RerankOptions::default()
            };
            let reranker = PageReranker::new(&model, options);
            let once = reranker.rerank("q", pages.clone(), &chunks).await.unwrap();
            let twice = reranker.rerank("q", pages.clone(), &chunks).await.unwrap();
            assert_eq!(once, twice);
            assert_eq!(once[0].page.page_num, 9);
        }
    }

    #[tokio::test]
    async fn output_is_capped_at_keep() {
        let response = judgment(0.4);
        let model = ScriptedModel::new(&[("page body", response.as_str())]);
        let reranker = PageReranker::new(&model, RerankOptions::default());

        let pages: Vec<_> = (1..=14).map(|number| page(number, "page body")).collect();
        let chunks: Vec<_> = (1..=14).map(|number| retrieved(number, 0, 0.5)).collect();
        assert_eq!(reranker.rerank("q", pages, &chunks).await.unwrap().len(), 10);

        let few: Vec<_> = (1..=3).map(|number| page(number, "page body")).collect();
        assert_eq!(reranker.rerank("q", few, &chunks).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unparseable_judgment_aborts_whole_call() {
        let good = judgment(0.7);
        let model = ScriptedModel::new(&[
            ("good page", good.as_str()),
            ("bad page", "I think it is fairly relevant"),
        ]);
        let reranker = PageReranker::new(&model, RerankOptions::default());
        let pages = vec![page(1, "good page"), page(2, "bad page")];

        let result = reranker.rerank("q", pages, &[]).await;
        assert!(matches!(result, Err(QueryError::RerankService { page: 2, .. })));
    }

    #[tokio::test]
    async fn out_of_range_score_is_rejected() {
        let model = ScriptedModel::new(&[("page", "{\"reasoning\": \"x\", \"relevance_score\": 7}")]);
        let reranker = PageReranker::new(&model, RerankOptions::default());
        let result = reranker.rerank("q", vec![page(1, "page")], &[]).await;
        assert!(matches!(result, Err(QueryError::RerankService { page: 1, .. })));
    }

    #[tokio::test]
    async fn model_sees_only_the_page_prefix() {
        let response = judgment(0.3);
        let model = ScriptedModel::new(&[("Page content", response.as_str())]);
        let options = RerankOptions {
            page_prefix_chars: 5,
            ..RerankOptions::default()
        };
        let reranker = PageReranker::new(&model, options);

        reranker
            .rerank("q", vec![page(1, "abcdefghij")], &[])
            .await
            .unwrap();

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Page content: abcde\n"));
        assert!(!prompts[0].contains("abcdef"));
    }
}
