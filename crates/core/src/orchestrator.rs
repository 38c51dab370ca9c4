use crate::answer::AnswerSynthesizer;
use crate::company::CompanyExtractor;
use crate::config::PipelineOptions;
use crate::embeddings::Embedder;
use crate::error::QueryError;
use crate::llm::LanguageModel;
use crate::models::{Answer, QuestionKind, RankedPage};
use crate::pages::{aggregate_parent_pages, PageSource};
use crate::rerank::PageReranker;
use crate::retrieval::VectorRetriever;
use crate::traits::VectorStore;
use serde::Serialize;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Clone, Serialize)]
pub struct QaOutcome {
    pub company: String,
    pub kind: QuestionKind,
    pub answer: Answer,
    pub retrieved_chunks: usize,
    pub ranked_pages: Vec<RankedPage>,
}

pub struct QaPipeline<'a, E: ?Sized, S: ?Sized, L: ?Sized, P: ?Sized, C: ?Sized> {
    embedder: &'a E,
    store: &'a S,
    model: &'a L,
    pages: &'a P,
    companies: &'a C,
    options: PipelineOptions,
}

impl<'a, E, S, L, P, C> QaPipeline<'a, E, S, L, P, C>
where
    E: Embedder + ?Sized,
    S: VectorStore + ?Sized,
    L: LanguageModel + ?Sized,
    P: PageSource + ?Sized,
    C: CompanyExtractor + ?Sized,
{
    pub fn new(
        embedder: &'a E,
        store: &'a S,
        model: &'a L,
        pages: &'a P,
        companies: &'a C,
    ) -> Self {
        Self {
            embedder,
            store,
            model,
            pages,
            companies,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn answer(&self, query: &str, kind: QuestionKind) -> Result<QaOutcome, QueryError> {
        let company = self.companies.extract(query)?;
        self.answer_for_company(query, &company, kind).await
    }

    /// Skips company extraction; `company` names the partition to search.
    pub async fn answer_for_company(
        &self,
        query: &str,
        company: &str,
        kind: QuestionKind,
    ) -> Result<QaOutcome, QueryError> {
        let span = info_span!("answer", company, kind = %kind);
        async {
            let retrieved = VectorRetriever::new(self.embedder, self.store)
                .retrieve(query, company, self.options.retrieval.top_k)
                .await?;
            if retrieved.is_empty() {
                return Err(QueryError::NoEvidence);
            }

            let parents = aggregate_parent_pages(&retrieved, self.pages).await?;
            let ranked_pages = PageReranker::new(self.model, self.options.rerank)
                .rerank(query, parents, &retrieved)
                .await?;
            if ranked_pages.is_empty() {
                return Err(QueryError::NoEvidence);
            }

            let answer = AnswerSynthesizer::new(self.model, self.options.synthesis)
                .synthesize(query, kind, &ranked_pages)
                .await?;

            info!(
                retrieved = retrieved.len(),
                ranked = ranked_pages.len(),
                "question answered"
            );
            Ok(QaOutcome {
                company: company.to_string(),
                kind,
                answer,
                retrieved_chunks: retrieved.len(),
                ranked_pages,
            })
        }
        .instrument(span)
        .await
    }
}
