use crate::chunking::parse_chunk_id;
use crate::error::{IngestError, QueryError};
use crate::models::{render_page_markdown, DocumentPage, PageText, ParentPage, RetrievedChunk};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

const PAGE_HEADER_PATTERN: &str = r"(?m)^# page (\d+)[ \t]*\r?$";

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn load_pages(&self, company: &str) -> Result<Vec<PageText>, QueryError>;
}

/// Pages persisted by preprocessing: structured JSON is read first, the
/// page-delimited markdown rendering is the fallback.
#[derive(Debug, Clone)]
pub struct FsPageSource {
    pages_dir: PathBuf,
    markdown_dir: PathBuf,
}

impl FsPageSource {
    pub fn new(pages_dir: impl Into<PathBuf>, markdown_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages_dir: pages_dir.into(),
            markdown_dir: markdown_dir.into(),
        }
    }

    pub fn pages_path(&self, company: &str) -> PathBuf {
        self.pages_dir.join(format!("{company}.json"))
    }

    pub fn markdown_path(&self, company: &str) -> PathBuf {
        self.markdown_dir.join(format!("{company}.md"))
    }

    pub fn save(&self, company: &str, pages: &[DocumentPage]) -> Result<(), IngestError> {
        fs::create_dir_all(&self.pages_dir)?;
        fs::create_dir_all(&self.markdown_dir)?;
        fs::write(self.pages_path(company), serde_json::to_vec_pretty(pages)?)?;
        fs::write(self.markdown_path(company), render_page_markdown(pages))?;
        Ok(())
    }

    pub fn companies(&self) -> Result<Vec<String>, IngestError> {
        let entries = match fs::read_dir(&self.pages_dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut companies = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_json = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if let (true, Some(stem)) = (is_json, path.file_stem().and_then(|stem| stem.to_str())) {
                companies.push(stem.to_string());
            }
        }
        companies.sort_unstable();
        Ok(companies)
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, QueryError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(QueryError::SourceNotFound(format!("{}: {error}", path.display()))),
    }
}

#[async_trait]
impl PageSource for FsPageSource {
    async fn load_pages(&self, company: &str) -> Result<Vec<PageText>, QueryError> {
        let pages_path = self.pages_path(company);
        if let Some(contents) = read_optional(&pages_path).await? {
            let pages: Vec<DocumentPage> = serde_json::from_str(&contents).map_err(|error| {
                QueryError::MalformedSource(format!("{}: {error}", pages_path.display()))
            })?;
            return Ok(pages.iter().map(DocumentPage::to_page_text).collect());
        }

        let markdown_path = self.markdown_path(company);
        match read_optional(&markdown_path).await? {
            Some(markdown) => split_page_sections(&markdown).map_err(|error| match error {
                QueryError::MalformedSource(details) => {
                    QueryError::MalformedSource(format!("{}: {details}", markdown_path.display()))
                }
                other => other,
            }),
            None => Err(QueryError::SourceNotFound(company.to_string())),
        }
    }
}

fn page_header() -> Result<&'static Regex, QueryError> {
    static HEADER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    HEADER
        .get_or_init(|| Regex::new(PAGE_HEADER_PATTERN))
        .as_ref()
        .map_err(|error| QueryError::MalformedSource(error.to_string()))
}

/// Splits page-delimited markdown on its `# page {n}` header lines. Text
/// before the first header is discarded.
pub fn split_page_sections(markdown: &str) -> Result<Vec<PageText>, QueryError> {
    let header = page_header()?;

    let headers: Vec<(u32, usize, usize)> = header
        .captures_iter(markdown)
        .map(|captures| {
            let whole = captures.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
            let number = captures[1].parse::<u32>().map_err(|error| {
                QueryError::MalformedSource(format!("bad page number `{}`: {error}", &captures[1]))
            })?;
            Ok((number, whole.0, whole.1))
        })
        .collect::<Result<_, QueryError>>()?;

    if headers.is_empty() {
        return Err(QueryError::MalformedSource(
            "no `# page {n}` delimiter found".to_string(),
        ));
    }

    Ok(headers
        .iter()
        .enumerate()
        .map(|(position, (number, _, body_start))| {
            let body_end = headers
                .get(position + 1)
                .map(|(_, next_start, _)| *next_start)
                .unwrap_or(markdown.len());
            PageText {
                number: *number,
                text: markdown[*body_start..body_end].trim().to_string(),
            }
        })
        .collect())
}

/// Maps retrieved chunks back to their full parent pages, one entry per
/// distinct page in order of first retrieval.
pub async fn aggregate_parent_pages<P>(
    chunks: &[RetrievedChunk],
    source: &P,
) -> Result<Vec<ParentPage>, QueryError>
where
    P: PageSource + ?Sized,
{
    let Some(first) = chunks.first() else {
        return Ok(Vec::new());
    };
    let company = chunk_company(&first.chunk.chunk_id)?;

    let mut order: Vec<u32> = Vec::new();
    let mut citing: HashMap<u32, Vec<String>> = HashMap::new();
    for retrieved in chunks {
        let owner = chunk_company(&retrieved.chunk.chunk_id)?;
        if owner != company {
            return Err(QueryError::ChunkProvenance(format!(
                "chunks from `{company}` and `{owner}` cannot be aggregated together"
            )));
        }
        let page = retrieved.chunk.parent_page;
        citing
            .entry(page)
            .or_insert_with(|| {
                order.push(page);
                Vec::new()
            })
            .push(retrieved.chunk.chunk_id.clone());
    }

    let mut texts: HashMap<u32, String> = source
        .load_pages(company)
        .await?
        .into_iter()
        .map(|page| (page.number, page.text))
        .collect();

    let pages = order
        .into_iter()
        .map(|page_num| {
            let full_text = texts.remove(&page_num).ok_or_else(|| {
                QueryError::MalformedSource(format!(
                    "page {page_num} of `{company}` is cited by retrieved chunks but absent from the source"
                ))
            })?;
            Ok(ParentPage {
                page_num,
                full_text,
                source_chunk_ids: citing.remove(&page_num).unwrap_or_default(),
            })
        })
        .collect::<Result<Vec<_>, QueryError>>()?;

    debug!(company, chunks = chunks.len(), pages = pages.len(), "aggregated parent pages");
    Ok(pages)
}

fn chunk_company(chunk_id: &str) -> Result<&str, QueryError> {
    parse_chunk_id(chunk_id)
        .map(|(company, _, _)| company)
        .ok_or_else(|| QueryError::ChunkProvenance(format!("unrecognized chunk id `{chunk_id}`")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Chunk, PageTable};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    pub(crate) struct StaticPages {
        pub(crate) company: String,
        pub(crate) pages: Vec<PageText>,
        pub(crate) lookups: AtomicUsize,
    }

    impl StaticPages {
        pub(crate) fn new(company: &str, pages: &[(u32, &str)]) -> Self {
            Self {
                company: company.to_string(),
                pages: pages
                    .iter()
                    .map(|(number, text)| PageText {
                        number: *number,
                        text: text.to_string(),
                    })
                    .collect(),
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl StaticPages {
        pub(crate) fn lookups(&self) -> usize {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageSource for StaticPages {
        async fn load_pages(&self, company: &str) -> Result<Vec<PageText>, QueryError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if company == self.company {
                Ok(self.pages.clone())
            } else {
                Err(QueryError::SourceNotFound(company.to_string()))
            }
        }
    }

    fn retrieved(company: &str, page: u32, index: usize, score: f64) -> RetrievedChunk {
        RetrievedChunk {
            chunk: Chunk {
                chunk_id: format!("{company}_page{page}_chunk{index}"),
                parent_page: page,
                text: "chunk".to_string(),
                token_count: 1,
            },
            similarity_score: score,
        }
    }

    #[test]
    fn markdown_splits_into_numbered_pages() {
        let markdown = "preamble\n# page 1\n\nfirst page\n\n# page 12\nsecond\n| a | b |\n";
        let pages = split_page_sections(markdown).unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].text, "first page");
        assert_eq!(pages[1].number, 12);
        assert_eq!(pages[1].text, "second\n| a | b |");
    }

    #[test]
    fn page_header_pattern_is_compiled_once() {
        let first = page_header().unwrap();
        let second = page_header().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn markdown_without_delimiters_is_malformed() {
        assert!(matches!(
            split_page_sections("just a report"),
            Err(QueryError::MalformedSource(_))
        ));
    }

    #[tokio::test]
    async fn chunks_group_by_parent_page_without_loss() {
        let source = StaticPages::new("acme", &[(1, "page one"), (2, "page two"), (3, "page three")]);
        let chunks = vec![
            retrieved("acme", 2, 0, 0.9),
            retrieved("acme", 1, 1, 0.8),
            retrieved("acme", 2, 3, 0.7),
            retrieved("acme", 1, 0, 0.6),
        ];

        let pages = aggregate_parent_pages(&chunks, &source).await.unwrap();

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_num, 2);
        assert_eq!(pages[0].full_text, "page two");
        assert_eq!(
            pages[0].source_chunk_ids,
            vec!["acme_page2_chunk0".to_string(), "acme_page2_chunk3".to_string()]
        );
        assert_eq!(
            pages[1].source_chunk_ids,
            vec!["acme_page1_chunk1".to_string(), "acme_page1_chunk0".to_string()]
        );

        let mut recovered: Vec<_> = pages
            .iter()
            .flat_map(|page| page.source_chunk_ids.iter().cloned())
            .collect();
        let mut expected: Vec<_> = chunks.iter().map(|c| c.chunk.chunk_id.clone()).collect();
        recovered.sort();
        expected.sort();
        assert_eq!(recovered, expected);
    }

    #[tokio::test]
    async fn empty_input_skips_source_lookup() {
        let source = StaticPages::new("acme", &[]);
        assert!(aggregate_parent_pages(&[], &source).await.unwrap().is_empty());
        assert_eq!(source.lookups(), 0);
    }

    #[tokio::test]
    async fn missing_company_source_is_reported() {
        let source = StaticPages::new("acme", &[(1, "text")]);
        let result = aggregate_parent_pages(&[retrieved("globex", 1, 0, 0.5)], &source).await;
        assert!(matches!(result, Err(QueryError::SourceNotFound(name)) if name == "globex"));
    }

    #[tokio::test]
    async fn page_absent_from_source_is_malformed() {
        let source = StaticPages::new("acme", &[(1, "text")]);
        let result = aggregate_parent_pages(&[retrieved("acme", 9, 0, 0.5)], &source).await;
        assert!(matches!(result, Err(QueryError::MalformedSource(_))));
    }

    #[tokio::test]
    async fn mixed_companies_are_rejected() {
        let source = StaticPages::new("acme", &[(1, "text")]);
        let chunks = vec![retrieved("acme", 1, 0, 0.5), retrieved("globex", 1, 0, 0.4)];
        assert!(matches!(
            aggregate_parent_pages(&chunks, &source).await,
            Err(QueryError::ChunkProvenance(_))
        ));
    }

    #[tokio::test]
    async fn fs_source_prefers_structured_pages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let source = FsPageSource::new(dir.path().join("pages"), dir.path().join("md"));
        let pages = vec![DocumentPage {
            page_num: 5,
            text: "Cash flow".to_string(),
            tables: vec![PageTable {
                headers: vec!["Item".to_string()],
                rows: vec![vec!["Capex".to_string()]],
            }],
        }];
        source.save("acme", &pages)?;

        let loaded = source.load_pages("acme").await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].number, 5);
        assert!(loaded[0].text.contains("| Capex |"));
        assert_eq!(source.companies()?, vec!["acme".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn fs_source_falls_back_to_markdown() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let source = FsPageSource::new(dir.path().join("pages"), dir.path().join("md"));
        fs::create_dir_all(dir.path().join("md"))?;
        fs::write(source.markdown_path("acme"), "# page 3\n\nsegment revenue")?;

        let loaded = source.load_pages("acme").await?;
        assert_eq!(loaded, vec![PageText { number: 3, text: "segment revenue".to_string() }]);

        fs::write(source.markdown_path("acme"), "no headers at all")?;
        assert!(matches!(source.load_pages("acme").await, Err(QueryError::MalformedSource(_))));
        assert!(matches!(source.load_pages("globex").await, Err(QueryError::SourceNotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn fs_source_rejects_corrupt_page_json() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let source = FsPageSource::new(dir.path().join("pages"), dir.path().join("md"));
        fs::create_dir_all(dir.path().join("pages"))?;
        fs::write(source.pages_path("acme"), "{not json")?;
        assert!(matches!(source.load_pages("acme").await, Err(QueryError::MalformedSource(_))));
        Ok(())
    }
}
