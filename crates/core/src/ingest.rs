use crate::chunking::{Chunker, ChunkingConfig, TokenCodec};
use crate::config::DataLayout;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::DocumentExtractor;
use crate::index::IndexBuilder;
use crate::models::{Chunk, DocumentPage, PageText};
use crate::pages::FsPageSource;
use crate::traits::VectorStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn company_from_path(path: &Path) -> Result<String, IngestError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkedReport {
    pub company: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompanyReport {
    pub company: String,
    pub pages: usize,
    pub chunks: usize,
    pub embeddings_written: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    pub companies: Vec<CompanyReport>,
    pub skipped: Vec<SkippedDocument>,
}

/// Offline stage: extract every PDF under the layout's report folder, store
/// its pages, chunk them and build the company's vector partition.
pub struct Preprocessor<'a, X: ?Sized, T: ?Sized, E: ?Sized, S: ?Sized> {
    extractor: &'a X,
    codec: &'a T,
    embedder: &'a E,
    store: &'a S,
    layout: &'a DataLayout,
    chunking: ChunkingConfig,
}

impl<'a, X, T, E, S> Preprocessor<'a, X, T, E, S>
where
    X: DocumentExtractor + ?Sized,
    T: TokenCodec + ?Sized,
    E: Embedder + ?Sized,
    S: VectorStore + ?Sized,
{
    pub fn new(
        extractor: &'a X,
        codec: &'a T,
        embedder: &'a E,
        store: &'a S,
        layout: &'a DataLayout,
        chunking: ChunkingConfig,
    ) -> Result<Self, IngestError> {
        chunking.validate()?;
        Ok(Self {
            extractor,
            codec,
            embedder,
            store,
            layout,
            chunking,
        })
    }

    /// Processes every report; a failing report is recorded as skipped and
    /// does not stop the others.
    pub async fn run(&self) -> Result<IngestionReport, IngestError> {
        let folder = self.layout.pdf_dir();
        let files = discover_pdf_files(&folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut report = IngestionReport::default();
        for path in files {
            match self.process_document(&path).await {
                Ok(company) => report.companies.push(company),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping report");
                    report.skipped.push(SkippedDocument {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            companies = report.companies.len(),
            skipped = report.skipped.len(),
            "preprocessing finished"
        );
        Ok(report)
    }

    pub async fn process_document(&self, path: &Path) -> Result<CompanyReport, IngestError> {
        let company = company_from_path(path)?;
        let pages = self.extractor.extract(path).await?;

        let source = FsPageSource::new(self.layout.pages_dir(), self.layout.markdown_dir());
        source.save(&company, &pages)?;

        let chunks = self.chunk_pages(&company, &pages)?;
        if chunks.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "report for `{company}` produced no chunks"
            )));
        }
        self.write_chunks(&company, &chunks)?;

        let index = IndexBuilder::new(self.embedder, self.store)
            .build(&company, &chunks)
            .await?;

        Ok(CompanyReport {
            company,
            pages: pages.len(),
            chunks: chunks.len(),
            embeddings_written: index.embeddings_written,
        })
    }

    fn chunk_pages(&self, company: &str, pages: &[DocumentPage]) -> Result<Vec<Chunk>, IngestError> {
        let texts: Vec<PageText> = pages.iter().map(DocumentPage::to_page_text).collect();
        Chunker::new(self.codec, self.chunking)?.chunk_document(company, &texts)
    }

    fn write_chunks(&self, company: &str, chunks: &[Chunk]) -> Result<(), IngestError> {
        fs::create_dir_all(self.layout.chunks_dir())?;
        let report = ChunkedReport {
            company: company.to_string(),
            chunks: chunks.to_vec(),
        };
        fs::write(
            self.layout.chunks_path(company),
            serde_json::to_vec_pretty(&report)?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::tests::CharCodec;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::pages::PageSource;
    use crate::stores::LocalVectorStore;
    use async_trait::async_trait;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    struct FixedExtractor;

    #[async_trait]
    impl DocumentExtractor for FixedExtractor {
        async fn extract(&self, path: &Path) -> Result<Vec<DocumentPage>, IngestError> {
            if path.file_name().and_then(|name| name.to_str()) == Some("broken.pdf") {
                return Err(IngestError::Extraction("unreadable".to_string()));
            }
            Ok(vec![
                DocumentPage {
                    page_num: 1,
                    text: "Revenue grew strongly in the year.".to_string(),
                    tables: Vec::new(),
                },
                DocumentPage {
                    page_num: 2,
                    text: "The board approved a dividend.".to_string(),
                    tables: Vec::new(),
                },
            ])
        }
    }

    fn chunking() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 16,
            chunk_overlap: 4,
        }
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(base.join("notes.txt"), b"not a report")?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn company_is_the_file_stem() {
        assert_eq!(
            company_from_path(Path::new("/reports/中芯国际.pdf")).unwrap(),
            "中芯国际"
        );
        assert!(company_from_path(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn preprocessing_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = DataLayout::new(dir.path());
        let embedder = CharacterNgramEmbedder::default();
        let store = LocalVectorStore::in_memory();
        let preprocessor =
            Preprocessor::new(&FixedExtractor, &CharCodec, &embedder, &store, &layout, chunking())?;

        assert!(matches!(
            preprocessor.run().await,
            Err(IngestError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn preprocessing_builds_pages_chunks_and_partition() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let layout = DataLayout::new(dir.path());
        fs::create_dir_all(layout.pdf_dir())?;
        fs::write(layout.pdf_dir().join("acme.pdf"), b"%PDF-1.4\n%fake")?;
        fs::write(layout.pdf_dir().join("broken.pdf"), b"%PDF-1.4\n%broken")?;

        let embedder = CharacterNgramEmbedder::default();
        let store = LocalVectorStore::in_memory();
        let preprocessor =
            Preprocessor::new(&FixedExtractor, &CharCodec, &embedder, &store, &layout, chunking())?;

        let report = preprocessor.run().await?;

        assert_eq!(report.companies.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].reason.contains("unreadable"));

        let acme = &report.companies[0];
        assert_eq!(acme.company, "acme");
        assert_eq!(acme.pages, 2);
        assert_eq!(acme.chunks, acme.embeddings_written);
        assert!(store.partition_exists("acme").await?);
        assert!(!store.partition_exists("broken").await?);

        let stored: ChunkedReport =
            serde_json::from_slice(&fs::read(layout.chunks_path("acme"))?)?;
        assert_eq!(stored.chunks.len(), acme.chunks);
        assert!(stored
            .chunks
            .iter()
            .all(|chunk| chunk.chunk_id.starts_with("acme_page")));

        let source = FsPageSource::new(layout.pages_dir(), layout.markdown_dir());
        let pages = source.load_pages("acme").await?;
        assert_eq!(pages.len(), 2);
        assert!(layout.markdown_dir().join("acme.md").exists());
        Ok(())
    }

    #[test]
    fn invalid_chunking_is_rejected_up_front() {
        let layout = DataLayout::new("/unused");
        let embedder = CharacterNgramEmbedder::default();
        let store = LocalVectorStore::in_memory();
        let result = Preprocessor::new(
            &FixedExtractor,
            &CharCodec,
            &embedder,
            &store,
            &layout,
            ChunkingConfig {
                chunk_size: 4,
                chunk_overlap: 4,
            },
        );
        assert!(matches!(result, Err(IngestError::Configuration(_))));
    }
}
