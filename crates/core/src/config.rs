use crate::answer::SynthesisOptions;
use crate::rerank::RerankOptions;
use crate::retrieval::RetrievalOptions;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join("pdf_reports")
    }

    pub fn pages_dir(&self) -> PathBuf {
        self.root.join("parsed_pages")
    }

    pub fn markdown_dir(&self) -> PathBuf {
        self.root.join("parsed_md")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.root.join("chunked_reports")
    }

    pub fn vectors_dir(&self) -> PathBuf {
        self.root.join("vectors")
    }

    pub fn chunks_path(&self, company: &str) -> PathBuf {
        self.chunks_dir().join(format!("{company}_chunks.json"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineOptions {
    pub retrieval: RetrievalOptions,
    pub rerank: RerankOptions,
    pub synthesis: SynthesisOptions,
}
