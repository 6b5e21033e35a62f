//! Shared fixtures for the integration tests: deterministic providers and
//! corpus builders. Nothing here touches the network.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pdf_rag::chat::Generator;
use pdf_rag::config::Config;
use pdf_rag::context::RagContext;
use pdf_rag::embedding::Embedder;
use pdf_rag::error::{EmbeddingProviderError, ExtractionError, GenerationProviderError};
use pdf_rag::extract::{ExtractorChain, PageExtractor};
use tempfile::TempDir;

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// [`DIMS`] buckets. Texts sharing words score higher.
#[derive(Default)]
pub struct HashEmbedder {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hash: u64 = 0xcbf29ce484222325;
            for b in word.to_lowercase().bytes() {
                hash ^= b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % DIMS as u64) as usize] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> Option<usize> {
        Some(DIMS)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingProviderError::Request(
                "connection refused".to_string(),
            ));
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Treats document bytes as UTF-8 with pages separated by form feeds.
/// Documents starting with `BAD` fail, as a corrupt PDF would.
pub struct PlainTextExtractor;

impl PageExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        if bytes.starts_with(b"BAD") {
            return Err(ExtractionError::Strategy {
                strategy: "plain-text",
                message: "malformed document".to_string(),
            });
        }
        let text = String::from_utf8_lossy(bytes);
        Ok(text.split('\x0c').map(|p| p.to_string()).collect())
    }
}

/// Records every prompt and answers with a fixed string.
#[derive(Default)]
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn default_model(&self) -> &str {
        "test-model"
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationProviderError> {
        self.prompts
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenerationProviderError::Status {
                status: 404,
                body: "model not found".to_string(),
            });
        }
        Ok("generated answer".to_string())
    }
}

/// A temp workspace with `corpus/` and a sibling `vectorstore/`.
pub struct Workspace {
    pub dir: TempDir,
    pub embedder: Arc<HashEmbedder>,
    pub generator: Arc<RecordingGenerator>,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("corpus")).unwrap();
        Self {
            dir,
            embedder: Arc::new(HashEmbedder::default()),
            generator: Arc::new(RecordingGenerator::default()),
        }
    }

    pub fn corpus(&self) -> PathBuf {
        self.dir.path().join("corpus")
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.path().join("vectorstore")
    }

    pub fn config(&self) -> Config {
        let mut config = Config::from_root(self.corpus());
        config.index.path = self.index_path();
        config
    }

    pub fn write(&self, name: &str, contents: &[u8]) {
        std::fs::write(self.corpus().join(name), contents).unwrap();
    }

    pub fn remove(&self, name: &str) {
        std::fs::remove_file(self.corpus().join(name)).unwrap();
    }

    /// Context over plain-text "PDFs".
    pub fn context(&self) -> RagContext {
        self.context_with(ExtractorChain::new(vec![Box::new(PlainTextExtractor)]))
    }

    pub fn context_with(&self, extractor: ExtractorChain) -> RagContext {
        RagContext::with_providers(
            self.config(),
            self.embedder.clone(),
            self.generator.clone(),
            extractor,
        )
        .unwrap()
    }
}

/// Pages joined the way [`PlainTextExtractor`] splits them.
pub fn pages(texts: &[&str]) -> Vec<u8> {
    texts.join("\x0c").into_bytes()
}

/// Minimal valid PDF with one text line per page, Helvetica, with a
/// correct xref table so strict parsers accept it.
pub fn pdf_with_pages(lines: &[&str]) -> Vec<u8> {
    let n = lines.len();
    // objects: 1 catalog, 2 pages, 3 font, then (page, content) pairs
    let page_obj = |i: usize| 4 + 2 * i;
    let content_obj = |i: usize| 5 + 2 * i;
    let total = 3 + 2 * n;

    let mut out = Vec::new();
    let mut offsets = vec![0usize; total + 1];
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets[1] = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    offsets[2] = out.len();
    let kids: Vec<String> = (0..n).map(|i| format!("{} 0 R", page_obj(i))).collect();
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            n
        )
        .as_bytes(),
    );

    offsets[3] = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, line) in lines.iter().enumerate() {
        offsets[page_obj(i)] = out.len();
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_obj(i),
                content_obj(i)
            )
            .as_bytes(),
        );

        let stream = format!("BT /F1 12 Tf 72 700 Td ({}) Tj ET", line);
        offsets[content_obj(i)] = out.len();
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_obj(i),
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", total + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in offsets.iter().skip(1) {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            total + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}
