//! Core data models that flow through the ingestion and retrieval pipeline.
//!
//! Documents and pages are ephemeral: they exist only for the duration of an
//! ingestion pass. Chunks become index metadata; query results and reports
//! live for a single call.

use serde::{Deserialize, Serialize};

/// Raw document as supplied by a [`DocumentSource`](crate::source::DocumentSource).
#[derive(Debug, Clone)]
pub struct Document {
    /// Identifier, usually the file name relative to the corpus root.
    pub id: String,
    pub bytes: Vec<u8>,
}

/// Text of one physical page. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub document_id: String,
    pub number: u32,
    pub text: String,
}

/// An indexable passage cut from a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document_id: String,
    pub page: u32,
    pub text: String,
    /// Position within the document, contiguous from 0.
    pub seq: usize,
}

/// A single retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub text: String,
    pub document_id: String,
    pub page: u32,
    pub score: f32,
}

/// Provenance shown to the end user next to a generated answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub document_id: String,
    pub page: u32,
    pub score: f32,
}

/// Outcome of one ingestion run, in the shape the API layer returns verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub loaded: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub chunks: usize,
}

impl IngestionReport {
    pub fn failure(message: impl Into<String>, loaded: Vec<String>, failed: Vec<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            loaded,
            failed,
            chunks: 0,
        }
    }
}
