//! Corpus intake: URL identity, relevance gating, chunking and the ingest service.

pub mod canonical;
pub mod chunker;
pub mod relevance;
pub mod service;

pub use relevance::{RelevanceGate, RelevanceVocabulary};
pub use service::{IngestReport, IngestService, RawDocument, RetentionReport};
