//! Document ingestion: normalization, chunking, language detection, and
//! the pipeline that persists embedded chunks into the graph.

mod chunker;
mod language;
mod normalize;
mod pipeline;

pub use chunker::TextChunker;
pub use language::{resolve_language, LanguageDetector, ScriptDetector, UNDETERMINED};
pub use normalize::{chunk_fingerprint, normalize_text};
pub use pipeline::{CancelToken, ChunkFailure, IngestPipeline, IngestReport, IngestRequest};
