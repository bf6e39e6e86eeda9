//! Batch tagging of document corpora against an entity dictionary, with
//! ordered match output and pairwise co-occurrence scoring.

pub mod batch;
pub mod document;
pub mod handlers;
pub mod score;

pub use batch::{BatchStats, BatchTagger, Phase, REORDER_MARGIN, TaggerError, tag_stream};
pub use document::{DocumentError, DocumentSource, RawDocument, TsvDocumentReader, parse_record};
pub use handlers::{
    BatchHandler, Handler, HandlerError, HandlerPipeline, Output, OutputFormat, PrintHandler,
    ScoreHandler, SelectiveScoreHandler, TaggedDocument,
};
pub use score::{PairScorer, ScoreWeights, ScoredPair};
