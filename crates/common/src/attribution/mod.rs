//! Attribution components
//!
//! Every piece of evidence returned to a caller resolves to an attributable
//! source with a well-defined confidence:
//! - Chunk-level attribution with tiered fallback (context parser)
//! - Multi-hop path attribution with weakest-link confidence
//! - Sentence-level answer attribution via embedding similarity

mod context_parser;
mod path_attributor;
mod sentence_attributor;

pub use context_parser::{
    AttributedChunk, AttributionMethod, ContextParser, SourceType,
};
pub use path_attributor::{AttributedHop, AttributedPath, PathAttributor};
pub use sentence_attributor::{AttributedSentence, SentenceAttributor};
